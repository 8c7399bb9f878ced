use crate::protocol::IceCandidateDescriptor;

pub const DEFAULT_PRIVATE_PREFIXES: &[&str] = &["172."];

/// Drops locally gathered candidates whose address starts with one of the
/// configured prefixes (container bridge networks by default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    prefixes: Vec<String>,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PRIVATE_PREFIXES.iter().copied())
    }
}

impl CandidateFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|prefix: &String| !prefix.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn allow_all() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_private(&self, address: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| address.starts_with(prefix.as_str()))
    }

    pub fn should_forward(&self, candidate: &IceCandidateDescriptor) -> bool {
        candidate
            .address
            .as_deref()
            .is_none_or(|address| !self.is_private(address))
    }
}
