use thiserror::Error;

pub mod book;
pub mod manager;
pub mod ui;

pub use book::{CallBook, SessionEffect};
pub use manager::{CallSessionManager, DEFAULT_POLL_INTERVAL};
pub use ui::{CallUi, RecordingUi, TracingUi, UiEvent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no incoming call to act on")]
    NoIncomingCall,
    #[error("no active call to end")]
    NoCurrentCall,
}
