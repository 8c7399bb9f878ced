use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::track::track_remote::TrackRemote;

use super::{MediaError, RemoteTrack};

/// A playback sink attached to one remote audio track.
pub trait AudioRenderer: Send {
    fn id(&self) -> &str;
    /// Detaches from the track. Calling it twice is harmless.
    fn stop(&mut self);
}

pub trait RendererFactory: Send + Sync {
    fn create_and_attach(&self, track: RemoteTrack) -> Result<Box<dyn AudioRenderer>, MediaError>;
}

/// Drains RTP from a `webrtc` remote track and counts what arrives.
///
/// The panel has no audio device of its own; draining keeps the receiver's
/// jitter buffers from backing up and gives a visible signal that audio is
/// flowing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtpDrainRendererFactory;

impl RendererFactory for RtpDrainRendererFactory {
    fn create_and_attach(&self, track: RemoteTrack) -> Result<Box<dyn AudioRenderer>, MediaError> {
        let remote = track
            .handle
            .clone()
            .downcast::<TrackRemote>()
            .map_err(|_| MediaError::UnsupportedTrack(track.track_id.clone()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let packets = Arc::new(AtomicU64::new(0));
        let bytes = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(drain_track(
            remote,
            id.clone(),
            Arc::clone(&packets),
            Arc::clone(&bytes),
        ));
        info!(
            target: "panel::rtc",
            renderer = %id,
            track_id = %track.track_id,
            stream_id = ?track.stream_id,
            "audio renderer attached"
        );
        Ok(Box::new(RtpDrainRenderer {
            id,
            packets,
            bytes,
            task: Some(task),
        }))
    }
}

struct RtpDrainRenderer {
    id: String,
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl AudioRenderer for RtpDrainRenderer {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(
                target: "panel::rtc",
                renderer = %self.id,
                packets = self.packets.load(Ordering::Relaxed),
                bytes = self.bytes.load(Ordering::Relaxed),
                "audio renderer stopped"
            );
        }
    }
}

impl Drop for RtpDrainRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drain_track(
    track: Arc<TrackRemote>,
    renderer: String,
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                packets.fetch_add(1, Ordering::Relaxed);
                bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
            }
            Err(err) => {
                debug!(target: "panel::rtc", %renderer, error = %err, "remote track ended");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;

    #[test]
    fn rejects_tracks_from_other_engines() {
        let track = RemoteTrack {
            track_id: "t1".into(),
            stream_id: None,
            kind: TrackKind::Audio,
            handle: Arc::new(()),
        };
        let result = RtpDrainRendererFactory.create_and_attach(track);
        assert!(matches!(result, Err(MediaError::UnsupportedTrack(id)) if id == "t1"));
    }
}
