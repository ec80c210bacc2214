use crate::media::track::{LocalMediaTracks, RemoteTrack};

/// Where local preview and remote media end up.
pub trait MediaSink: Send + Sync {
    fn attach_local(&self, tracks: &LocalMediaTracks);

    /// Replaces whatever was previously attached for the same kind.
    fn attach_remote(&self, track: &RemoteTrack);

    fn detach_all(&self);
}

/// Sink for headless sessions: records bindings in the log.
pub struct LoggingSink {
    label: String,
}

impl LoggingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl MediaSink for LoggingSink {
    fn attach_local(&self, tracks: &LocalMediaTracks) {
        for track in tracks.iter() {
            tracing::info!("[{}] local preview: {} track {}", self.label, track.kind(), track.id());
        }
    }

    fn attach_remote(&self, track: &RemoteTrack) {
        tracing::info!(
            "[{}] remote {} track {} (stream {})",
            self.label,
            track.kind,
            track.id,
            track.stream_id
        );
    }

    fn detach_all(&self) {
        tracing::info!("[{}] sinks cleared", self.label);
    }
}
