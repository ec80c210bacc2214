use std::collections::HashMap;
use std::sync::Arc;

use crate::config::MediaConstraints;
use crate::error::MediaAcquisitionError;
use crate::media::capture::MediaCapture;
use crate::media::sink::MediaSink;
use crate::media::track::{LocalMediaTracks, RemoteTrack, TrackKind};

/// Owns the local tracks of one room session and routes remote tracks to the
/// sink.
pub struct MediaPipeline {
    capture: Arc<dyn MediaCapture>,
    sink: Arc<dyn MediaSink>,
    local: Option<LocalMediaTracks>,
    remote: HashMap<TrackKind, RemoteTrack>,
    released: bool,
}

impl MediaPipeline {
    pub fn new(capture: Arc<dyn MediaCapture>, sink: Arc<dyn MediaSink>) -> Self {
        Self {
            capture,
            sink,
            local: None,
            remote: HashMap::new(),
            released: false,
        }
    }

    /// Acquires local media once; later calls return the same tracks.
    pub async fn acquire_local_media(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaTracks, MediaAcquisitionError> {
        if self.released {
            return Err(MediaAcquisitionError::Constraints(
                "media pipeline already released".to_owned(),
            ));
        }
        if let Some(tracks) = &self.local {
            return Ok(tracks.clone());
        }

        let tracks = self.capture.acquire(constraints).await?;
        self.sink.attach_local(&tracks);
        self.local = Some(tracks.clone());
        Ok(tracks)
    }

    pub fn bind_remote_stream(&mut self, track: RemoteTrack) {
        if self.released {
            tracing::debug!("Ignoring remote {} track after release", track.kind);
            return;
        }
        if let Some(previous) = self.remote.get(&track.kind) {
            tracing::debug!(
                "Replacing remote {} track {} with {}",
                track.kind,
                previous.id,
                track.id
            );
        }
        self.sink.attach_remote(&track);
        self.remote.insert(track.kind, track);
    }

    pub fn local_tracks(&self) -> Option<&LocalMediaTracks> {
        self.local.as_ref()
    }

    pub fn remote_track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        self.remote.get(&kind)
    }

    pub fn remote_track_count(&self) -> usize {
        self.remote.len()
    }

    /// Stops every local track and clears the sink. Safe to call twice.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(tracks) = self.local.take() {
            let stopped = tracks.stop_all();
            tracing::info!("Stopped {} local track(s)", stopped);
        }
        self.remote.clear();
        self.sink.detach_all();
    }
}
