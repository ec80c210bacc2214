use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grow_rtc::media::{
    LocalMediaTrack, LocalMediaTracks, MediaCapture, MediaSink, RemoteTrack, TrackKind,
};
use grow_rtc::{MediaAcquisitionError, MediaConstraints};

/// Capture that hands out plain tracks, or a fixed error.
#[derive(Clone, Default)]
pub struct FakeCapture {
    error: Option<MediaAcquisitionError>,
    calls: Arc<AtomicUsize>,
    acquired: Arc<Mutex<Vec<LocalMediaTracks>>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: MediaAcquisitionError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> Vec<LocalMediaTracks> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaTracks, MediaAcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalMediaTrack::new("mic", TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(LocalMediaTrack::new("cam", TrackKind::Video));
        }
        let tracks = LocalMediaTracks::new(tracks);
        self.acquired.lock().unwrap().push(tracks.clone());
        Ok(tracks)
    }
}

/// Sink that records what was bound to it.
#[derive(Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl MediaSink for RecordingSink {
    fn attach_local(&self, tracks: &LocalMediaTracks) {
        self.push(format!("local:{}", tracks.len()));
    }

    fn attach_remote(&self, track: &RemoteTrack) {
        self.push(format!("remote:{}:{}", track.kind, track.id));
    }

    fn detach_all(&self) {
        self.push("detach".to_owned());
    }
}
