use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config::MediaConstraints;
use crate::error::MediaAcquisitionError;
use crate::media::track::{LocalMediaTrack, LocalMediaTracks, TrackKind};

/// Source of local audio/video. Failures are never retried.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaTracks, MediaAcquisitionError>;
}

/// Creates outbound sample tracks (Opus audio, VP8 video). The host feeds
/// them with encoded samples through [`LocalMediaTrack::write_sample`].
pub struct SampleTrackCapture {
    stream_id: String,
}

impl SampleTrackCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    fn track(&self, kind: TrackKind) -> LocalMediaTrack {
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            kind.to_string(),
            self.stream_id.clone(),
        ));
        LocalMediaTrack::with_rtc(kind, rtc)
    }
}

impl Default for SampleTrackCapture {
    fn default() -> Self {
        Self::new("grow-rtc")
    }
}

#[async_trait]
impl MediaCapture for SampleTrackCapture {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaTracks, MediaAcquisitionError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAcquisitionError::Constraints(
                "neither audio nor video requested".to_owned(),
            ));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.track(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(self.track(TrackKind::Video));
        }
        tracing::info!("Acquired {} local track(s)", tracks.len());

        Ok(LocalMediaTracks::new(tracks))
    }
}
