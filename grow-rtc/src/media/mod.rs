mod capture;
mod pipeline;
mod sink;
mod track;

pub use capture::{MediaCapture, SampleTrackCapture};
pub use pipeline::MediaPipeline;
pub use sink::{LoggingSink, MediaSink};
pub use track::{LocalMediaTrack, LocalMediaTracks, RemoteTrack, TrackKind};
