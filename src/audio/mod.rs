pub mod decoder;
pub mod envelope;
pub mod mixer;
pub mod offline;
pub mod output;
pub mod resampler;

use crate::error::{AudioError, DecodeError};
use crate::models::AudioBuffer;

pub use decoder::SymphoniaDecoder;
pub use envelope::{GainEnvelope, VolumeRamp};
pub use mixer::{SegmentId, SegmentMixer, SegmentRequest};
pub use offline::OfflineOutput;
pub use output::CpalOutput;
pub use resampler::LinearResampler;

/// Lifecycle of an audio output graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Clock frozen; nothing is rendered until `resume`
    Suspended,
    Running,
    /// Unusable; the player must be reconstructed
    Closed,
}

/// Decodes a complete in-memory payload into interleaved f32 audio
pub trait ChunkDecoder: Send + Sync {
    /// `extension` is a format hint taken from the track URL
    fn decode(&self, payload: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, DecodeError>;
}

/// Audio output graph with its own clock.
///
/// Segments are placed at absolute clock times and play independently of
/// the caller; placing one must never block on I/O.
pub trait AudioOutput: Send + Sync {
    /// Audio clock in seconds
    fn current_time(&self) -> f64;

    fn state(&self) -> OutputState;

    /// Start the clock if suspended
    fn resume(&self) -> Result<(), AudioError>;

    fn start_segment(&self, request: SegmentRequest) -> Result<SegmentId, AudioError>;

    /// Stop a segment immediately; unknown or finished ids are ignored
    fn stop_segment(&self, id: SegmentId);

    fn is_segment_active(&self, id: SegmentId) -> bool;

    /// Move the master volume towards `volume` with the given time constant
    fn set_volume(&self, volume: f32, time_constant: f64);

    fn sample_rate(&self) -> u32;

    fn close(&self);
}
