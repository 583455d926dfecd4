use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Decoded, interleaved f32 audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: usize,
}

impl AudioBuffer {
    /// Silent buffer of the given size
    pub fn new(channels: u16, sample_rate: u32, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
            sample_rate,
            frames,
        }
    }

    pub fn from_samples(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let frames = if channels == 0 { 0 } else { samples.len() / channels as usize };
        Self {
            samples,
            channels,
            sample_rate,
            frames,
        }
    }

    /// Length in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    /// Copy of frames `[start, end)`, clamped to the buffer
    pub fn slice_frames(&self, start: usize, end: usize) -> AudioBuffer {
        let start = start.min(self.frames);
        let end = end.clamp(start, self.frames);
        let ch = self.channels as usize;
        AudioBuffer {
            samples: self.samples[start * ch..end * ch].to_vec(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            frames: end - start,
        }
    }

    /// Size of the decoded samples in bytes
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// One streamed unit of a track, owned by the chunk store until evicted
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    /// Seconds from track start, always `index * chunk_duration`
    pub start_time: f64,
    /// Seconds covered; the final chunk may be shorter than nominal
    pub duration: f64,
    pub buffer: Arc<AudioBuffer>,
    /// Raw payload size used for bandwidth and memory accounting
    pub size_bytes: usize,
}

impl Chunk {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Maps track time onto chunk indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub chunk_duration: f64,
    pub duration: f64,
    pub total_chunks: usize,
}

impl ChunkLayout {
    pub fn new(duration: f64, chunk_duration: f64) -> Self {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let total_chunks = (duration / chunk_duration).ceil() as usize;
        Self {
            chunk_duration,
            duration,
            total_chunks,
        }
    }

    /// Index of the chunk containing track time `t`
    pub fn chunk_index_at(&self, t: f64) -> usize {
        (t.max(0.0) / self.chunk_duration).floor() as usize
    }

    pub fn chunk_start(&self, index: usize) -> f64 {
        index as f64 * self.chunk_duration
    }

    /// Seconds of track covered by chunk `index`
    pub fn chunk_span(&self, index: usize) -> f64 {
        let start = self.chunk_start(index);
        (self.duration - start).clamp(0.0, self.chunk_duration)
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.total_chunks
    }

    pub fn clamp_time(&self, t: f64) -> f64 {
        if t.is_nan() {
            return 0.0;
        }
        t.clamp(0.0, self.duration)
    }
}

/// Inclusive byte range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Byte range for a chunk under a fixed byte-rate assumption.
///
/// This is an estimate: it is only exact for constant-rate encodings whose
/// byte rate matches `assumed_bytes_per_second`. Any mismatch produces ranges
/// that do not align with the real chunk boundaries.
pub fn estimate_byte_range(index: usize, chunk_duration: f64, assumed_bytes_per_second: u64) -> ByteRange {
    let bytes_per_chunk = (chunk_duration * assumed_bytes_per_second as f64).round() as u64;
    let bytes_per_chunk = bytes_per_chunk.max(1);
    let start = index as u64 * bytes_per_chunk;
    ByteRange {
        start,
        end: start + bytes_per_chunk - 1,
    }
}

/// Duration used when no length information is available at all
pub const DEFAULT_TRACK_DURATION: f64 = 180.0;

/// Assumed bitrate in bits per second, keyed off the URL's file extension
pub fn estimated_bitrate(url: &str) -> u64 {
    match url_extension(url).as_deref() {
        Some("mp3") => 128_000,
        Some("m4a") | Some("aac") => 128_000,
        Some("wav") => 1_411_200,
        Some("flac") => 1_000_000,
        _ => 128_000,
    }
}

/// Duration estimate in seconds from the payload size and an assumed bitrate
pub fn estimate_duration(content_length: u64, url: &str) -> f64 {
    (content_length as f64 * 8.0) / estimated_bitrate(url) as f64
}

/// Lower-cased file extension of a URL path, ignoring query and fragment
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// Optional caller-supplied track metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Exact duration in seconds; wins over estimation
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl TrackMetadata {
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            ..Default::default()
        }
    }
}

/// The track currently loaded into the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub url: String,
    pub metadata: TrackMetadata,
    pub layout: ChunkLayout,
    /// Whether `layout.duration` came from metadata rather than estimation
    pub exact_duration: bool,
}

impl TrackInfo {
    /// Title, falling back to the last URL path segment
    pub fn display_name(&self) -> String {
        self.metadata.title.clone().unwrap_or_else(|| {
            self.url
                .split(['?', '#'])
                .next()
                .and_then(|p| p.rsplit('/').next())
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown")
                .to_string()
        })
    }
}

/// Transport state; a single enum keeps playing and paused exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Point-in-time copy of the player state
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub current_time: f64,
    pub current_chunk: usize,
    pub duration: f64,
    pub total_chunks: usize,
    pub volume: f32,
    pub is_buffering: bool,
    /// Audio-clock time of the last seek
    pub last_seek_time: f64,
    pub track: Option<TrackInfo>,
    pub performance: crate::stream::performance::CounterSnapshot,
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    /// Progress through the track (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Format position as MM:SS
    pub fn position_formatted(&self) -> String {
        let total_seconds = self.current_time.max(0.0) as u64;
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_layout_counts() {
        let layout = ChunkLayout::new(100.0, 30.0);
        assert_eq!(layout.total_chunks, 4);
        assert_eq!(layout.chunk_span(0), 30.0);
        assert_eq!(layout.chunk_span(3), 10.0);
        assert_eq!(layout.chunk_span(4), 0.0);

        let exact = ChunkLayout::new(90.0, 30.0);
        assert_eq!(exact.total_chunks, 3);
        assert_eq!(exact.chunk_span(2), 30.0);
    }

    #[test]
    fn test_chunk_index_matches_start_times() {
        let layout = ChunkLayout::new(100.0, 30.0);
        let mut t = 0.0;
        while t < layout.duration {
            let index = layout.chunk_index_at(t);
            assert!(layout.chunk_start(index) <= t);
            assert!(t < layout.chunk_start(index) + layout.chunk_duration);
            t += 0.25;
        }
        assert_eq!(layout.chunk_start(2), 60.0);
        assert_eq!(layout.chunk_index_at(75.0), 2);
        assert_eq!(layout.chunk_index_at(-3.0), 0);
    }

    #[test]
    fn test_clamp_time() {
        let layout = ChunkLayout::new(90.0, 30.0);
        assert_eq!(layout.clamp_time(-1.0), 0.0);
        assert_eq!(layout.clamp_time(120.0), 90.0);
        assert_eq!(layout.clamp_time(f64::NAN), 0.0);
    }

    #[test]
    fn test_estimate_byte_range() {
        let range = estimate_byte_range(0, 30.0, 16_000);
        assert_eq!(range, ByteRange { start: 0, end: 479_999 });
        assert_eq!(range.byte_count(), 480_000);

        let range = estimate_byte_range(2, 30.0, 16_000);
        assert_eq!(range.start, 960_000);
        assert_eq!(range.end, 1_439_999);
        assert_eq!(range.header_value(), "bytes=960000-1439999");
    }

    #[test]
    fn test_estimate_duration_by_extension() {
        // 128 kbps: 16000 bytes per second
        assert_eq!(estimate_duration(1_600_000, "https://host/song.mp3"), 100.0);
        assert_eq!(estimate_duration(176_400, "song.WAV"), 1.0);
        assert_eq!(estimate_duration(125_000, "/a/b.flac?sig=1"), 1.0);
        assert_eq!(estimate_duration(16_000, "stream"), 1.0);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://x.org/music/a.b/track.Mp3?x=1#t"), Some("mp3".to_string()));
        assert_eq!(url_extension("https://x.org/music/track"), None);
        assert_eq!(url_extension("file."), None);
    }

    #[test]
    fn test_audio_buffer_slice() {
        let buffer = AudioBuffer::from_samples((0..20).map(|v| v as f32).collect(), 2, 10);
        assert_eq!(buffer.frames, 10);
        assert_eq!(buffer.duration_secs(), 1.0);

        let slice = buffer.slice_frames(3, 5);
        assert_eq!(slice.frames, 2);
        assert_eq!(slice.samples, vec![6.0, 7.0, 8.0, 9.0]);

        let tail = buffer.slice_frames(8, 100);
        assert_eq!(tail.frames, 2);
        assert_eq!(buffer.slice_frames(12, 14).frames, 0);
    }

    #[test]
    fn test_display_name_falls_back_to_url() {
        let track = TrackInfo {
            url: "https://cdn.example/audio/our-song.mp3?v=2".to_string(),
            metadata: TrackMetadata::default(),
            layout: ChunkLayout::new(10.0, 30.0),
            exact_duration: false,
        };
        assert_eq!(track.display_name(), "our-song.mp3");
    }
}
