use std::sync::Arc;

use crate::audio::envelope::{GainEnvelope, VolumeRamp};
use crate::audio::resampler::conform_buffer;
use crate::models::AudioBuffer;

pub type SegmentId = u64;

/// A request to play part of a buffer at an absolute audio-clock time
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub buffer: Arc<AudioBuffer>,
    /// Audio-clock time in seconds at which playback starts
    pub when: f64,
    /// Seconds into `buffer` at which playback starts
    pub offset: f64,
    /// Seconds to play; `None` plays to the end of the buffer
    pub duration: Option<f64>,
    pub envelope: Option<GainEnvelope>,
}

/// A segment already converted to the output format, ready to be added
/// without further allocation under the mixer lock
#[derive(Debug)]
pub struct PreparedSegment {
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    offset_frames: usize,
    play_frames: usize,
    envelope: Option<GainEnvelope>,
}

#[derive(Debug)]
struct ActiveSegment {
    id: SegmentId,
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    offset_frames: usize,
    play_frames: usize,
    envelope: Option<GainEnvelope>,
}

impl ActiveSegment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.play_frames as u64
    }
}

/// Sample-accurate mixer shared between the device callback and the player.
///
/// The clock counts rendered frames; `current_time` is derived from it, so it
/// only moves when audio is actually produced.
#[derive(Debug)]
pub struct SegmentMixer {
    sample_rate: u32,
    channels: u16,
    clock_frames: u64,
    segments: Vec<ActiveSegment>,
    volume: VolumeRamp,
    next_id: SegmentId,
}

impl SegmentMixer {
    pub fn new(sample_rate: u32, channels: u16, volume: f32, time_constant: f64) -> Self {
        Self {
            sample_rate,
            channels,
            clock_frames: 0,
            segments: Vec::new(),
            volume: VolumeRamp::new(volume, time_constant),
            next_id: 1,
        }
    }

    /// Convert a request to the mixer's output format. Called outside the
    /// mixer lock since resampling can be expensive.
    pub fn prepare(request: SegmentRequest, sample_rate: u32, channels: u16) -> PreparedSegment {
        let buffer = if request.buffer.sample_rate == sample_rate && request.buffer.channels == channels {
            request.buffer
        } else {
            Arc::new(conform_buffer(&request.buffer, sample_rate, channels))
        };

        let sr = sample_rate as f64;
        let offset_frames = ((request.offset.max(0.0) * sr).round() as usize).min(buffer.frames);
        let available = buffer.frames - offset_frames;
        let play_frames = match request.duration {
            Some(duration) => ((duration.max(0.0) * sr).round() as usize).min(available),
            None => available,
        };

        PreparedSegment {
            buffer,
            start_frame: (request.when.max(0.0) * sr).round() as u64,
            offset_frames,
            play_frames,
            envelope: request.envelope,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Add a prepared segment; a start time already in the past starts now
    pub fn add(&mut self, prepared: PreparedSegment) -> SegmentId {
        let id = self.next_id;
        self.next_id += 1;
        self.segments.push(ActiveSegment {
            id,
            buffer: prepared.buffer,
            start_frame: prepared.start_frame.max(self.clock_frames),
            offset_frames: prepared.offset_frames,
            play_frames: prepared.play_frames,
            envelope: prepared.envelope,
        });
        id
    }

    /// Remove a segment; returns false if it already finished
    pub fn remove(&mut self, id: SegmentId) -> bool {
        let before = self.segments.len();
        self.segments.retain(|s| s.id != id);
        self.segments.len() != before
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn is_active(&self, id: SegmentId) -> bool {
        self.segments.iter().any(|s| s.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.segments.len()
    }

    pub fn set_volume(&mut self, volume: f32, time_constant: f64) {
        self.volume.set_target(volume, time_constant);
    }

    /// Target master volume
    pub fn volume(&self) -> f32 {
        self.volume.target()
    }

    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.clock_frames as f64 / self.sample_rate as f64
    }

    pub fn clock_frames(&self) -> u64 {
        self.clock_frames
    }

    /// Render interleaved frames into `out`, advancing the clock
    pub fn render(&mut self, out: &mut [f32]) {
        let ch = self.channels as usize;
        if ch == 0 {
            return;
        }
        let sr = self.sample_rate as f64;

        for frame in out.chunks_exact_mut(ch) {
            frame.fill(0.0);
            let clock = self.clock_frames;
            let t = clock as f64 / sr;

            for segment in &self.segments {
                if clock < segment.start_frame || clock >= segment.end_frame() {
                    continue;
                }
                let src = segment.offset_frames + (clock - segment.start_frame) as usize;
                let gain = segment.envelope.map_or(1.0, |e| e.gain_at(t));
                let base = src * ch;
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample += segment.buffer.samples[base + c] * gain;
                }
            }

            let master = self.volume.next_gain(self.sample_rate);
            for sample in frame.iter_mut() {
                *sample *= master;
            }

            self.clock_frames += 1;
        }

        let now = self.clock_frames;
        self.segments.retain(|s| s.end_frame() > now);
    }

    /// Advance the clock by `frames`, discarding the output
    pub fn advance(&mut self, frames: usize) {
        let mut scratch = vec![0.0f32; 1024 * self.channels as usize];
        let mut remaining = frames;
        while remaining > 0 {
            let step = remaining.min(1024);
            self.render(&mut scratch[..step * self.channels as usize]);
            remaining -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_buffer(value: f32, frames: usize, sample_rate: u32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_samples(vec![value; frames], 1, sample_rate))
    }

    fn request(buffer: Arc<AudioBuffer>, when: f64) -> SegmentRequest {
        SegmentRequest {
            buffer,
            when,
            offset: 0.0,
            duration: None,
            envelope: None,
        }
    }

    #[test]
    fn test_segment_starts_at_scheduled_frame() {
        let mut mixer = SegmentMixer::new(100, 1, 1.0, 0.0);
        let prepared = SegmentMixer::prepare(request(constant_buffer(0.5, 10, 100), 0.05), 100, 1);
        mixer.add(prepared);

        let mut out = vec![0.0; 20];
        mixer.render(&mut out);

        assert!(out[..5].iter().all(|&s| s == 0.0));
        assert!(out[5..15].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[15..].iter().all(|&s| s == 0.0));
        assert_eq!(mixer.active_count(), 0);
        assert!((mixer.current_time() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_offset_and_duration_limit_playback() {
        let samples: Vec<f32> = (0..100).map(|v| v as f32).collect();
        let buffer = Arc::new(AudioBuffer::from_samples(samples, 1, 100));
        let mut mixer = SegmentMixer::new(100, 1, 1.0, 0.0);
        let prepared = SegmentMixer::prepare(
            SegmentRequest {
                buffer,
                when: 0.0,
                offset: 0.5,
                duration: Some(0.1),
                envelope: None,
            },
            100,
            1,
        );
        mixer.add(prepared);

        let mut out = vec![0.0; 20];
        mixer.render(&mut out);
        assert_eq!(out[0], 50.0);
        assert_eq!(out[9], 59.0);
        assert_eq!(out[10], 0.0);
    }

    #[test]
    fn test_past_start_begins_immediately() {
        let mut mixer = SegmentMixer::new(100, 1, 1.0, 0.0);
        mixer.advance(50);

        let id = mixer.add(SegmentMixer::prepare(request(constant_buffer(1.0, 10, 100), 0.0), 100, 1));
        let mut out = vec![0.0; 1];
        mixer.render(&mut out);
        assert_eq!(out[0], 1.0);
        assert!(mixer.is_active(id));
    }

    #[test]
    fn test_envelope_applies_gain() {
        let mut mixer = SegmentMixer::new(100, 1, 1.0, 0.0);
        let mut req = request(constant_buffer(1.0, 100, 100), 0.0);
        req.envelope = Some(GainEnvelope::fade_in(0.0, 0.5));
        mixer.add(SegmentMixer::prepare(req, 100, 1));

        let mut out = vec![0.0; 100];
        mixer.render(&mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[25] - 0.5).abs() < 1e-6);
        assert_eq!(out[60], 1.0);
        assert!(out.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut mixer = SegmentMixer::new(100, 1, 1.0, 0.0);
        let a = mixer.add(SegmentMixer::prepare(request(constant_buffer(1.0, 10, 100), 0.0), 100, 1));
        let b = mixer.add(SegmentMixer::prepare(request(constant_buffer(1.0, 10, 100), 0.1), 100, 1));
        assert_eq!(mixer.active_count(), 2);

        assert!(mixer.remove(a));
        assert!(!mixer.remove(a));
        assert!(mixer.is_active(b));

        mixer.clear();
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn test_prepare_conforms_format() {
        let buffer = constant_buffer(0.25, 50, 50);
        let prepared = SegmentMixer::prepare(request(buffer, 0.0), 100, 2);
        assert_eq!(prepared.buffer.channels, 2);
        assert_eq!(prepared.buffer.sample_rate, 100);
        assert_eq!(prepared.play_frames, 100);
    }

    #[test]
    fn test_master_volume_scales_output() {
        let mut mixer = SegmentMixer::new(100, 1, 0.5, 0.0);
        mixer.add(SegmentMixer::prepare(request(constant_buffer(1.0, 10, 100), 0.0), 100, 1));
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(mixer.volume(), 0.5);
    }
}
