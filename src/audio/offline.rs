use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::audio::mixer::{SegmentId, SegmentMixer, SegmentRequest};
use crate::audio::{AudioOutput, OutputState};
use crate::error::AudioError;

/// Headless output whose clock moves only when the host renders frames.
///
/// Used for deterministic playback in tests and for offline rendering.
#[derive(Debug)]
pub struct OfflineOutput {
    mixer: Mutex<SegmentMixer>,
    state: Mutex<OutputState>,
    resume_blocked: AtomicBool,
    started_segments: AtomicUsize,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self::with_volume(sample_rate, channels, 1.0, 0.0)
    }

    pub fn with_volume(sample_rate: u32, channels: u16, volume: f32, time_constant: f64) -> Self {
        Self {
            mixer: Mutex::new(SegmentMixer::new(sample_rate, channels, volume, time_constant)),
            state: Mutex::new(OutputState::Suspended),
            resume_blocked: AtomicBool::new(false),
            started_segments: AtomicUsize::new(0),
        }
    }

    /// Make `resume` fail, as a platform autoplay policy would
    pub fn set_resume_blocked(&self, blocked: bool) {
        self.resume_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Render `frames` frames; a suspended output yields silence and keeps
    /// its clock frozen
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut mixer = lock(&self.mixer);
        let mut out = vec![0.0f32; frames * mixer.channels() as usize];
        if self.state() == OutputState::Running {
            mixer.render(&mut out);
        }
        out
    }

    /// Advance the clock by `seconds`, discarding the audio
    pub fn advance(&self, seconds: f64) {
        if self.state() != OutputState::Running {
            return;
        }
        let mut mixer = lock(&self.mixer);
        let frames = (seconds.max(0.0) * mixer.sample_rate() as f64).round() as usize;
        mixer.advance(frames);
    }

    pub fn active_segments(&self) -> usize {
        lock(&self.mixer).active_count()
    }

    /// Total segments ever started on this output
    pub fn started_segments(&self) -> usize {
        self.started_segments.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        lock(&self.mixer).volume()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AudioOutput for OfflineOutput {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).current_time()
    }

    fn state(&self) -> OutputState {
        *lock(&self.state)
    }

    fn resume(&self) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        match *state {
            OutputState::Closed => Err(AudioError::Closed),
            OutputState::Running => Ok(()),
            OutputState::Suspended => {
                if self.resume_blocked.load(Ordering::SeqCst) {
                    return Err(AudioError::PlaybackBlocked("output resume was refused".to_string()));
                }
                *state = OutputState::Running;
                Ok(())
            }
        }
    }

    fn start_segment(&self, request: SegmentRequest) -> Result<SegmentId, AudioError> {
        if self.state() == OutputState::Closed {
            return Err(AudioError::Closed);
        }
        let (sample_rate, channels) = {
            let mixer = lock(&self.mixer);
            (mixer.sample_rate(), mixer.channels())
        };
        let prepared = SegmentMixer::prepare(request, sample_rate, channels);
        let id = lock(&self.mixer).add(prepared);
        self.started_segments.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn stop_segment(&self, id: SegmentId) {
        lock(&self.mixer).remove(id);
    }

    fn is_segment_active(&self, id: SegmentId) -> bool {
        lock(&self.mixer).is_active(id)
    }

    fn set_volume(&self, volume: f32, time_constant: f64) {
        lock(&self.mixer).set_volume(volume, time_constant);
    }

    fn sample_rate(&self) -> u32 {
        lock(&self.mixer).sample_rate()
    }

    fn close(&self) {
        *lock(&self.state) = OutputState::Closed;
        lock(&self.mixer).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioBuffer;
    use std::sync::Arc;

    #[test]
    fn test_clock_frozen_while_suspended() {
        let output = OfflineOutput::new(1000, 1);
        output.advance(1.0);
        assert_eq!(output.current_time(), 0.0);
        assert_eq!(output.state(), OutputState::Suspended);

        output.resume().unwrap();
        output.advance(1.5);
        assert!((output.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_blocked_resume() {
        let output = OfflineOutput::new(1000, 1);
        output.set_resume_blocked(true);
        assert!(matches!(output.resume(), Err(AudioError::PlaybackBlocked(_))));

        output.set_resume_blocked(false);
        assert!(output.resume().is_ok());
    }

    #[test]
    fn test_segment_lifecycle() {
        let output = OfflineOutput::new(1000, 1);
        output.resume().unwrap();

        let buffer = Arc::new(AudioBuffer::from_samples(vec![1.0; 500], 1, 1000));
        let id = output
            .start_segment(SegmentRequest {
                buffer,
                when: 0.0,
                offset: 0.0,
                duration: None,
                envelope: None,
            })
            .unwrap();
        assert!(output.is_segment_active(id));
        assert_eq!(output.started_segments(), 1);

        let audio = output.render(250);
        assert!(audio.iter().all(|&s| s == 1.0));

        output.advance(0.25);
        assert!(!output.is_segment_active(id));
        assert_eq!(output.active_segments(), 0);
    }

    #[test]
    fn test_closed_output_rejects_work() {
        let output = OfflineOutput::new(1000, 2);
        output.close();
        assert_eq!(output.state(), OutputState::Closed);
        assert!(matches!(output.resume(), Err(AudioError::Closed)));
    }
}
