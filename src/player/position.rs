use crate::models::{ChunkLayout, PlaybackState};

/// Track position derived from the audio clock.
///
/// While playing, `position = clock - anchor`; otherwise the position is
/// frozen. Every start re-anchors, so resuming after a pause continues from
/// the frozen position regardless of how long the pause lasted.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    state: PlaybackState,
    position: f64,
    anchor: f64,
    layout: ChunkLayout,
    pause_clock: Option<f64>,
    last_seek_clock: f64,
}

impl PositionTracker {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: 0.0,
            anchor: 0.0,
            layout,
            pause_clock: None,
            last_seek_clock: 0.0,
        }
    }

    /// Forget everything and adopt a new track layout
    pub fn reset(&mut self, layout: ChunkLayout) {
        *self = Self::new(layout);
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    /// Begin (or resume) advancing from the frozen position
    pub fn start(&mut self, clock_now: f64) {
        self.anchor = clock_now - self.position;
        self.state = PlaybackState::Playing;
        self.pause_clock = None;
    }

    /// Freeze at the current position
    pub fn pause(&mut self, clock_now: f64) {
        self.position = self.current_position(clock_now);
        self.state = PlaybackState::Paused;
        self.pause_clock = Some(clock_now);
    }

    pub fn stop(&mut self) {
        self.position = 0.0;
        self.state = PlaybackState::Stopped;
        self.pause_clock = None;
    }

    /// Move to `time`, clamped to the track; returns the clamped position
    pub fn seek(&mut self, time: f64, clock_now: f64) -> f64 {
        self.position = self.layout.clamp_time(time);
        self.last_seek_clock = clock_now;
        if self.is_playing() {
            self.anchor = clock_now - self.position;
        }
        self.position
    }

    /// Current position in seconds, within `[0, duration]`
    pub fn current_position(&self, clock_now: f64) -> f64 {
        if self.is_playing() {
            self.layout.clamp_time(clock_now - self.anchor)
        } else {
            self.position
        }
    }

    /// Recompute and store the position from the clock
    pub fn sync(&mut self, clock_now: f64) -> f64 {
        self.position = self.current_position(clock_now);
        self.position
    }

    pub fn current_chunk(&self, clock_now: f64) -> usize {
        self.layout.chunk_index_at(self.current_position(clock_now))
    }

    pub fn progress(&self, clock_now: f64) -> f64 {
        if self.layout.duration > 0.0 {
            self.current_position(clock_now) / self.layout.duration
        } else {
            0.0
        }
    }

    pub fn is_finished(&self, clock_now: f64) -> bool {
        self.is_playing() && self.current_position(clock_now) >= self.layout.duration
    }

    /// Seconds spent paused so far
    pub fn paused_for(&self, clock_now: f64) -> Option<f64> {
        self.pause_clock.map(|at| (clock_now - at).max(0.0))
    }

    pub fn last_seek_clock(&self) -> f64 {
        self.last_seek_clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PositionTracker {
        PositionTracker::new(ChunkLayout::new(100.0, 30.0))
    }

    #[test]
    fn test_position_follows_clock_while_playing() {
        let mut tracker = tracker();
        tracker.start(10.0);
        assert_eq!(tracker.current_position(10.0), 0.0);
        assert_eq!(tracker.current_position(45.0), 35.0);
        assert_eq!(tracker.current_chunk(45.0), 1);
        assert_eq!(tracker.current_position(500.0), 100.0);
        assert!(tracker.is_finished(500.0));
    }

    #[test]
    fn test_pause_and_resume_keep_position() {
        let mut tracker = tracker();
        tracker.start(0.0);
        tracker.pause(20.0);
        assert!(tracker.is_paused());
        assert_eq!(tracker.current_position(80.0), 20.0);
        assert_eq!(tracker.paused_for(80.0), Some(60.0));

        tracker.start(80.0);
        assert_eq!(tracker.current_position(85.0), 25.0);
        assert_eq!(tracker.paused_for(85.0), None);
    }

    #[test]
    fn test_seek_clamps_and_reanchors() {
        let mut tracker = tracker();
        assert_eq!(tracker.seek(150.0, 0.0), 100.0);
        assert_eq!(tracker.seek(-5.0, 0.0), 0.0);

        tracker.start(0.0);
        tracker.seek(75.0, 10.0);
        assert_eq!(tracker.current_position(12.0), 77.0);
        assert_eq!(tracker.current_chunk(12.0), 2);
        assert_eq!(tracker.last_seek_clock(), 10.0);
    }

    #[test]
    fn test_stop_resets() {
        let mut tracker = tracker();
        tracker.start(0.0);
        tracker.sync(40.0);
        tracker.stop();
        assert_eq!(tracker.state(), PlaybackState::Stopped);
        assert_eq!(tracker.current_position(90.0), 0.0);
        assert_eq!(tracker.progress(90.0), 0.0);
    }
}
