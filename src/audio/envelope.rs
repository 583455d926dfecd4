//! Gain automation for scheduled segments and the master output.

/// Linear gain ramp on the audio clock. Before `start` the gain is `from`,
/// after `start + duration` it is `to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainEnvelope {
    pub start: f64,
    pub duration: f64,
    pub from: f32,
    pub to: f32,
}

impl GainEnvelope {
    /// 0 → 1 over `duration` seconds from `start`
    pub fn fade_in(start: f64, duration: f64) -> Self {
        Self {
            start,
            duration,
            from: 0.0,
            to: 1.0,
        }
    }

    /// 1 → 0 over `duration` seconds from `start`
    pub fn fade_out(start: f64, duration: f64) -> Self {
        Self {
            start,
            duration,
            from: 1.0,
            to: 0.0,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Gain at audio-clock time `t`
    pub fn gain_at(&self, t: f64) -> f32 {
        if t <= self.start {
            return self.from;
        }
        if self.duration <= 0.0 || t >= self.end() {
            return self.to;
        }
        let position = ((t - self.start) / self.duration) as f32;
        self.from + (self.to - self.from) * position
    }
}

/// Master volume that approaches its target exponentially, so volume
/// changes never step within a single sample.
#[derive(Debug, Clone)]
pub struct VolumeRamp {
    current: f32,
    target: f32,
    time_constant: f64,
}

impl VolumeRamp {
    pub fn new(volume: f32, time_constant: f64) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        Self {
            current: volume,
            target: volume,
            time_constant: time_constant.max(0.0),
        }
    }

    pub fn set_target(&mut self, volume: f32, time_constant: f64) {
        self.target = volume.clamp(0.0, 1.0);
        self.time_constant = time_constant.max(0.0);
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Advance one frame and return the gain to apply to it
    pub fn next_gain(&mut self, sample_rate: u32) -> f32 {
        if self.current == self.target {
            return self.current;
        }
        if self.time_constant == 0.0 || sample_rate == 0 {
            self.current = self.target;
            return self.current;
        }
        let coeff = 1.0 - (-1.0 / (self.time_constant * sample_rate as f64)).exp();
        self.current += (self.target - self.current) * coeff as f32;
        if (self.target - self.current).abs() < 1e-5 {
            self.current = self.target;
        }
        self.current
    }
}
