/*!
Format conformance for decoded chunks.

Chunks are decoded at whatever rate and channel layout the source file has,
while the output graph runs at the device rate. Before a segment is placed on
the graph its buffer is converted here:

```ignore
let conformed = conform_buffer(&decoded, 48_000, 2);
```

- `LinearResampler` converts whole interleaved buffers between sample rates
  using linear interpolation. Chunks are independent, so there is no
  streaming state; joins are masked by the crossfade instead.
- `remix_channels` up/down-mixes interleaved frames (mono ↔ stereo, generic
  copy-and-pad otherwise).
*/

use crate::models::AudioBuffer;

#[derive(Debug, Clone, Copy)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    step: f64, // source frames per output frame
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        let step = if dst_rate == 0 { 0.0 } else { src_rate as f64 / dst_rate as f64 };
        Self {
            src_rate,
            dst_rate,
            channels,
            step,
        }
    }

    pub fn config(&self) -> (u32, u32, usize) {
        (self.src_rate, self.dst_rate, self.channels)
    }

    /// Number of output frames produced for `in_frames` input frames
    pub fn output_frames(&self, in_frames: usize) -> usize {
        if self.src_rate == 0 || self.dst_rate == 0 {
            return 0;
        }
        ((in_frames as u128 * self.dst_rate as u128) / self.src_rate as u128) as usize
    }

    /// Resample interleaved f32 samples from src_rate to dst_rate
    pub fn process(&self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        if ch == 0 || self.step == 0.0 {
            return Vec::new();
        }
        let in_frames = input.len() / ch;
        if self.src_rate == self.dst_rate {
            return input[..in_frames * ch].to_vec();
        }
        let out_frames = self.output_frames(in_frames);
        let mut output = Vec::with_capacity(out_frames * ch);
        if in_frames == 0 {
            return output;
        }

        for n in 0..out_frames {
            let pos = n as f64 * self.step;
            let i0 = (pos.floor() as usize).min(in_frames - 1);
            let i1 = (i0 + 1).min(in_frames - 1);
            let frac = (pos - i0 as f64) as f32;
            for c in 0..ch {
                let a = input[i0 * ch + c];
                let b = input[i1 * ch + c];
                output.push(a + (b - a) * frac);
            }
        }

        output
    }

    pub fn process_audio_buffer(&self, input: &AudioBuffer) -> AudioBuffer {
        let samples = self.process(&input.samples);
        AudioBuffer::from_samples(samples, input.channels, self.dst_rate)
    }
}

/// Map interleaved frames onto a different channel count
pub fn remix_channels(input: &AudioBuffer, dst_channels: u16) -> AudioBuffer {
    let src_ch = input.channels as usize;
    let dst_ch = dst_channels as usize;
    if src_ch == dst_ch || src_ch == 0 {
        return input.clone();
    }

    let frames = input.frames;
    let src = &input.samples;
    let mut dst = Vec::with_capacity(frames * dst_ch);

    if dst_ch == 1 {
        // Downmix to mono by averaging channels
        for f in 0..frames {
            let acc: f32 = src[f * src_ch..(f + 1) * src_ch].iter().sum();
            dst.push(acc / src_ch as f32);
        }
    } else if src_ch == 1 {
        // Duplicate mono into every output channel
        for &s in src.iter().take(frames) {
            dst.extend(std::iter::repeat(s).take(dst_ch));
        }
    } else {
        // Copy available channels, pad with silence
        for f in 0..frames {
            for c in 0..dst_ch {
                dst.push(if c < src_ch { src[f * src_ch + c] } else { 0.0 });
            }
        }
    }

    AudioBuffer {
        samples: dst,
        channels: dst_channels,
        sample_rate: input.sample_rate,
        frames,
    }
}

/// Convert a buffer to the given rate and channel count
pub fn conform_buffer(input: &AudioBuffer, sample_rate: u32, channels: u16) -> AudioBuffer {
    let remixed = if input.channels != channels {
        remix_channels(input, channels)
    } else {
        input.clone()
    };
    if remixed.sample_rate == sample_rate {
        return remixed;
    }
    LinearResampler::new(remixed.sample_rate, sample_rate, channels as usize).process_audio_buffer(&remixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen_sine(f_hz: f32, sr: u32, frames: usize, ch: usize) -> Vec<f32> {
        let mut v = Vec::with_capacity(frames * ch);
        for n in 0..frames {
            let s = (2.0 * std::f32::consts::PI * f_hz * (n as f32) / sr as f32).sin();
            for _ in 0..ch {
                v.push(s);
            }
        }
        v
    }

    #[test]
    fn resample_length_mono_44k1_to_48k() {
        let input = gen_sine(440.0, 44_100, 44_100, 1);
        let rs = LinearResampler::new(44_100, 48_000, 1);
        let out = rs.process(&input);
        assert_eq!(out.len(), 48_000);
        assert!(out.iter().all(|s| s.abs() <= 1.0001));
    }

    #[test]
    fn resample_identity_is_copy() {
        let input = gen_sine(100.0, 8_000, 80, 2);
        let rs = LinearResampler::new(8_000, 8_000, 2);
        assert_eq!(rs.process(&input), input);
    }

    #[test]
    fn resample_interpolates_between_frames() {
        let rs = LinearResampler::new(1, 2, 1);
        let out = rs.process(&[0.0, 1.0]);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn remix_mono_to_stereo_and_back() {
        let mono = AudioBuffer::from_samples(vec![0.1, 0.2, 0.3], 1, 8_000);
        let stereo = remix_channels(&mono, 2);
        assert_eq!(stereo.samples, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
        assert_eq!(stereo.frames, 3);

        let back = remix_channels(&stereo, 1);
        assert_eq!(back.frames, 3);
        assert!((back.samples[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn conform_changes_rate_and_layout() {
        let mono = AudioBuffer::from_samples(gen_sine(50.0, 8_000, 8_000, 1), 1, 8_000);
        let out = conform_buffer(&mono, 16_000, 2);
        assert_eq!(out.channels, 2);
        assert_eq!(out.sample_rate, 16_000);
        assert_eq!(out.frames, 16_000);
        assert!((out.duration_secs() - mono.duration_secs()).abs() < 1e-9);
    }
}
