use std::io::Cursor;

use log::{debug, trace};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::ChunkDecoder;
use crate::error::DecodeError;
use crate::models::AudioBuffer;

/// Decodes in-memory payloads (whole files or byte ranges) with symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ChunkDecoder for SymphoniaDecoder {
    fn decode(&self, payload: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let media_source = MediaSourceStream::new(Box::new(Cursor::new(payload)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat {
                format: format!("{} ({})", extension.unwrap_or("unknown"), e),
            })?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::UnsupportedFormat {
                format: "no decodable audio track".to_string(),
            })?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecodeFailed(format!("Failed to create decoder: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => {
                    // A truncated range usually ends mid-packet
                    debug!("Stopping decode at unreadable packet: {}", err);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count() as u16;
                    sample_rate = spec.rate;

                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    if buf.capacity() < decoded.capacity() * spec.channels.count() {
                        *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    }
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    // Range payloads can start mid-frame; skip until the stream resyncs
                    trace!("Skipping undecodable packet: {}", err);
                }
                Err(err) => return Err(DecodeError::DecodeFailed(err.to_string())),
            }
        }

        if samples.is_empty() || channels == 0 || sample_rate == 0 {
            return Err(DecodeError::Empty);
        }

        Ok(AudioBuffer::from_samples(samples, channels, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal 16-bit PCM WAV file
    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let byte_rate = sample_rate * channels as u32 * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&(channels * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decode_wav_payload() {
        let pcm: Vec<i16> = (0..8000).map(|n| ((n % 100) as i16 - 50) * 100).collect();
        let decoder = SymphoniaDecoder::new();

        let buffer = decoder.decode(wav_bytes(&pcm, 1, 8000), Some("wav")).unwrap();
        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.sample_rate, 8000);
        assert_eq!(buffer.frames, 8000);
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
        assert!((buffer.samples[0] - (-5000.0 / 32768.0)).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stereo_is_interleaved() {
        let pcm: Vec<i16> = (0..400).map(|n| if n % 2 == 0 { 1000 } else { -1000 }).collect();
        let buffer = SymphoniaDecoder::new().decode(wav_bytes(&pcm, 2, 44_100), None).unwrap();

        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.frames, 200);
        assert!(buffer.samples[0] > 0.0);
        assert!(buffer.samples[1] < 0.0);
    }

    #[test]
    fn test_empty_payload() {
        assert!(matches!(SymphoniaDecoder::new().decode(Vec::new(), Some("mp3")), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let garbage = vec![0x5au8; 4096];
        assert!(SymphoniaDecoder::new().decode(garbage, Some("ogg")).is_err());
    }
}
