use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::OnceCell;

use crate::audio::ChunkDecoder;
use crate::error::{ChunkError, DecodeError};
use crate::events::{EventBus, PlayerEvent};
use crate::models::{estimate_byte_range, url_extension, AudioBuffer, Chunk, ChunkLayout};
use crate::stream::performance::PerformanceCounters;
use crate::stream::source::ByteSource;
use crate::stream::store::{wait_for_load, ChunkStore, Claim};

/// Everything scoped to one loaded track: its layout, resident chunks and
/// the decoded full file once the range path has failed
pub struct TrackContext {
    url: String,
    layout: ChunkLayout,
    extension: Option<String>,
    assumed_bytes_per_second: u64,
    store: ChunkStore,
    full_audio: OnceCell<Arc<AudioBuffer>>,
}

impl TrackContext {
    pub fn new(url: impl Into<String>, layout: ChunkLayout, assumed_bytes_per_second: u64) -> Self {
        let url = url.into();
        let extension = url_extension(&url);
        Self {
            url,
            layout,
            extension,
            assumed_bytes_per_second,
            store: ChunkStore::new(),
            full_audio: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Whether the whole file has been fetched and decoded
    pub fn has_full_audio(&self) -> bool {
        self.full_audio.initialized()
    }
}

/// Fetches and decodes chunks. Cheap to clone; every load runs as its own
/// task so an abandoned caller never strands other waiters.
#[derive(Clone)]
pub struct ChunkLoader {
    source: Arc<dyn ByteSource>,
    decoder: Arc<dyn ChunkDecoder>,
    counters: Arc<PerformanceCounters>,
    events: EventBus,
}

impl ChunkLoader {
    pub fn new(
        source: Arc<dyn ByteSource>,
        decoder: Arc<dyn ChunkDecoder>,
        counters: Arc<PerformanceCounters>,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            decoder,
            counters,
            events,
        }
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Resolve chunk `index`, sharing any load already in flight
    pub async fn load_chunk(&self, track: &Arc<TrackContext>, index: usize) -> Result<Chunk, ChunkError> {
        if !track.layout.contains(index) {
            return Err(ChunkError::OutOfRange {
                index,
                total: track.layout.total_chunks,
            });
        }

        match track.store.claim(index) {
            Claim::Resident(chunk) => Ok(chunk),
            Claim::Pending(receiver) => wait_for_load(receiver, index).await,
            Claim::Owner { epoch, sender, receiver } => {
                let loader = self.clone();
                let task_track = Arc::clone(track);
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = loader.fetch_chunk(&task_track, index).await;
                    let stored = task_track.store.complete(epoch, index, &result);

                    match &result {
                        Ok(chunk) if stored => {
                            loader.counters.record_load(chunk.size_bytes, started.elapsed());
                            debug!(
                                "Loaded chunk {} ({} bytes, {:.1}s) in {:?}",
                                index,
                                chunk.size_bytes,
                                chunk.duration,
                                started.elapsed()
                            );
                            loader.events.emit(PlayerEvent::ChunkLoaded {
                                chunk_index: index,
                                size: chunk.size_bytes,
                            });
                        }
                        Ok(_) => debug!("Discarding chunk {} loaded before the store was cleared", index),
                        Err(e) => {
                            warn!("Failed to load chunk {}: {}", index, e);
                            loader.events.emit(PlayerEvent::ChunkError {
                                chunk_index: index,
                                error: e.to_string(),
                            });
                        }
                    }

                    sender.send_replace(Some(result));
                });

                wait_for_load(receiver, index).await
            }
        }
    }

    /// Start loading `index` without waiting for it
    pub fn prefetch(&self, track: &Arc<TrackContext>, index: usize) {
        let loader = self.clone();
        let track = Arc::clone(track);
        tokio::spawn(async move {
            if let Err(e) = loader.load_chunk(&track, index).await {
                debug!("Prefetch of chunk {} failed: {}", index, e);
            }
        });
    }

    /// Load several chunks concurrently; fails with the first error after
    /// every load has settled
    pub async fn load_many<I>(&self, track: &Arc<TrackContext>, indices: I) -> Result<(), ChunkError>
    where
        I: IntoIterator<Item = usize>,
    {
        let handles: Vec<_> = indices
            .into_iter()
            .map(|index| {
                let loader = self.clone();
                let track = Arc::clone(track);
                (index, tokio::spawn(async move { loader.load_chunk(&track, index).await }))
            })
            .collect();

        let mut first_error = None;
        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(ChunkError::Superseded { index }),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Range request first, whole-file slice on any failure
    async fn fetch_chunk(&self, track: &TrackContext, index: usize) -> Result<Chunk, ChunkError> {
        let layout = track.layout;
        let range = estimate_byte_range(index, layout.chunk_duration, track.assumed_bytes_per_second);

        match self.source.fetch_range(&track.url, range).await {
            Ok(response) if response.is_partial_content(range) => {
                let size_bytes = response.body.len();
                match self.decode(response.body, track.extension.clone()).await {
                    Ok(buffer) => {
                        return Ok(Chunk {
                            index,
                            start_time: layout.chunk_start(index),
                            duration: layout.chunk_span(index),
                            buffer: Arc::new(buffer),
                            size_bytes,
                        });
                    }
                    Err(e) => warn!("Range payload for chunk {} did not decode ({}), falling back to full file", index, e),
                }
            }
            Ok(response) if response.is_full_body(range) => {
                info!("Server ignored the range request for chunk {}, using the full body", index);
                let extension = track.extension.clone();
                let seeded = track
                    .full_audio
                    .get_or_try_init(|| async move { self.decode(response.body, extension).await.map(Arc::new) })
                    .await;
                if let Err(e) = seeded {
                    warn!("Full body for chunk {} did not decode: {}", index, e);
                }
            }
            Ok(response) => {
                warn!(
                    "Range request failed for chunk {} (HTTP {}), falling back to full file",
                    index, response.status
                );
            }
            Err(e) => warn!("Range request failed for chunk {} ({}), falling back to full file", index, e),
        }

        self.slice_from_full_file(track, index).await
    }

    async fn slice_from_full_file(&self, track: &TrackContext, index: usize) -> Result<Chunk, ChunkError> {
        let full = track
            .full_audio
            .get_or_try_init(|| async move {
                info!("Fetching full file for {}", track.url);
                let bytes = self.source.fetch_all(&track.url).await.map_err(|e| ChunkError::LoadFailed {
                    index,
                    reason: e.to_string(),
                })?;
                self.decode(bytes, track.extension.clone())
                    .await
                    .map(Arc::new)
                    .map_err(|e| ChunkError::LoadFailed {
                        index,
                        reason: e.to_string(),
                    })
            })
            .await?;

        let sample_rate = full.sample_rate as f64;
        let chunk_frames = (track.layout.chunk_duration * sample_rate).round() as usize;
        let start = (index as f64 * track.layout.chunk_duration * sample_rate).floor() as usize;
        let end = (start + chunk_frames).min(full.frames);
        if start >= end {
            return Err(ChunkError::LoadFailed {
                index,
                reason: format!("chunk starts past the end of the decoded audio ({} frames)", full.frames),
            });
        }

        let buffer = full.slice_frames(start, end);
        let frames = buffer.frames;
        Ok(Chunk {
            index,
            start_time: track.layout.chunk_start(index),
            duration: frames as f64 / sample_rate,
            size_bytes: frames * std::mem::size_of::<f32>() * buffer.channels as usize,
            buffer: Arc::new(buffer),
        })
    }

    async fn decode(&self, payload: Vec<u8>, extension: Option<String>) -> Result<AudioBuffer, DecodeError> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(payload, extension.as_deref()))
            .await
            .map_err(|e| DecodeError::DecodeFailed(format!("decode task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::models::ByteRange;
    use crate::stream::source::RangeResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Raw little-endian i16 mono at 8 kHz
    struct PcmDecoder;

    impl ChunkDecoder for PcmDecoder {
        fn decode(&self, payload: Vec<u8>, _extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
            if payload.len() < 2 {
                return Err(DecodeError::Empty);
            }
            let samples = payload
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect();
            Ok(AudioBuffer::from_samples(samples, 1, 8000))
        }
    }

    struct StaticSource {
        data: Vec<u8>,
        ranges: bool,
        range_calls: AtomicUsize,
        full_calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(seconds: usize, ranges: bool) -> Self {
            let data = (0..seconds * 8000)
                .flat_map(|n| ((n % 8000) as i16).to_le_bytes())
                .collect();
            Self {
                data,
                ranges,
                range_calls: AtomicUsize::new(0),
                full_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ByteSource for StaticSource {
        async fn content_length(&self, _url: &str) -> Result<Option<u64>, NetworkError> {
            Ok(Some(self.data.len() as u64))
        }

        async fn fetch_range(&self, _url: &str, range: ByteRange) -> Result<RangeResponse, NetworkError> {
            self.range_calls.fetch_add(1, Ordering::SeqCst);
            if !self.ranges {
                return Ok(RangeResponse { status: 416, body: Vec::new() });
            }
            let start = (range.start as usize).min(self.data.len());
            let end = (range.end as usize + 1).min(self.data.len());
            Ok(RangeResponse {
                status: 206,
                body: self.data[start..end].to_vec(),
            })
        }

        async fn fetch_all(&self, _url: &str) -> Result<Vec<u8>, NetworkError> {
            self.full_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }
    }

    fn setup(seconds: usize, ranges: bool) -> (ChunkLoader, Arc<StaticSource>, Arc<TrackContext>, EventBus) {
        let source = Arc::new(StaticSource::new(seconds, ranges));
        let events = EventBus::new(64);
        let loader = ChunkLoader::new(
            source.clone(),
            Arc::new(PcmDecoder),
            Arc::new(PerformanceCounters::new()),
            events.clone(),
        );
        let layout = ChunkLayout::new(seconds as f64, 2.0);
        let track = Arc::new(TrackContext::new("mem://track.pcm", layout, 16_000));
        (loader, source, track, events)
    }

    #[tokio::test]
    async fn test_range_load_populates_store() {
        let (loader, source, track, events) = setup(5, true);
        let mut rx = events.subscribe();

        let chunk = loader.load_chunk(&track, 1).await.unwrap();
        assert_eq!(chunk.start_time, 2.0);
        assert_eq!(chunk.duration, 2.0);
        assert_eq!(chunk.buffer.frames, 16_000);
        assert_eq!(chunk.size_bytes, 32_000);
        assert!(track.store().has(1));
        assert_eq!(source.full_calls.load(Ordering::SeqCst), 0);

        assert_eq!(rx.recv().await.unwrap(), PlayerEvent::ChunkLoaded { chunk_index: 1, size: 32_000 });
        assert_eq!(loader.counters.snapshot().chunks_loaded, 1);
    }

    #[tokio::test]
    async fn test_final_chunk_is_short() {
        let (loader, _source, track, _events) = setup(5, true);
        let chunk = loader.load_chunk(&track, 2).await.unwrap();
        assert_eq!(chunk.duration, 1.0);
        assert_eq!(chunk.buffer.frames, 8000);
    }

    #[tokio::test]
    async fn test_out_of_range_index() {
        let (loader, _source, track, _events) = setup(5, true);
        let err = loader.load_chunk(&track, 3).await.unwrap_err();
        assert!(matches!(err, ChunkError::OutOfRange { index: 3, total: 3 }));
    }

    #[tokio::test]
    async fn test_fallback_fetches_full_file_once() {
        let (loader, source, track, _events) = setup(5, false);

        let chunk0 = loader.load_chunk(&track, 0).await.unwrap();
        let chunk2 = loader.load_chunk(&track, 2).await.unwrap();
        assert!(track.has_full_audio());
        assert_eq!(source.full_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.range_calls.load(Ordering::SeqCst), 2);

        assert_eq!(chunk0.buffer.frames, 16_000);
        assert_eq!(chunk0.size_bytes, 16_000 * 4);
        assert_eq!(chunk2.duration, 1.0);
        assert_eq!(chunk2.buffer.samples[0], (32_000 % 8000) as f32 / 32768.0);
    }

    #[tokio::test]
    async fn test_load_many_reports_first_error() {
        let (loader, _source, track, _events) = setup(5, true);
        assert!(loader.load_many(&track, 0..3).await.is_ok());
        assert_eq!(track.store().resident_indices(), vec![0, 1, 2]);

        let err = loader.load_many(&track, [1, 7]).await.unwrap_err();
        assert_eq!(err.index(), Some(7));
    }
}
