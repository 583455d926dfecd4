use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace, warn};

use crate::audio::{AudioOutput, GainEnvelope, SegmentId, SegmentRequest};
use crate::error::ChunkError;
use crate::stream::loader::{ChunkLoader, TrackContext};

/// A chunk placed on the output graph
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    pub chunk_index: usize,
    pub segment_id: SegmentId,
    /// Audio-clock time the segment was scheduled for
    pub start_time: f64,
    /// Audio-clock time the segment stops playing
    pub end_time: f64,
    /// Seconds skipped at the head of the chunk
    pub offset: f64,
    pub envelope: Option<GainEnvelope>,
}

#[derive(Debug, Default)]
struct RunState {
    generation: u64,
    active: bool,
    /// Track time the run started from
    start_position: f64,
    next_index: usize,
    next_start_time: f64,
    placed_in_run: usize,
    segments: Vec<ScheduledSegment>,
}

/// Places decoded chunks on the audio clock, back to back, one forward run
/// at a time.
///
/// A run begins at a track position and places chunks strictly in index
/// order. Starting a new run or cancelling bumps the generation, so a load
/// that resolves for a superseded run is never placed.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    loader: ChunkLoader,
    crossfade_duration: f64,
    run: Mutex<RunState>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, loader: ChunkLoader, crossfade_duration: f64) -> Self {
        Self {
            output,
            loader,
            crossfade_duration: crossfade_duration.max(0.0),
            run: Mutex::new(RunState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop whatever is scheduled and start a run at track `position`.
    /// The first chunk is placed at the current audio-clock time.
    pub fn begin_run(&self, track: &TrackContext, position: f64) -> u64 {
        let mut run = self.lock();
        self.stop_segments(&mut run);
        run.generation += 1;
        run.active = true;
        run.start_position = position;
        run.next_index = track.layout().chunk_index_at(position);
        run.next_start_time = self.output.current_time();
        run.placed_in_run = 0;
        debug!(
            "Run {} begins at {:.3}s (chunk {})",
            run.generation, position, run.next_index
        );
        run.generation
    }

    /// Stop every scheduled segment and invalidate the current run
    pub fn cancel(&self) {
        let mut run = self.lock();
        self.stop_segments(&mut run);
        run.generation += 1;
        run.active = false;
    }

    fn stop_segments(&self, run: &mut RunState) {
        for segment in run.segments.drain(..) {
            self.output.stop_segment(segment.segment_id);
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Next chunk the active run expects to place
    pub fn next_unscheduled(&self) -> Option<usize> {
        let run = self.lock();
        run.active.then_some(run.next_index)
    }

    pub fn is_scheduled(&self, index: usize) -> bool {
        self.lock().segments.iter().any(|s| s.chunk_index == index)
    }

    pub fn segment_count(&self) -> usize {
        self.lock().segments.len()
    }

    pub fn segments(&self) -> Vec<ScheduledSegment> {
        self.lock().segments.clone()
    }

    /// Load chunk `index` and place it after the previous segment of the run.
    ///
    /// Returns `Ok(None)` when the chunk is not the run's next index, or when
    /// the run was superseded while the load was pending.
    pub async fn schedule_chunk(
        &self,
        track: &Arc<TrackContext>,
        index: usize,
    ) -> Result<Option<ScheduledSegment>, ChunkError> {
        let generation = {
            let run = self.lock();
            if !run.active || run.next_index != index {
                trace!("Chunk {} is not next in run {}, skipping", index, run.generation);
                return Ok(None);
            }
            run.generation
        };

        let chunk = self.loader.load_chunk(track, index).await?;

        // The run may have moved on while the load was pending
        let mut run = self.lock();
        if run.generation != generation || !run.active || run.next_index != index {
            debug!("Discarding chunk {} resolved for superseded run {}", index, generation);
            return Ok(None);
        }

        let base_offset = if run.placed_in_run == 0 {
            (run.start_position - chunk.start_time).max(0.0)
        } else {
            0.0
        };
        let scheduled_start = run.next_start_time;
        let end_time = scheduled_start + (chunk.duration - base_offset).max(0.0);

        let envelope = (run.placed_in_run > 0 && self.crossfade_duration > 0.0)
            .then(|| GainEnvelope::fade_in(scheduled_start, self.crossfade_duration));

        run.next_index = index + 1;
        run.next_start_time = end_time;
        run.placed_in_run += 1;

        // A late placement skips what should already have played
        let now = self.output.current_time();
        let late = (now - scheduled_start).max(0.0);
        let offset = base_offset + late;
        let play_length = chunk.duration - offset;
        if play_length <= 0.0 {
            warn!("Chunk {} arrived after its slot ended, skipping it", index);
            return Ok(None);
        }

        let segment_id = match self.output.start_segment(SegmentRequest {
            buffer: Arc::clone(&chunk.buffer),
            when: scheduled_start + late,
            offset,
            duration: Some(play_length),
            envelope,
        }) {
            Ok(id) => id,
            Err(e) => {
                return Err(ChunkError::LoadFailed {
                    index,
                    reason: format!("could not schedule on the output: {}", e),
                });
            }
        };

        let segment = ScheduledSegment {
            chunk_index: index,
            segment_id,
            start_time: scheduled_start,
            end_time,
            offset: base_offset,
            envelope,
        };
        trace!(
            "Scheduled chunk {} at {:.3}s (offset {:.3}s, ends {:.3}s)",
            index, scheduled_start, base_offset, end_time
        );
        run.segments.push(segment.clone());
        Ok(Some(segment))
    }

    /// Schedule the opening chunks of the active run, up to `count`
    pub async fn schedule_initial(&self, track: &Arc<TrackContext>, count: usize) -> Result<usize, ChunkError> {
        let generation = self.generation();
        let mut placed = 0;
        for _ in 0..count {
            if self.generation() != generation {
                break;
            }
            let Some(index) = self.next_unscheduled() else { break };
            if !track.layout().contains(index) {
                break;
            }
            match self.schedule_chunk(track, index).await? {
                Some(_) => placed += 1,
                None if self.next_unscheduled() == Some(index + 1) => {}
                None => break,
            }
        }
        Ok(placed)
    }

    /// Forget segments the output has finished playing
    pub fn reap_finished(&self) -> Vec<ScheduledSegment> {
        let mut run = self.lock();
        let (finished, active): (Vec<_>, Vec<_>) = run
            .segments
            .drain(..)
            .partition(|s| !self.output.is_segment_active(s.segment_id));
        run.segments = active;
        finished
    }

    /// Whether the run has placed every chunk up to `total_chunks` and all
    /// of them have finished playing
    pub fn final_segment_finished(&self, total_chunks: usize) -> bool {
        let run = self.lock();
        run.active
            && run.placed_in_run > 0
            && run.next_index >= total_chunks
            && run.segments.iter().all(|s| !self.output.is_segment_active(s.segment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ChunkDecoder, OfflineOutput};
    use crate::error::{DecodeError, NetworkError};
    use crate::events::EventBus;
    use crate::models::{AudioBuffer, ByteRange, ChunkLayout};
    use crate::stream::performance::PerformanceCounters;
    use crate::stream::source::{ByteSource, RangeResponse};
    use async_trait::async_trait;

    /// One byte per frame at 100 Hz
    struct ByteDecoder;

    impl ChunkDecoder for ByteDecoder {
        fn decode(&self, payload: Vec<u8>, _extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
            Ok(AudioBuffer::from_samples(payload.into_iter().map(|b| b as f32 / 255.0).collect(), 1, 100))
        }
    }

    struct ConstSource(usize);

    #[async_trait]
    impl ByteSource for ConstSource {
        async fn content_length(&self, _url: &str) -> Result<Option<u64>, NetworkError> {
            Ok(Some(self.0 as u64))
        }

        async fn fetch_range(&self, _url: &str, range: ByteRange) -> Result<RangeResponse, NetworkError> {
            let end = (range.end as usize + 1).min(self.0);
            let len = end.saturating_sub(range.start as usize);
            Ok(RangeResponse { status: 206, body: vec![255; len] })
        }

        async fn fetch_all(&self, _url: &str) -> Result<Vec<u8>, NetworkError> {
            Ok(vec![255; self.0])
        }
    }

    fn setup(seconds: f64, crossfade: f64) -> (PlaybackScheduler, Arc<OfflineOutput>, Arc<TrackContext>) {
        let output = Arc::new(OfflineOutput::new(100, 1));
        output.resume().unwrap();
        let loader = ChunkLoader::new(
            Arc::new(ConstSource((seconds * 100.0) as usize)),
            Arc::new(ByteDecoder),
            Arc::new(PerformanceCounters::new()),
            EventBus::new(16),
        );
        let scheduler = PlaybackScheduler::new(output.clone(), loader, crossfade);
        let track = Arc::new(TrackContext::new("mem://a.raw", ChunkLayout::new(seconds, 3.0), 100));
        (scheduler, output, track)
    }

    #[tokio::test]
    async fn test_chunks_are_placed_back_to_back() {
        let (scheduler, output, track) = setup(9.0, 0.5);
        scheduler.begin_run(&track, 0.0);

        assert_eq!(scheduler.schedule_initial(&track, 3).await.unwrap(), 3);
        let segments = scheduler.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start_time, 0.0);
        assert_eq!(segments[1].start_time, 3.0);
        assert_eq!(segments[2].start_time, 6.0);
        assert_eq!(segments[2].end_time, 9.0);
        assert_eq!(output.active_segments(), 3);

        // First chunk of a run plays at full gain, later ones fade in
        assert!(segments[0].envelope.is_none());
        let fade = segments[1].envelope.unwrap();
        assert_eq!(fade.gain_at(3.0), 0.0);
        assert_eq!(fade.gain_at(3.5), 1.0);
    }

    #[tokio::test]
    async fn test_run_from_mid_chunk_uses_offset() {
        let (scheduler, _output, track) = setup(9.0, 0.0);
        scheduler.begin_run(&track, 4.0);
        let first = scheduler.schedule_chunk(&track, 1).await.unwrap().unwrap();
        assert_eq!(first.chunk_index, 1);
        assert!((first.offset - 1.0).abs() < 1e-9);
        assert!((first.end_time - 2.0).abs() < 1e-9);
        assert!(first.envelope.is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_and_duplicate_requests_are_ignored() {
        let (scheduler, _output, track) = setup(9.0, 0.0);
        scheduler.begin_run(&track, 0.0);

        assert!(scheduler.schedule_chunk(&track, 1).await.unwrap().is_none());
        assert!(scheduler.schedule_chunk(&track, 0).await.unwrap().is_some());
        assert!(scheduler.schedule_chunk(&track, 0).await.unwrap().is_none());
        assert_eq!(scheduler.segment_count(), 1);
        assert!(scheduler.is_scheduled(0));
        assert_eq!(scheduler.next_unscheduled(), Some(1));
    }

    #[tokio::test]
    async fn test_cancel_stops_segments_and_blocks_placement() {
        let (scheduler, output, track) = setup(9.0, 0.0);
        scheduler.begin_run(&track, 0.0);
        scheduler.schedule_initial(&track, 2).await.unwrap();
        assert_eq!(output.active_segments(), 2);

        scheduler.cancel();
        assert_eq!(output.active_segments(), 0);
        assert_eq!(scheduler.segment_count(), 0);
        assert!(scheduler.schedule_chunk(&track, 2).await.unwrap().is_none());
        assert_eq!(scheduler.next_unscheduled(), None);
    }

    #[tokio::test]
    async fn test_final_segment_detection() {
        let (scheduler, output, track) = setup(6.0, 0.0);
        scheduler.begin_run(&track, 0.0);
        scheduler.schedule_initial(&track, 5).await.unwrap();
        assert_eq!(scheduler.segment_count(), 2);
        assert!(!scheduler.final_segment_finished(2));

        output.advance(3.5);
        assert_eq!(scheduler.reap_finished().len(), 1);
        assert!(!scheduler.final_segment_finished(2));

        output.advance(3.0);
        assert!(scheduler.final_segment_finished(2));
    }

    #[tokio::test]
    async fn test_late_placement_skips_elapsed_audio() {
        let (scheduler, output, track) = setup(9.0, 0.0);
        scheduler.begin_run(&track, 0.0);
        output.advance(1.0);

        let segment = scheduler.schedule_chunk(&track, 0).await.unwrap().unwrap();
        assert_eq!(segment.start_time, 0.0);
        assert_eq!(segment.end_time, 3.0);
        output.advance(2.0);
        assert!(!output.is_segment_active(segment.segment_id));
    }
}
