use std::sync::Arc;

use log::{debug, warn};

use crate::events::{EventBus, PlayerEvent};
use crate::stream::loader::{ChunkLoader, TrackContext};
use crate::stream::performance::PerformanceCounters;
use crate::stream::scheduler::PlaybackScheduler;

/// Outcome of one management pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Indices whose loads were started by this pass
    pub requested: Vec<usize>,
    pub scheduled: Option<usize>,
    pub evicted: usize,
    pub health: u8,
    pub chunks_ahead: usize,
    /// The run changed while this pass was scheduling; nothing was evicted
    pub superseded: bool,
}

/// Reconciles chunk residency with the playback cursor.
///
/// Each pass loads what is missing ahead, schedules the next chunk, evicts
/// what lies outside the window and reports buffer health. Failed loads are not retried
/// explicitly; they are simply missing again on the next pass.
pub struct BufferManager {
    loader: ChunkLoader,
    scheduler: Arc<PlaybackScheduler>,
    counters: Arc<PerformanceCounters>,
    events: EventBus,
    buffer_ahead: usize,
    buffer_behind: usize,
}

impl BufferManager {
    pub fn new(
        loader: ChunkLoader,
        scheduler: Arc<PlaybackScheduler>,
        counters: Arc<PerformanceCounters>,
        events: EventBus,
        buffer_ahead: usize,
        buffer_behind: usize,
    ) -> Self {
        Self {
            loader,
            scheduler,
            counters,
            events,
            buffer_ahead,
            buffer_behind,
        }
    }

    pub async fn tick(&self, track: &Arc<TrackContext>, current_chunk: usize) -> TickReport {
        let layout = *track.layout();
        let store = track.store();
        let window_end = current_chunk + self.buffer_ahead;
        let generation = self.scheduler.generation();
        let mut report = TickReport::default();

        // Load what is missing ahead of the cursor
        for index in current_chunk + 1..=window_end {
            if !layout.contains(index) {
                break;
            }
            if !store.has(index) && !store.is_loading(index) {
                self.loader.prefetch(track, index);
                report.requested.push(index);
            }
        }

        // Keep the next chunk of the run queued
        if let Some(next) = self.scheduler.next_unscheduled() {
            if next <= window_end && layout.contains(next) {
                match self.scheduler.schedule_chunk(track, next).await {
                    Ok(Some(_)) => report.scheduled = Some(next),
                    Ok(None) => {}
                    Err(e) => warn!("Could not schedule chunk {}: {}", next, e),
                }
            }
        }

        // A seek during the await moved the cursor
        if self.scheduler.generation() != generation {
            debug!("Run changed during pass at chunk {}, skipping eviction", current_chunk);
            report.superseded = true;
            return report;
        }

        // Drop what lies outside the window
        let keep_from = current_chunk.saturating_sub(self.buffer_behind);
        report.evicted = store.evict_outside(keep_from, window_end);
        if report.evicted > 0 {
            self.counters.record_unload(report.evicted);
            debug!("Evicted {} chunks outside {}..={}", report.evicted, keep_from, window_end);
        }

        report.chunks_ahead = (current_chunk + 1..=window_end).filter(|&i| store.has(i)).count();
        report.health = buffer_health(report.chunks_ahead, self.buffer_ahead);
        self.counters.set_buffer_health(report.health);
        self.events.emit(PlayerEvent::BufferHealth {
            health: report.health,
            chunks_ahead: report.chunks_ahead,
        });

        report
    }
}

/// Resident share of the look-ahead window as a rounded percentage
pub fn buffer_health(resident_ahead: usize, buffer_ahead: usize) -> u8 {
    if buffer_ahead == 0 {
        return 100;
    }
    let ratio = resident_ahead.min(buffer_ahead) as f64 / buffer_ahead as f64;
    (ratio * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_health_bounds() {
        assert_eq!(buffer_health(0, 2), 0);
        assert_eq!(buffer_health(1, 2), 50);
        assert_eq!(buffer_health(2, 2), 100);
        assert_eq!(buffer_health(1, 3), 33);
        assert_eq!(buffer_health(2, 3), 67);
        assert_eq!(buffer_health(5, 3), 100);
        assert_eq!(buffer_health(0, 0), 100);

        for ahead in 1..8 {
            for resident in 0..=ahead + 2 {
                assert!(buffer_health(resident, ahead) <= 100);
            }
        }
    }
}
