use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::PlayerEvent;

/// A player event as seen by the journal
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub event: PlayerEvent,
}

/// Journal of player events that mirrors them into the `log` facade
#[derive(Clone)]
pub struct StreamLogger {
    entries: Arc<Mutex<VecDeque<JournalEntry>>>,
    max_entries: usize,
}

impl Default for StreamLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("CHUNKSTREAM_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        match log_level.to_lowercase().as_str() {
            "trace" => builder.filter_level(log::LevelFilter::Trace),
            "debug" => builder.filter_level(log::LevelFilter::Debug),
            "info" => builder.filter_level(log::LevelFilter::Info),
            "warn" => builder.filter_level(log::LevelFilter::Warn),
            "error" => builder.filter_level(log::LevelFilter::Error),
            _ => builder.filter_level(log::LevelFilter::Info),
        };

        builder.try_init()?;

        info!("Chunkstream logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Journal an event and log it at a level matching its kind
    pub fn record(&self, event: &PlayerEvent) {
        {
            let mut entries = self.lock();
            entries.push_back(JournalEntry {
                timestamp: Utc::now(),
                event: event.clone(),
            });
            while entries.len() > self.max_entries {
                entries.pop_front();
            }
        }

        let name = event.name();
        match event {
            PlayerEvent::SongLoaded { url, duration, total_chunks } => {
                info!("[{}] {} ({:.1}s, {} chunks)", name, url, duration, total_chunks);
            }
            PlayerEvent::Play | PlayerEvent::Pause | PlayerEvent::Stop | PlayerEvent::Ended => {
                info!("[{}]", name);
            }
            PlayerEvent::Seek { time } => debug!("[{}] {:.2}s", name, time),
            PlayerEvent::VolumeChange { volume } => debug!("[{}] {:.2}", name, volume),
            PlayerEvent::ChunkLoaded { chunk_index, size } => {
                debug!("[{}] chunk {} ({} bytes)", name, chunk_index, size);
            }
            PlayerEvent::BufferHealth { health, chunks_ahead } => {
                if *health == 0 {
                    warn!("[{}] buffer empty ahead of playback", name);
                } else {
                    trace!("[{}] {}% ({} ahead)", name, health, chunks_ahead);
                }
            }
            PlayerEvent::TimeUpdate { current_time, duration, .. } => {
                trace!("[{}] {:.2}/{:.2}s", name, current_time, duration);
            }
            PlayerEvent::PerformanceStats(stats) => {
                debug!(
                    "[{}] loaded {} unloaded {} avg {:.1}ms memory {:.2}MB",
                    name,
                    stats.counters.chunks_loaded,
                    stats.counters.chunks_unloaded,
                    stats.counters.average_load_time_ms,
                    stats.memory_usage.mb
                );
            }
            PlayerEvent::ChunkError { chunk_index, error } => {
                warn!("[{}] chunk {}: {}", name, chunk_index, error);
            }
            PlayerEvent::Error { message } => error!("[{}] {}", name, message),
        }
    }

    /// Journal everything arriving on `events` until the bus goes away
    pub fn attach(&self, mut events: broadcast::Receiver<PlayerEvent>) -> JoinHandle<()> {
        let logger = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => logger.record(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event journal lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Get recent entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<JournalEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn statistics(&self) -> EventStatistics {
        let entries = self.lock();
        let mut stats = EventStatistics {
            total_events: entries.len(),
            ..EventStatistics::default()
        };

        for entry in entries.iter() {
            match entry.event {
                PlayerEvent::ChunkLoaded { .. } => stats.chunks_loaded += 1,
                PlayerEvent::ChunkError { .. } => stats.chunk_errors += 1,
                PlayerEvent::Seek { .. } => stats.seeks += 1,
                PlayerEvent::Error { .. } => stats.errors += 1,
                PlayerEvent::BufferHealth { health: 0, .. } => stats.buffer_starvations += 1,
                _ => {}
            }
        }
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<JournalEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Statistics about journaled events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub chunks_loaded: usize,
    pub chunk_errors: usize,
    pub seeks: usize,
    pub errors: usize,
    /// Health reports with nothing resident ahead
    pub buffer_starvations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn test_stream_logger_creation() {
        let logger = StreamLogger::new();
        assert_eq!(logger.max_entries, 1000);
        assert!(logger.recent(10).is_empty());
    }

    #[test]
    fn test_journal_limit() {
        let logger = StreamLogger::with_capacity(3);
        for i in 0..5 {
            logger.record(&PlayerEvent::Seek { time: i as f64 });
        }

        let entries = logger.recent(10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event, PlayerEvent::Seek { time: 2.0 });
        assert_eq!(entries[2].event, PlayerEvent::Seek { time: 4.0 });
        assert_eq!(logger.recent(1)[0].event, PlayerEvent::Seek { time: 4.0 });
    }

    #[test]
    fn test_event_statistics() {
        let logger = StreamLogger::new();
        logger.record(&PlayerEvent::ChunkLoaded { chunk_index: 0, size: 10 });
        logger.record(&PlayerEvent::ChunkLoaded { chunk_index: 1, size: 10 });
        logger.record(&PlayerEvent::ChunkError { chunk_index: 2, error: "HTTP 500".to_string() });
        logger.record(&PlayerEvent::BufferHealth { health: 0, chunks_ahead: 0 });
        logger.record(&PlayerEvent::Play);

        let stats = logger.statistics();
        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.chunks_loaded, 2);
        assert_eq!(stats.chunk_errors, 1);
        assert_eq!(stats.buffer_starvations, 1);
        assert_eq!(stats.seeks, 0);

        logger.clear();
        assert_eq!(logger.statistics(), EventStatistics::default());
    }

    #[tokio::test]
    async fn test_attach_journals_bus_events() {
        let bus = EventBus::new(16);
        let logger = StreamLogger::new();
        let handle = logger.attach(bus.subscribe());

        bus.emit(PlayerEvent::Play);
        bus.emit(PlayerEvent::Error { message: "blocked".to_string() });
        drop(bus);
        handle.await.unwrap();

        let stats = logger.statistics();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.errors, 1);
    }
}
