use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::stream::performance::PerformanceStats;

/// Everything the player reports to its host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    SongLoaded {
        url: String,
        duration: f64,
        total_chunks: usize,
    },
    ChunkLoaded {
        chunk_index: usize,
        size: usize,
    },
    ChunkError {
        chunk_index: usize,
        error: String,
    },
    BufferHealth {
        health: u8,
        chunks_ahead: usize,
    },
    Play,
    Pause,
    Stop,
    Seek {
        time: f64,
    },
    #[serde(rename = "timeupdate")]
    TimeUpdate {
        current_time: f64,
        duration: f64,
        progress: f64,
    },
    Ended,
    #[serde(rename = "volumechange")]
    VolumeChange {
        volume: f32,
    },
    PerformanceStats(PerformanceStats),
    /// A track load or playback start failed
    Error {
        message: String,
    },
}

impl PlayerEvent {
    /// Event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::SongLoaded { .. } => "songLoaded",
            PlayerEvent::ChunkLoaded { .. } => "chunkLoaded",
            PlayerEvent::ChunkError { .. } => "chunkError",
            PlayerEvent::BufferHealth { .. } => "bufferHealth",
            PlayerEvent::Play => "play",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Stop => "stop",
            PlayerEvent::Seek { .. } => "seek",
            PlayerEvent::TimeUpdate { .. } => "timeupdate",
            PlayerEvent::Ended => "ended",
            PlayerEvent::VolumeChange { .. } => "volumechange",
            PlayerEvent::PerformanceStats(_) => "performanceStats",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out of player events; slow subscribers lag rather than block the
/// player
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: PlayerEvent) {
        trace!("event {}", event.name());
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
