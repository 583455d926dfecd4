pub mod position;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::{AudioOutput, ChunkDecoder, CpalOutput, SymphoniaDecoder};
use crate::config::PlayerConfig;
use crate::error::{AudioError, ChunkError, PlayerError};
use crate::events::{EventBus, PlayerEvent};
use crate::models::{
    estimate_duration, Chunk, ChunkLayout, PlaybackState, PlayerSnapshot, TrackInfo, TrackMetadata,
    DEFAULT_TRACK_DURATION,
};
use crate::stream::{
    BufferManager, ByteSource, ChunkLoader, HttpSource, MemoryUsage, PerformanceCounters, PerformanceStats,
    PlaybackScheduler, ProcessMonitor, ScheduledSegment, TickReport, TrackContext,
};

pub use position::PositionTracker;

/// Streaming music player that plays a remote track chunk by chunk.
///
/// Cheap to clone; clones share one player. Transport calls that await chunk
/// loads (`load_track`, `play`, `seek`) are async, the rest are immediate.
#[derive(Clone)]
pub struct ChunkedPlayer {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    config: PlayerConfig,
    output: Arc<dyn AudioOutput>,
    loader: ChunkLoader,
    scheduler: Arc<PlaybackScheduler>,
    buffer_manager: BufferManager,
    counters: Arc<PerformanceCounters>,
    monitor: ProcessMonitor,
    events: EventBus,
    state: Mutex<PlayerState>,
    tasks: Mutex<BackgroundTasks>,
    buffering: AtomicUsize,
    closed: AtomicBool,
}

struct PlayerState {
    track: Option<Arc<TrackContext>>,
    info: Option<TrackInfo>,
    position: PositionTracker,
    volume: f32,
    /// Bumped by every transport change that invalidates a pending resume
    transport_generation: u64,
    ended_emitted: bool,
}

#[derive(Default)]
struct BackgroundTasks {
    manage: Option<JoinHandle<()>>,
    progress: Option<JoinHandle<()>>,
    stats: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn abort_playback_loops(&mut self) {
        for handle in [self.manage.take(), self.progress.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_playback_loops();
        if let Some(handle) = self.stats.take() {
            handle.abort();
        }
    }
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        lock(&self.tasks).abort_all();
    }
}

/// Marks the player as buffering for as long as it lives
struct BufferingGuard<'a>(&'a AtomicUsize);

impl<'a> BufferingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BufferingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChunkedPlayer {
    /// Build a player on explicit collaborators
    pub fn new(
        config: PlayerConfig,
        output: Arc<dyn AudioOutput>,
        source: Arc<dyn ByteSource>,
        decoder: Arc<dyn ChunkDecoder>,
    ) -> Result<Self, PlayerError> {
        config.validate()?;
        if output.state() == crate::audio::OutputState::Closed {
            return Err(AudioError::InitializationFailed("audio output is closed".to_string()).into());
        }

        let events = EventBus::new(config.event_capacity);
        let counters = Arc::new(PerformanceCounters::new());
        let loader = ChunkLoader::new(source, decoder, Arc::clone(&counters), events.clone());
        let scheduler = Arc::new(PlaybackScheduler::new(
            Arc::clone(&output),
            loader.clone(),
            config.crossfade_duration,
        ));
        let buffer_manager = BufferManager::new(
            loader.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&counters),
            events.clone(),
            config.buffer_ahead,
            config.buffer_behind,
        );

        let volume = config.initial_volume.clamp(0.0, 1.0);
        output.set_volume(volume, 0.0);

        Ok(Self {
            inner: Arc::new(PlayerInner {
                output,
                loader,
                scheduler,
                buffer_manager,
                counters,
                monitor: ProcessMonitor::new(),
                events,
                state: Mutex::new(PlayerState {
                    track: None,
                    info: None,
                    position: PositionTracker::new(ChunkLayout::new(0.0, config.chunk_duration)),
                    volume,
                    transport_generation: 0,
                    ended_emitted: false,
                }),
                tasks: Mutex::new(BackgroundTasks::default()),
                buffering: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Player on the default (or configured) audio device, fetching over
    /// HTTP and decoding with symphonia
    pub fn with_default_output(config: PlayerConfig) -> Result<Self, PlayerError> {
        let output = CpalOutput::new(
            config.preferred_device.as_deref(),
            config.initial_volume,
            config.volume_time_constant,
        )?;
        let source = HttpSource::new()?;
        Self::new(config, Arc::new(output), Arc::new(source), Arc::new(SymphoniaDecoder::new()))
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn track_info(&self) -> Option<TrackInfo> {
        lock(&self.inner.state).info.clone()
    }

    pub fn is_buffering(&self) -> bool {
        self.inner.buffering.load(Ordering::SeqCst) > 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of segments currently placed on the output
    pub fn scheduled_segment_count(&self) -> usize {
        self.inner.scheduler.segment_count()
    }

    pub fn scheduled_segments(&self) -> Vec<ScheduledSegment> {
        self.inner.scheduler.segments()
    }

    /// Sorted indices of the chunks currently resident
    pub fn resident_chunks(&self) -> Vec<usize> {
        self.current_track()
            .map(|track| track.store().resident_indices())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<(), PlayerError> {
        if self.is_closed() {
            return Err(AudioError::Closed.into());
        }
        Ok(())
    }

    fn current_track(&self) -> Option<Arc<TrackContext>> {
        lock(&self.inner.state).track.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        self.inner.events.emit(event);
    }

    /// Load a track and preload its opening chunks.
    ///
    /// The new track is staged and only replaces the current one once the
    /// preload succeeded; on failure the player is left as it was.
    pub async fn load_track(&self, url: &str, metadata: Option<TrackMetadata>) -> Result<TrackInfo, PlayerError> {
        self.ensure_open()?;
        let metadata = metadata.unwrap_or_default();
        let _buffering = BufferingGuard::new(&self.inner.buffering);

        let (duration, exact_duration) = match metadata.duration {
            Some(duration) if duration.is_finite() && duration > 0.0 => (duration, true),
            _ => (self.estimate_track_duration(url).await, false),
        };

        let layout = ChunkLayout::new(duration, self.inner.config.chunk_duration);
        let staged = Arc::new(TrackContext::new(url, layout, self.inner.config.assumed_bytes_per_second));
        let preload = self.inner.config.preload_chunks.min(layout.total_chunks);

        info!(
            "Loading {} ({:.1}s{}, {} chunks, preloading {})",
            url,
            duration,
            if exact_duration { "" } else { " estimated" },
            layout.total_chunks,
            preload
        );

        if let Err(e) = self.inner.loader.load_many(&staged, 0..preload).await {
            let err = PlayerError::from(e);
            warn!("Failed to load {}: {}", url, err);
            self.emit(PlayerEvent::Error { message: err.to_string() });
            return Err(err);
        }
        self.ensure_open()?;

        let info = TrackInfo {
            url: url.to_string(),
            metadata,
            layout,
            exact_duration,
        };

        let previous = {
            let mut state = lock(&self.inner.state);
            let previous = state.track.replace(Arc::clone(&staged));
            state.info = Some(info.clone());
            state.position.reset(layout);
            state.transport_generation += 1;
            state.ended_emitted = false;
            previous
        };
        self.inner.scheduler.cancel();
        lock(&self.inner.tasks).abort_playback_loops();
        if let Some(previous) = previous {
            previous.store().clear();
        }
        self.start_stats_loop();

        self.emit(PlayerEvent::SongLoaded {
            url: info.url.clone(),
            duration: layout.duration,
            total_chunks: layout.total_chunks,
        });
        Ok(info)
    }

    /// Resolve chunk `index` of the current track, sharing a load already
    /// in flight
    pub async fn load_chunk(&self, index: usize) -> Result<Chunk, PlayerError> {
        let track = self.current_track().ok_or(ChunkError::NoTrack)?;
        Ok(self.inner.loader.load_chunk(&track, index).await?)
    }

    async fn estimate_track_duration(&self, url: &str) -> f64 {
        match self.inner.loader.source().content_length(url).await {
            Ok(Some(length)) if length > 0 => estimate_duration(length, url),
            Ok(_) => {
                debug!("No content length for {}, assuming {}s", url, DEFAULT_TRACK_DURATION);
                DEFAULT_TRACK_DURATION
            }
            Err(e) => {
                warn!("Could not read content length of {} ({}), assuming {}s", url, e, DEFAULT_TRACK_DURATION);
                DEFAULT_TRACK_DURATION
            }
        }
    }

    /// Start or resume playback. A no-op while already playing.
    pub async fn play(&self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        let track = self.current_track().ok_or(AudioError::NoTrack)?;
        if lock(&self.inner.state).position.is_playing() {
            return Ok(());
        }

        if let Err(e) = self.inner.output.resume() {
            warn!("Audio output did not resume: {}", e);
            self.emit(PlayerEvent::Error { message: e.to_string() });
            return Err(e.into());
        }

        let clock = self.inner.output.current_time();
        let (position, generation) = {
            let mut state = lock(&self.inner.state);
            if state.position.is_playing() {
                return Ok(());
            }
            if let Some(paused_for) = state.position.paused_for(clock) {
                debug!("Resuming after {:.2}s paused", paused_for);
            }
            state.position.start(clock);
            state.ended_emitted = false;
            state.transport_generation += 1;
            (state.position.current_position(clock), state.transport_generation)
        };

        self.inner.scheduler.begin_run(&track, position);
        {
            let _buffering = BufferingGuard::new(&self.inner.buffering);
            let count = self.inner.config.buffer_ahead + 1;
            if let Err(e) = self.inner.scheduler.schedule_initial(&track, count).await {
                // The management tick picks the run up again
                warn!("Initial scheduling stopped early: {}", e);
            }
        }

        if lock(&self.inner.state).transport_generation != generation {
            debug!("Playback start superseded while scheduling");
            return Ok(());
        }

        self.start_playback_loops();
        info!("Playing {} from {:.2}s", track.url(), position);
        self.emit(PlayerEvent::Play);
        Ok(())
    }

    /// Stop scheduled audio, keeping position and resident chunks
    pub fn pause(&self) {
        let clock = self.inner.output.current_time();
        {
            let mut state = lock(&self.inner.state);
            if !state.position.is_playing() {
                return;
            }
            state.position.pause(clock);
            state.transport_generation += 1;
        }
        self.halt_playback();
        debug!("Paused at {:.2}s", self.position());
        self.emit(PlayerEvent::Pause);
    }

    /// Stop playback, rewind to the start and drop resident chunks
    pub fn stop(&self) {
        let track = {
            let mut state = lock(&self.inner.state);
            state.position.stop();
            state.transport_generation += 1;
            state.track.clone()
        };
        self.halt_playback();
        if let Some(track) = track {
            track.store().clear();
        }
        self.emit(PlayerEvent::Stop);
    }

    fn halt_playback(&self) {
        self.inner.scheduler.cancel();
        lock(&self.inner.tasks).abort_playback_loops();
    }

    /// Jump to `time` (clamped to the track), preloading around the target
    /// and resuming if playback was active. Returns the clamped position.
    pub async fn seek(&self, time: f64) -> Result<f64, PlayerError> {
        self.ensure_open()?;
        let track = self.current_track().ok_or(AudioError::NoTrack)?;
        let clock = self.inner.output.current_time();

        let (was_playing, target, generation) = {
            let mut state = lock(&self.inner.state);
            let was_playing = state.position.is_playing();
            if was_playing {
                state.position.pause(clock);
            }
            let target = state.position.seek(time, clock);
            state.transport_generation += 1;
            (was_playing, target, state.transport_generation)
        };
        if was_playing {
            self.halt_playback();
        }

        let layout = *track.layout();
        let center = layout.chunk_index_at(target);
        let window = (layout.total_chunks > 0).then(|| {
            let first = center.saturating_sub(self.inner.config.buffer_behind);
            let last = (center + self.inner.config.buffer_ahead).min(layout.total_chunks - 1);
            (first, last)
        });
        if let Some((first, last)) = window {
            let _buffering = BufferingGuard::new(&self.inner.buffering);
            if let Err(e) = self.inner.loader.load_many(&track, first..=last).await {
                warn!("Preload around {:.2}s incomplete: {}", target, e);
            }
        }

        let still_current = lock(&self.inner.state).transport_generation == generation;
        if let (true, Some((first, last))) = (still_current, window) {
            let evicted = track.store().evict_outside(first, last);
            if evicted > 0 {
                self.inner.counters.record_unload(evicted);
                debug!("Evicted {} chunks outside seek window {}..={}", evicted, first, last);
            }
        }
        if was_playing && still_current {
            self.play().await?;
        }

        debug!("Seeked to {:.2}s (chunk {})", target, center);
        self.emit(PlayerEvent::Seek { time: target });
        Ok(target)
    }

    /// Set the master volume, clamped to `[0, 1]` and applied smoothly
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        lock(&self.inner.state).volume = volume;
        self.inner.output.set_volume(volume, self.inner.config.volume_time_constant);
        self.emit(PlayerEvent::VolumeChange { volume });
        volume
    }

    pub fn volume(&self) -> f32 {
        lock(&self.inner.state).volume
    }

    /// Current track position in seconds
    pub fn position(&self) -> f64 {
        let clock = self.inner.output.current_time();
        lock(&self.inner.state).position.current_position(clock)
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock(&self.inner.state).position.state()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let clock = self.inner.output.current_time();
        let state = lock(&self.inner.state);
        let layout = *state.position.layout();
        let current_time = state.position.current_position(clock);
        PlayerSnapshot {
            state: state.position.state(),
            current_time,
            current_chunk: layout.chunk_index_at(current_time),
            duration: layout.duration,
            total_chunks: layout.total_chunks,
            volume: state.volume,
            is_buffering: self.is_buffering(),
            last_seek_time: state.position.last_seek_clock(),
            track: state.info.clone(),
            performance: self.inner.counters.snapshot(),
        }
    }

    /// One buffer-management pass; `None` unless playing
    pub async fn tick_buffer(&self) -> Option<TickReport> {
        let clock = self.inner.output.current_time();
        let (track, current_chunk) = {
            let state = lock(&self.inner.state);
            if !state.position.is_playing() {
                return None;
            }
            (state.track.clone()?, state.position.current_chunk(clock))
        };
        Some(self.inner.buffer_manager.tick(&track, current_chunk).await)
    }

    /// Advance position bookkeeping, emit a time update and detect the end
    /// of the track
    pub fn update_progress(&self) {
        let clock = self.inner.output.current_time();
        let (current_time, duration, total_chunks) = {
            let mut state = lock(&self.inner.state);
            if !state.position.is_playing() {
                return;
            }
            let current_time = state.position.sync(clock);
            let layout = *state.position.layout();
            (current_time, layout.duration, layout.total_chunks)
        };

        self.inner.scheduler.reap_finished();
        let progress = if duration > 0.0 { current_time / duration } else { 0.0 };
        self.emit(PlayerEvent::TimeUpdate {
            current_time,
            duration,
            progress,
        });

        if current_time >= duration || self.inner.scheduler.final_segment_finished(total_chunks) {
            info!("Reached end of track at {:.2}s", current_time);
            self.stop();
            let first_end = {
                let mut state = lock(&self.inner.state);
                !std::mem::replace(&mut state.ended_emitted, true)
            };
            if first_end {
                self.emit(PlayerEvent::Ended);
            }
        }
    }

    /// Build and emit a performance report
    pub fn emit_stats(&self) -> PerformanceStats {
        let (memory, active_chunks) = match self.current_track() {
            Some(track) => (track.store().payload_bytes(), track.store().len()),
            None => (0, 0),
        };
        let stats = PerformanceStats {
            counters: self.inner.counters.snapshot(),
            memory_usage: MemoryUsage::from_bytes(memory),
            active_chunks,
            process_memory: self.inner.monitor.resident_memory(),
        };
        self.emit(PlayerEvent::PerformanceStats(stats.clone()));
        stats
    }

    /// Stop playback and release the track, its chunks and the cached
    /// full file. The player can load another track afterwards.
    pub fn unload(&self) {
        let had_track = lock(&self.inner.state).track.is_some();
        if had_track {
            self.stop();
        }
        lock(&self.inner.tasks).abort_all();
        let mut state = lock(&self.inner.state);
        state.track = None;
        state.info = None;
        state.position.reset(ChunkLayout::new(0.0, self.inner.config.chunk_duration));
        state.transport_generation += 1;
    }

    /// Unload and close the audio output; the player is unusable afterwards
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.unload();
        self.inner.output.close();
        info!("Player closed");
    }

    fn start_playback_loops(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut tasks = lock(&self.inner.tasks);
        tasks.abort_playback_loops();

        if let Some(period) = self.inner.config.manage_interval() {
            tasks.manage = Some(spawn_loop(weak.clone(), period, |player| async move {
                player.tick_buffer().await;
            }));
        }
        if let Some(period) = self.inner.config.progress_interval() {
            tasks.progress = Some(spawn_loop(weak, period, |player| async move {
                player.update_progress();
            }));
        }
    }

    fn start_stats_loop(&self) {
        let Some(period) = self.inner.config.stats_interval() else { return };
        let mut tasks = lock(&self.inner.tasks);
        if tasks.stats.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }
        tasks.stats = Some(spawn_loop(Arc::downgrade(&self.inner), period, |player| async move {
            player.emit_stats();
        }));
    }
}

/// Run `step` every `period` until the player is dropped or the task aborted
fn spawn_loop<F, Fut>(player: Weak<PlayerInner>, period: Duration, step: F) -> JoinHandle<()>
where
    F: Fn(ChunkedPlayer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = player.upgrade() else { break };
            step(ChunkedPlayer { inner }).await;
        }
    })
}
