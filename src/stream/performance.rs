use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use sysinfo::{ProcessExt, System, SystemExt};

/// Cumulative streaming counters, shared by the loader, the buffer manager
/// and the stats tick
#[derive(Debug)]
pub struct PerformanceCounters {
    chunks_loaded: AtomicUsize,
    chunks_unloaded: AtomicUsize,
    total_bytes_loaded: AtomicU64,
    buffer_health: AtomicU8,
    // (average ms, sample count)
    load_time: Mutex<(f64, u64)>,
}

/// Serializable copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub chunks_loaded: usize,
    pub chunks_unloaded: usize,
    pub total_bytes_loaded: u64,
    pub average_load_time_ms: f64,
    pub buffer_health: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub bytes: u64,
    /// Megabytes rounded to two decimals
    pub mb: f64,
}

impl MemoryUsage {
    pub fn from_bytes(bytes: u64) -> Self {
        let mb = bytes as f64 / 1024.0 / 1024.0;
        Self {
            bytes,
            mb: (mb * 100.0).round() / 100.0,
        }
    }
}

/// Payload of the periodic stats event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// Payload bytes of resident chunks
    pub memory_usage: MemoryUsage,
    pub active_chunks: usize,
    /// Resident set size of the whole process, when the platform reports it
    pub process_memory: Option<u64>,
}

impl Default for PerformanceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self {
            chunks_loaded: AtomicUsize::new(0),
            chunks_unloaded: AtomicUsize::new(0),
            total_bytes_loaded: AtomicU64::new(0),
            buffer_health: AtomicU8::new(0),
            load_time: Mutex::new((0.0, 0)),
        }
    }

    /// Record a successful chunk load
    pub fn record_load(&self, bytes: usize, elapsed: Duration) {
        self.chunks_loaded.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_loaded.fetch_add(bytes as u64, Ordering::Relaxed);

        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut load_time = self.load_time.lock().unwrap_or_else(|p| p.into_inner());
        let samples = load_time.1 + 1;
        load_time.0 = (load_time.0 * (samples - 1) as f64 + ms) / samples as f64;
        load_time.1 = samples;
    }

    pub fn record_unload(&self, count: usize) {
        self.chunks_unloaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_buffer_health(&self, health: u8) {
        self.buffer_health.store(health.min(100), Ordering::Relaxed);
    }

    pub fn buffer_health(&self) -> u8 {
        self.buffer_health.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let average = self.load_time.lock().unwrap_or_else(|p| p.into_inner()).0;
        CounterSnapshot {
            chunks_loaded: self.chunks_loaded.load(Ordering::Relaxed),
            chunks_unloaded: self.chunks_unloaded.load(Ordering::Relaxed),
            total_bytes_loaded: self.total_bytes_loaded.load(Ordering::Relaxed),
            average_load_time_ms: average,
            buffer_health: self.buffer_health(),
        }
    }

    pub fn reset(&self) {
        self.chunks_loaded.store(0, Ordering::Relaxed);
        self.chunks_unloaded.store(0, Ordering::Relaxed);
        self.total_bytes_loaded.store(0, Ordering::Relaxed);
        self.buffer_health.store(0, Ordering::Relaxed);
        *self.load_time.lock().unwrap_or_else(|p| p.into_inner()) = (0.0, 0);
    }
}

/// Samples the resident memory of the current process
#[derive(Debug)]
pub struct ProcessMonitor {
    system: Mutex<System>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Resident set size in bytes
    pub fn resident_memory(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average_load_time() {
        let counters = PerformanceCounters::new();
        counters.record_load(1000, Duration::from_millis(100));
        counters.record_load(3000, Duration::from_millis(200));
        counters.record_load(2000, Duration::from_millis(300));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.chunks_loaded, 3);
        assert_eq!(snapshot.total_bytes_loaded, 6000);
        assert!((snapshot.average_load_time_ms - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_health_is_capped() {
        let counters = PerformanceCounters::new();
        counters.set_buffer_health(250);
        assert_eq!(counters.buffer_health(), 100);
    }

    #[test]
    fn test_reset_clears_counters() {
        let counters = PerformanceCounters::new();
        counters.record_load(10, Duration::from_millis(5));
        counters.record_unload(2);
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_memory_usage_rounding() {
        let usage = MemoryUsage::from_bytes(1_572_864);
        assert_eq!(usage.mb, 1.5);

        let usage = MemoryUsage::from_bytes(1_234_567);
        assert_eq!(usage.mb, 1.18);
    }

    #[test]
    fn test_stats_serialize_flat() {
        let stats = PerformanceStats {
            counters: CounterSnapshot::default(),
            memory_usage: MemoryUsage::from_bytes(0),
            active_chunks: 2,
            process_memory: None,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["active_chunks"], 2);
        assert_eq!(json["chunks_loaded"], 0);
    }

    #[test]
    fn test_process_monitor_reports_memory() {
        let monitor = ProcessMonitor::new();
        if let Some(rss) = monitor.resident_memory() {
            assert!(rss > 0);
        }
    }
}
