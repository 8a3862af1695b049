/// Pipeline call and throughput counters
/// Only updated when the `profiling` feature is enabled
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for the draw pipeline
pub struct FunctionCounters {
    // Geometry counters
    pub draw_calls: AtomicU64,
    pub vertices_shaded: AtomicU64,
    pub triangles_submitted: AtomicU64,
    pub triangles_clipped: AtomicU64,
    pub triangles_culled: AtomicU64,
    pub triangles_binned: AtomicU64,

    // Pixel counters
    pub batch_flushes: AtomicU64,
    pub tiles_tested: AtomicU64,
    pub tiles_shaded: AtomicU64,

    // Framebuffer counters
    pub framebuffer_clear_calls: AtomicU64,
}

impl FunctionCounters {
    pub const fn new() -> Self {
        Self {
            draw_calls: AtomicU64::new(0),
            vertices_shaded: AtomicU64::new(0),
            triangles_submitted: AtomicU64::new(0),
            triangles_clipped: AtomicU64::new(0),
            triangles_culled: AtomicU64::new(0),
            triangles_binned: AtomicU64::new(0),
            batch_flushes: AtomicU64::new(0),
            tiles_tested: AtomicU64::new(0),
            tiles_shaded: AtomicU64::new(0),
            framebuffer_clear_calls: AtomicU64::new(0),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.draw_calls.store(0, Ordering::Relaxed);
        self.vertices_shaded.store(0, Ordering::Relaxed);
        self.triangles_submitted.store(0, Ordering::Relaxed);
        self.triangles_clipped.store(0, Ordering::Relaxed);
        self.triangles_culled.store(0, Ordering::Relaxed);
        self.triangles_binned.store(0, Ordering::Relaxed);
        self.batch_flushes.store(0, Ordering::Relaxed);
        self.tiles_tested.store(0, Ordering::Relaxed);
        self.tiles_shaded.store(0, Ordering::Relaxed);
        self.framebuffer_clear_calls.store(0, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            draw_calls: self.draw_calls.load(Ordering::Relaxed),
            vertices_shaded: self.vertices_shaded.load(Ordering::Relaxed),
            triangles_submitted: self.triangles_submitted.load(Ordering::Relaxed),
            triangles_clipped: self.triangles_clipped.load(Ordering::Relaxed),
            triangles_culled: self.triangles_culled.load(Ordering::Relaxed),
            triangles_binned: self.triangles_binned.load(Ordering::Relaxed),
            batch_flushes: self.batch_flushes.load(Ordering::Relaxed),
            tiles_tested: self.tiles_tested.load(Ordering::Relaxed),
            tiles_shaded: self.tiles_shaded.load(Ordering::Relaxed),
            framebuffer_clear_calls: self.framebuffer_clear_calls.load(Ordering::Relaxed),
        }
    }
}

impl Default for FunctionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub draw_calls: u64,
    pub vertices_shaded: u64,
    pub triangles_submitted: u64,
    pub triangles_clipped: u64,
    pub triangles_culled: u64,
    pub triangles_binned: u64,
    pub batch_flushes: u64,
    pub tiles_tested: u64,
    pub tiles_shaded: u64,
    pub framebuffer_clear_calls: u64,
}

impl CounterSnapshot {
    /// Print formatted report
    pub fn print_report(&self) {
        println!("\n=== Performance Counters Report ===");
        println!("\nGeometry:");
        println!("  draw calls:                 {:12}", self.draw_calls);
        println!("  vertices shaded:            {:12}", self.vertices_shaded);
        println!("  triangles submitted:        {:12}", self.triangles_submitted);
        println!("  triangles clipped:          {:12}", self.triangles_clipped);
        println!("  triangles culled:           {:12}", self.triangles_culled);
        println!("  triangles binned:           {:12}", self.triangles_binned);

        println!("\nPixels:");
        println!("  batch flushes:              {:12}", self.batch_flushes);
        println!("  tiles tested:               {:12}", self.tiles_tested);
        println!("  tiles shaded:               {:12}", self.tiles_shaded);
        if self.tiles_tested > 0 {
            let pass_rate = (self.tiles_shaded as f64 / self.tiles_tested as f64) * 100.0;
            println!("  tile pass rate:             {:11.2}%", pass_rate);
        }

        println!("\nFramebuffer Operations:");
        println!("  framebuffer clear calls:    {:12}", self.framebuffer_clear_calls);

        println!();
    }
}

/// Global function counters instance
pub static FUNCTION_COUNTERS: FunctionCounters = FunctionCounters::new();

/// Macro for incrementing a counter (only when profiling feature is enabled)
#[macro_export]
macro_rules! count_call {
    ($counter:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Macro for adding to a counter (only when profiling feature is enabled)
#[macro_export]
macro_rules! count_add {
    ($counter:expr, $value:expr) => {
        #[cfg(feature = "profiling")]
        {
            $counter.fetch_add($value as u64, std::sync::atomic::Ordering::Relaxed);
        }
    };
}
