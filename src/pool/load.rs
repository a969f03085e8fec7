//! Host load probes consulted by the pool monitor.
//!
//! [`HostLoad`] is the narrow seam between the scaling logic and the machine:
//! [`SysinfoLoad`] reads real CPU and memory usage, [`FixedLoad`] returns values
//! set by the caller (tests, embedded use without `sysinfo` sampling).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use sysinfo::System;

/// One host load observation, in percent (`0.0..=100.0`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Source of host load samples.
pub trait HostLoad: Send + Sync + 'static {
    /// Takes a sample. Called once per monitor tick.
    fn sample(&self) -> LoadSample;
}

/// Host load read through `sysinfo`.
///
/// CPU usage is computed between consecutive refreshes, so the first sample
/// after construction may read low.
pub struct SysinfoLoad {
    system: Mutex<System>,
}

impl SysinfoLoad {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLoad for SysinfoLoad {
    fn sample(&self) -> LoadSample {
        let Ok(mut system) = self.system.lock() else {
            return LoadSample::default();
        };
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        LoadSample {
            cpu_percent: system.global_cpu_usage(),
            memory_percent,
        }
    }
}

/// Load probe returning caller-controlled values.
#[derive(Debug, Default)]
pub struct FixedLoad {
    cpu_bits: AtomicU32,
    memory_bits: AtomicU32,
}

impl FixedLoad {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            cpu_bits: AtomicU32::new(cpu_percent.to_bits()),
            memory_bits: AtomicU32::new(memory_percent.to_bits()),
        }
    }

    /// Changes the CPU percent reported by later samples.
    pub fn set_cpu(&self, cpu_percent: f32) {
        self.cpu_bits.store(cpu_percent.to_bits(), Ordering::Relaxed);
    }

    /// Changes the memory percent reported by later samples.
    pub fn set_memory(&self, memory_percent: f32) {
        self.memory_bits
            .store(memory_percent.to_bits(), Ordering::Relaxed);
    }
}

impl HostLoad for FixedLoad {
    fn sample(&self) -> LoadSample {
        LoadSample {
            cpu_percent: f32::from_bits(self.cpu_bits.load(Ordering::Relaxed)),
            memory_percent: f32::from_bits(self.memory_bits.load(Ordering::Relaxed)),
        }
    }
}
