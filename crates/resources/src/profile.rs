//! Derivation of worker counts and memory limits from a resource reading.

use serde::Serialize;

use crate::detector::ResourceReading;

/// Default lower bound of the per-worker soft memory limit (512 MiB).
pub const DEFAULT_MEM_SOFT_MIN_BYTES: u64 = 512 * 1024 * 1024;

/// Default upper bound of the per-worker soft memory limit (2 GiB).
pub const DEFAULT_MEM_SOFT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

const MIN_WORKERS: u64 = 2;

/// Values that pin a single profile field and suppress its derivation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceOverrides {
    /// Pinned CPU count.
    pub cpu_count: Option<u64>,

    /// Pinned memory ceiling in bytes.
    pub ram_bytes: Option<u64>,

    /// Pinned number of HTTP workers.
    pub workers: Option<u64>,

    /// Pinned number of cron threads.
    pub cron_threads: Option<u64>,

    /// Pinned per-worker soft memory limit in bytes.
    pub mem_soft_bytes: Option<u64>,

    /// Pinned per-worker hard memory limit in bytes.
    pub mem_hard_bytes: Option<u64>,
}

/// Band the derived soft memory limit is clamped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TuningBounds {
    mem_soft_min: u64,
    mem_soft_max: u64,
}

impl Default for TuningBounds {
    fn default() -> Self {
        Self::new(DEFAULT_MEM_SOFT_MIN_BYTES, DEFAULT_MEM_SOFT_MAX_BYTES)
    }
}

impl TuningBounds {
    /// Creates a band, swapping the ends if given in the wrong order.
    #[must_use]
    pub const fn new(mem_soft_min: u64, mem_soft_max: u64) -> Self {
        if mem_soft_min <= mem_soft_max {
            Self {
                mem_soft_min,
                mem_soft_max,
            }
        } else {
            Self {
                mem_soft_min: mem_soft_max,
                mem_soft_max: mem_soft_min,
            }
        }
    }

    /// Lower bound in bytes.
    #[must_use]
    pub const fn mem_soft_min(&self) -> u64 {
        self.mem_soft_min
    }

    /// Upper bound in bytes.
    #[must_use]
    pub const fn mem_soft_max(&self) -> u64 {
        self.mem_soft_max
    }

    const fn clamp(&self, bytes: u64) -> u64 {
        if bytes < self.mem_soft_min {
            self.mem_soft_min
        } else if bytes > self.mem_soft_max {
            self.mem_soft_max
        } else {
            bytes
        }
    }
}

/// Tuning values computed from a detection pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceProfile {
    /// CPUs available to the container.
    pub cpu_count: u64,

    /// Memory ceiling in bytes.
    pub ram_bytes: u64,

    /// Number of HTTP worker processes.
    pub workers: u64,

    /// Number of cron threads (1 or 2 when derived).
    pub cron_threads: u64,

    /// Per-worker soft memory limit in bytes.
    pub mem_soft_bytes: u64,

    /// Per-worker hard memory limit in bytes.
    pub mem_hard_bytes: u64,
}

impl ResourceProfile {
    /// Derives a profile, letting every pinned field win over derivation.
    #[must_use]
    pub fn derive(
        reading: ResourceReading,
        overrides: &ResourceOverrides,
        bounds: &TuningBounds,
    ) -> Self {
        let cpu_count = overrides.cpu_count.unwrap_or(reading.cpu_count).max(1);
        let ram_bytes = overrides.ram_bytes.unwrap_or(reading.ram_bytes).max(1);

        let workers = overrides.workers.unwrap_or_else(|| {
            let by_cpu = cpu_count.saturating_mul(2).saturating_add(1);
            let by_ram = ram_bytes
                .checked_div(bounds.mem_soft_min())
                .unwrap_or(u64::MAX);
            by_cpu.min(by_ram).max(MIN_WORKERS)
        });

        let cron_threads = overrides
            .cron_threads
            .unwrap_or(if cpu_count <= 2 { 1 } else { 2 });

        let mem_soft_bytes = overrides.mem_soft_bytes.unwrap_or_else(|| {
            let budget = u128::from(ram_bytes) * 4 / 5;
            let share = budget / u128::from(workers.saturating_add(cron_threads).max(1));
            bounds.clamp(u64::try_from(share).unwrap_or(u64::MAX))
        });

        let mem_hard_bytes = overrides
            .mem_hard_bytes
            .unwrap_or_else(|| hard_limit_for(mem_soft_bytes));

        Self {
            cpu_count,
            ram_bytes,
            workers,
            cron_threads,
            mem_soft_bytes,
            mem_hard_bytes,
        }
    }
}

/// Hard limit matching a soft limit: `round(soft * 1.3)`, halves rounded up.
#[must_use]
pub fn hard_limit_for(mem_soft_bytes: u64) -> u64 {
    let hard = (u128::from(mem_soft_bytes) * 13 + 5) / 10;
    u64::try_from(hard).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn reading(cpu_count: u64, ram_bytes: u64) -> ResourceReading {
        ResourceReading {
            cpu_count,
            ram_bytes,
        }
    }

    #[test]
    fn test_four_cpus_eight_gib() {
        let profile = ResourceProfile::derive(
            reading(4, 8 * GIB),
            &ResourceOverrides::default(),
            &TuningBounds::default(),
        );

        assert_eq!(profile.workers, 9);
        assert_eq!(profile.cron_threads, 2);
        // 8 GiB * 0.8 / 11 is below the 2 GiB ceiling.
        assert_eq!(profile.mem_soft_bytes, 8 * GIB * 4 / 5 / 11);
        assert_eq!(profile.mem_hard_bytes, hard_limit_for(profile.mem_soft_bytes));
    }

    #[test]
    fn test_small_container_keeps_two_workers() {
        let profile = ResourceProfile::derive(
            reading(1, 512 * 1024 * 1024),
            &ResourceOverrides::default(),
            &TuningBounds::default(),
        );

        assert_eq!(profile.workers, 2);
        assert_eq!(profile.cron_threads, 1);
        assert_eq!(profile.mem_soft_bytes, DEFAULT_MEM_SOFT_MIN_BYTES);
    }

    #[test]
    fn test_overrides_pin_single_fields() {
        let overrides = ResourceOverrides {
            workers: Some(5),
            mem_soft_bytes: Some(GIB),
            ..ResourceOverrides::default()
        };

        let profile =
            ResourceProfile::derive(reading(16, 64 * GIB), &overrides, &TuningBounds::default());

        assert_eq!(profile.workers, 5);
        assert_eq!(profile.cron_threads, 2);
        assert_eq!(profile.mem_soft_bytes, GIB);
        assert_eq!(profile.mem_hard_bytes, hard_limit_for(GIB));
    }

    #[test]
    fn test_hard_override_is_not_derived() {
        let overrides = ResourceOverrides {
            mem_hard_bytes: Some(3 * GIB),
            ..ResourceOverrides::default()
        };

        let profile =
            ResourceProfile::derive(reading(2, 4 * GIB), &overrides, &TuningBounds::default());

        assert_eq!(profile.mem_hard_bytes, 3 * GIB);
    }

    #[test]
    fn test_pinned_cpu_drives_derivation() {
        let overrides = ResourceOverrides {
            cpu_count: Some(1),
            ..ResourceOverrides::default()
        };

        let profile =
            ResourceProfile::derive(reading(32, 64 * GIB), &overrides, &TuningBounds::default());

        assert_eq!(profile.cpu_count, 1);
        assert_eq!(profile.workers, 3);
        assert_eq!(profile.cron_threads, 1);
    }

    #[test]
    fn test_hard_limit_rounding() {
        assert_eq!(hard_limit_for(10), 13);
        assert_eq!(hard_limit_for(5), 7); // 6.5 rounds up
        assert_eq!(hard_limit_for(GIB), 1_395_864_371);
    }

    #[test]
    fn test_bounds_are_normalized() {
        let bounds = TuningBounds::new(2 * GIB, GIB);
        assert_eq!(bounds.mem_soft_min(), GIB);
        assert_eq!(bounds.mem_soft_max(), 2 * GIB);
    }

    proptest! {
        #[test]
        fn prop_soft_limit_within_band(
            cpu_count in 1u64..256,
            ram_bytes in 1u64..(1u64 << 42),
            min in (64u64 << 20)..(1u64 << 31),
            span in 0u64..(1u64 << 33),
        ) {
            let bounds = TuningBounds::new(min, min + span);
            let profile = ResourceProfile::derive(
                reading(cpu_count, ram_bytes),
                &ResourceOverrides::default(),
                &bounds,
            );

            prop_assert!(profile.mem_soft_bytes >= bounds.mem_soft_min());
            prop_assert!(profile.mem_soft_bytes <= bounds.mem_soft_max());
            prop_assert_eq!(profile.mem_hard_bytes, hard_limit_for(profile.mem_soft_bytes));
        }

        #[test]
        fn prop_at_least_two_workers(cpu_count in 0u64..1024, ram_bytes in 0u64..(1u64 << 42)) {
            let profile = ResourceProfile::derive(
                reading(cpu_count, ram_bytes),
                &ResourceOverrides::default(),
                &TuningBounds::default(),
            );

            prop_assert!(profile.workers >= 2);
            prop_assert!(profile.cron_threads == 1 || profile.cron_threads == 2);
        }
    }
}
