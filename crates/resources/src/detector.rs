//! CPU and memory ceiling detection.
//!
//! Sources are tried in priority order and the first one that yields a usable
//! value wins. Missing files, unparsable content and "unlimited" sentinels all
//! fall through to the next source.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use sysinfo::System;
use tracing::{debug, trace};

/// Default mount point of the cgroup filesystem.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Memory assumed when no source reports a usable value (2 GiB).
pub const FALLBACK_RAM_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// cgroups v1 reports an unset memory limit as the largest page-aligned `i64`.
const CGROUP_V1_UNLIMITED: u64 = 0x7FFF_FFFF_FFFF_F000;

/// A single detection pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceReading {
    /// Number of CPUs the container may use.
    pub cpu_count: u64,

    /// Memory ceiling in bytes.
    pub ram_bytes: u64,
}

/// Anything that can report the resources available to the container.
pub trait Detector: Send + Sync + 'static {
    /// Returns the current reading. Never fails.
    fn detect(&self) -> ResourceReading;
}

/// Resources reported by the host, used when no cgroup limit applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostResources {
    /// Total host processors.
    pub cpu_count: u64,

    /// Total host memory, if it could be read.
    pub ram_bytes: Option<u64>,
}

impl HostResources {
    /// Reads the host processor count and total memory.
    #[must_use]
    pub fn probe() -> Self {
        let mut system = System::new();
        system.refresh_memory();

        let ram_bytes = Some(system.total_memory()).filter(|bytes| *bytes > 0);

        Self {
            cpu_count: num_cpus::get() as u64,
            ram_bytes,
        }
    }
}

/// Detector reading cgroup interface files under a configurable root.
#[derive(Clone, Debug)]
pub struct CgroupDetector {
    cgroup_root: PathBuf,
    host: Option<HostResources>,
}

impl Default for CgroupDetector {
    fn default() -> Self {
        Self::new(CGROUP_ROOT)
    }
}

impl CgroupDetector {
    /// Creates a detector reading cgroup files below `cgroup_root`.
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            host: None,
        }
    }

    /// Pins the host fallback values instead of probing the machine.
    #[must_use]
    pub const fn with_host(mut self, host: HostResources) -> Self {
        self.host = Some(host);
        self
    }

    fn host(&self) -> HostResources {
        self.host.unwrap_or_else(HostResources::probe)
    }

    fn read(&self, relative: &str) -> Option<String> {
        let path = self.cgroup_root.join(relative);
        match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                trace!("could not read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn cpu_v2_quota(&self) -> Option<u64> {
        let content = self.read("cpu.max")?;
        let mut parts = content.split_whitespace();
        let quota = parts.next()?;
        let period = parts.next().unwrap_or("100000");
        parse_quota(quota, period)
    }

    fn cpu_v2_cpuset(&self) -> Option<u64> {
        parse_cpuset(&self.read("cpuset.cpus.effective")?)
    }

    fn cpu_v1_quota(&self) -> Option<u64> {
        let quota = self.read("cpu/cpu.cfs_quota_us")?;
        let period = self.read("cpu/cpu.cfs_period_us")?;
        parse_quota(&quota, &period)
    }

    fn cpu_v1_cpuset(&self) -> Option<u64> {
        parse_cpuset(&self.read("cpuset/cpuset.cpus")?)
    }

    fn ram_v2(&self) -> Option<u64> {
        parse_memory(&self.read("memory.max")?)
    }

    fn ram_v1(&self) -> Option<u64> {
        parse_memory(&self.read("memory/memory.limit_in_bytes")?)
            .filter(|bytes| *bytes < CGROUP_V1_UNLIMITED)
    }

    fn detect_cpu(&self, host: &dyn Fn() -> HostResources) -> u64 {
        let sources: [(&str, fn(&Self) -> Option<u64>); 4] = [
            ("cgroup v2 cpu.max", Self::cpu_v2_quota),
            ("cgroup v2 cpuset", Self::cpu_v2_cpuset),
            ("cgroup v1 cfs quota", Self::cpu_v1_quota),
            ("cgroup v1 cpuset", Self::cpu_v1_cpuset),
        ];

        for (name, source) in sources {
            if let Some(count) = source(self) {
                debug!("cpu count {} from {}", count, name);
                return count;
            }
        }

        let count = host().cpu_count.max(1);
        debug!("cpu count {} from host", count);
        count
    }

    fn detect_ram(&self, host: &dyn Fn() -> HostResources) -> u64 {
        if let Some(bytes) = self.ram_v2() {
            debug!("memory ceiling {} from cgroup v2 memory.max", bytes);
            return bytes;
        }

        if let Some(bytes) = self.ram_v1() {
            debug!("memory ceiling {} from cgroup v1 limit", bytes);
            return bytes;
        }

        if let Some(bytes) = host().ram_bytes {
            debug!("memory ceiling {} from host", bytes);
            return bytes;
        }

        debug!("memory ceiling unknown, assuming {}", FALLBACK_RAM_BYTES);
        FALLBACK_RAM_BYTES
    }
}

impl Detector for CgroupDetector {
    fn detect(&self) -> ResourceReading {
        // Host probed at most once per pass, and only if a cgroup source is missing.
        let cached = std::cell::OnceCell::new();
        let host = || *cached.get_or_init(|| self.host());

        ResourceReading {
            cpu_count: self.detect_cpu(&host),
            ram_bytes: self.detect_ram(&host),
        }
    }
}

/// Ceil-divides a quota by its period. `max` and negative quotas mean unlimited.
pub(crate) fn parse_quota(quota: &str, period: &str) -> Option<u64> {
    let quota = u64::try_from(quota.trim().parse::<i64>().ok()?).ok()?;
    let period = u64::try_from(period.trim().parse::<i64>().ok()?).ok()?;
    if quota == 0 || period == 0 {
        return None;
    }

    Some(quota.div_ceil(period))
}

/// Counts the CPUs in a list such as `0-3,6,8-9`.
pub(crate) fn parse_cpuset(list: &str) -> Option<u64> {
    let list = list.trim();
    if list.is_empty() {
        return None;
    }

    let mut total = 0u64;
    for part in list.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start = start.trim().parse::<u64>().ok()?;
            let end = end.trim().parse::<u64>().ok()?;
            if end < start {
                return None;
            }
            total += end - start + 1;
        } else {
            part.parse::<u64>().ok()?;
            total += 1;
        }
    }

    Some(total).filter(|t| *t > 0)
}

fn parse_memory(value: &str) -> Option<u64> {
    if value == "max" {
        return None;
    }
    value.parse::<u64>().ok().filter(|bytes| *bytes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use tempfile::TempDir;

    const HOST: HostResources = HostResources {
        cpu_count: 16,
        ram_bytes: Some(64 * 1024 * 1024 * 1024),
    };

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn detector(dir: &TempDir) -> CgroupDetector {
        CgroupDetector::new(dir.path()).with_host(HOST)
    }

    #[test]
    fn test_quota_is_ceil_divided() {
        assert_eq!(parse_quota("150000", "100000"), Some(2));
        assert_eq!(parse_quota("200000", "100000"), Some(2));
        assert_eq!(parse_quota("50000", "100000"), Some(1));
        assert_eq!(parse_quota("max", "100000"), None);
        assert_eq!(parse_quota("-1", "100000"), None);
        assert_eq!(parse_quota("100000", "0"), None);
    }

    #[test]
    fn test_cpuset_lists() {
        assert_eq!(parse_cpuset("0-3"), Some(4));
        assert_eq!(parse_cpuset("0-3,6,8-9"), Some(7));
        assert_eq!(parse_cpuset("5"), Some(1));
        assert_eq!(parse_cpuset(""), None);
        assert_eq!(parse_cpuset("3-1"), None);
        assert_eq!(parse_cpuset("a-b"), None);
    }

    #[test]
    fn test_bare_host_falls_back_to_host_values() {
        let dir = TempDir::new().unwrap();
        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 16);
        assert_eq!(reading.ram_bytes, 64 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_host_memory_uses_fixed_fallback() {
        let dir = TempDir::new().unwrap();
        let reading = CgroupDetector::new(dir.path())
            .with_host(HostResources {
                cpu_count: 0,
                ram_bytes: None,
            })
            .detect();

        assert_eq!(reading.cpu_count, 1);
        assert_eq!(reading.ram_bytes, FALLBACK_RAM_BYTES);
    }

    #[test]
    fn test_cgroup_v2_limits_win() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpu.max", "250000 100000\n");
        write(dir.path(), "cpuset.cpus.effective", "0-7\n");
        write(dir.path(), "memory.max", "4294967296\n");

        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 3);
        assert_eq!(reading.ram_bytes, 4_294_967_296);
    }

    #[test]
    fn test_unlimited_v2_quota_falls_through_to_cpuset() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpu.max", "max 100000\n");
        write(dir.path(), "cpuset.cpus.effective", "0-1,4\n");
        write(dir.path(), "memory.max", "max\n");

        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 3);
        assert_eq!(reading.ram_bytes, HOST.ram_bytes.unwrap());
    }

    #[test]
    fn test_cgroup_v1_sources() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpu/cpu.cfs_quota_us", "300000\n");
        write(dir.path(), "cpu/cpu.cfs_period_us", "100000\n");
        write(dir.path(), "memory/memory.limit_in_bytes", "1073741824\n");

        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 3);
        assert_eq!(reading.ram_bytes, 1_073_741_824);
    }

    #[test]
    fn test_cgroup_v1_unset_sentinels_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpu/cpu.cfs_quota_us", "-1\n");
        write(dir.path(), "cpu/cpu.cfs_period_us", "100000\n");
        write(dir.path(), "cpuset/cpuset.cpus", "0-5\n");
        write(
            dir.path(),
            "memory/memory.limit_in_bytes",
            "9223372036854771712\n",
        );

        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 6);
        assert_eq!(reading.ram_bytes, HOST.ram_bytes.unwrap());
    }

    #[test]
    fn test_garbage_content_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpu.max", "lots\n");
        write(dir.path(), "cpuset.cpus.effective", "all\n");
        write(dir.path(), "memory.max", "plenty\n");

        let reading = detector(&dir).detect();

        assert_eq!(reading.cpu_count, 16);
        assert_eq!(reading.ram_bytes, HOST.ram_bytes.unwrap());
    }
}
