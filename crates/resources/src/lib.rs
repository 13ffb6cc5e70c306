//! Resource detection and auto-tuning for the supervised application.
//!
//! The detector reads the CPU and memory ceilings visible to the container
//! (cgroups v2, cgroups v1, then the host itself) and never fails. The profile
//! turns a reading into worker counts and memory limits, honouring any field
//! pinned by an override.
//!
//! # Example
//!
//! ```rust,no_run
//! use steward_resources::{
//!     CgroupDetector, Detector, ResourceOverrides, ResourceProfile, TuningBounds,
//! };
//!
//! let reading = CgroupDetector::default().detect();
//! let profile = ResourceProfile::derive(
//!     reading,
//!     &ResourceOverrides::default(),
//!     &TuningBounds::default(),
//! );
//!
//! println!("{} workers", profile.workers);
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod detector;
mod profile;

pub use detector::{
    CGROUP_ROOT, CgroupDetector, Detector, FALLBACK_RAM_BYTES, HostResources, ResourceReading,
};
pub use profile::{
    DEFAULT_MEM_SOFT_MAX_BYTES, DEFAULT_MEM_SOFT_MIN_BYTES, ResourceOverrides, ResourceProfile,
    TuningBounds, hard_limit_for,
};
