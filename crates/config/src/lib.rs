//! Generates the supervised application's configuration file from declared
//! options and the detected resource profile.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod document;
mod error;
mod generator;
mod options;

pub use document::ConfigDocument;
pub use error::{Error, Result};
pub use generator::{
    ADDONS_PATH_KEY, CRON_THREADS_KEY, ConfigGenerator, GEVENT_PORT_KEY, GeneratorOptions,
    LEGACY_LONGPOLLING_PORT_KEY, MEM_HARD_KEY, MEM_SOFT_KEY, RENAME_MIN_MAJOR_VERSION, WORKERS_KEY,
    parse_major_version,
};
pub use options::{DeclaredOptions, EnvOptionSource, OptionSource};
