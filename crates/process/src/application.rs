//! The supervised application as seen by the process layer.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, info, warn};

/// Regex pattern for matching application log lines.
///
/// `2024-05-01 10:00:00,123 42 INFO prod odoo.modules.loading: message`
static LOG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3} \d+ (\w+) (\S+) (.*)$")
        .expect("Invalid regex pattern")
});

/// Something the supervisor can launch.
pub trait SupervisedApplication: Send + Sync + 'static {
    /// Arguments passed to the executable.
    fn args(&self) -> Vec<String>;

    /// Extra environment variables.
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Path or name of the executable.
    fn executable(&self) -> &str;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// User to run as, if privileges should be dropped.
    fn user(&self) -> Option<&str> {
        None
    }

    /// Working directory, if any.
    fn working_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Handles a line of stdout.
    fn handle_stdout(&self, line: &str) {
        info!(app = self.name(), "{}", line);
    }

    /// Handles a line of stderr.
    fn handle_stderr(&self, line: &str) {
        warn!(app = self.name(), "{}", line);
    }
}

/// Options for configuring a `ServerApplication`.
#[derive(Clone, Debug)]
pub struct ServerApplicationOptions {
    /// Generated configuration file passed with `-c`.
    pub config_path: PathBuf,

    /// Environment variables added to the child's environment.
    pub env: Vec<(String, String)>,

    /// Executable to run.
    pub executable: String,

    /// Arguments appended after the configuration arguments.
    pub extra_args: Vec<String>,

    /// User to drop privileges to.
    pub user: Option<String>,
}

/// The long-running application server, started with a configuration file.
#[derive(Clone, Debug)]
pub struct ServerApplication {
    config_path: PathBuf,
    env: Vec<(String, String)>,
    executable: String,
    extra_args: Vec<String>,
    name: String,
    user: Option<String>,
}

impl ServerApplication {
    /// Creates a new `ServerApplication`.
    #[must_use]
    pub fn new(
        ServerApplicationOptions {
            config_path,
            env,
            executable,
            extra_args,
            user,
        }: ServerApplicationOptions,
    ) -> Self {
        let name = Path::new(&executable)
            .file_name()
            .map_or_else(|| executable.clone(), |n| n.to_string_lossy().to_string());

        Self {
            config_path,
            env,
            executable,
            extra_args,
            name,
            user,
        }
    }

    /// Returns a copy of this application with `args` appended, for one-shot
    /// maintenance invocations such as database initialization.
    #[must_use]
    pub fn with_extra_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut application = self.clone();
        application
            .extra_args
            .extend(args.into_iter().map(Into::into));
        application
    }

    /// The configuration file passed to the application.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl SupervisedApplication for ServerApplication {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config_path.to_string_lossy().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn env(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn handle_stdout(&self, line: &str) {
        if let Some(caps) = LOG_REGEX.captures(line) {
            let label = caps.get(1).map_or("UNKNOWN", |m| m.as_str());
            let db = caps.get(2).map_or("", |m| m.as_str());
            let message = caps.get(3).map_or(line, |m| m.as_str());
            match label {
                "DEBUG" | "DEBUG_RPC" | "DEBUG_SQL" => debug!(app = %self.name, db, "{}", message),
                "INFO" => info!(app = %self.name, db, "{}", message),
                "WARNING" => warn!(app = %self.name, db, "{}", message),
                "ERROR" | "CRITICAL" => error!(app = %self.name, db, "{}", message),
                _ => info!(app = %self.name, "{}", line),
            }
        } else {
            info!(app = %self.name, "{}", line);
        }
    }

    fn handle_stderr(&self, line: &str) {
        // The server logs to stderr by default.
        self.handle_stdout(line);
    }
}
