//! The database service, seen as a list of logical database names.

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const MAINTENANCE_DATABASE: &str = "postgres";

const LIST_DATABASES_QUERY: &str = "SELECT datname FROM pg_database \
     WHERE NOT datistemplate AND datname <> 'postgres' ORDER BY datname";

/// A queryable database service.
#[async_trait]
pub trait DatabaseService: Send + Sync + 'static {
    /// Whether the service currently accepts connections.
    async fn is_ready(&self) -> bool;

    /// Every non-system logical database.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be queried.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Whether `name` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be queried.
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_databases().await?.iter().any(|db| db == name))
    }
}

/// Options for configuring `PsqlDatabaseService`.
#[derive(Clone, Debug, Default)]
pub struct PsqlDatabaseServiceOptions {
    /// Database host; the client default when unset.
    pub host: Option<String>,

    /// Database password, passed as `PGPASSWORD`.
    pub password: Option<String>,

    /// Database port.
    pub port: Option<u16>,

    /// Database user.
    pub user: Option<String>,
}

/// Talks to Postgres through the `psql` and `pg_isready` client tools.
#[derive(Clone, Debug)]
pub struct PsqlDatabaseService {
    host: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    user: Option<String>,
}

impl PsqlDatabaseService {
    /// Creates a new `PsqlDatabaseService`.
    #[must_use]
    pub fn new(
        PsqlDatabaseServiceOptions {
            host,
            password,
            port,
            user,
        }: PsqlDatabaseServiceOptions,
    ) -> Self {
        Self {
            host,
            password,
            port,
            user,
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);

        if let Some(host) = &self.host {
            cmd.arg("-h").arg(host);
        }
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(user) = &self.user {
            cmd.arg("-U").arg(user);
        }
        if let Some(password) = &self.password {
            cmd.env("PGPASSWORD", password);
        }

        cmd.arg("-d").arg(MAINTENANCE_DATABASE);
        cmd
    }
}

#[async_trait]
impl DatabaseService for PsqlDatabaseService {
    async fn is_ready(&self) -> bool {
        debug!("checking if the database service is ready");

        match self.command("pg_isready").output().await {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("failed to run pg_isready: {}", e);
                false
            }
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let output = self
            .command("psql")
            .arg("-At")
            .arg("-c")
            .arg(LIST_DATABASES_QUERY)
            .output()
            .await
            .map_err(|e| Error::Io("failed to run psql", e))?;

        parse_database_list(&output)
    }
}

fn parse_database_list(output: &Output) -> Result<Vec<String>> {
    if !output.status.success() {
        return Err(Error::Database(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
