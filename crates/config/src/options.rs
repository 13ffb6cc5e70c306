//! Sources of declared application options.

use indexmap::IndexMap;
use tracing::warn;

/// Ordered option name to value mapping.
pub type DeclaredOptions = IndexMap<String, String>;

/// Anything that can provide the declared options, in declaration order.
pub trait OptionSource: Send + Sync + 'static {
    /// Returns the declared options.
    fn options(&self) -> DeclaredOptions;
}

impl OptionSource for DeclaredOptions {
    fn options(&self) -> DeclaredOptions {
        self.clone()
    }
}

/// Reads options from environment variables carrying a reserved prefix.
///
/// `APP_OPT_DB_HOST=db` with prefix `APP_OPT_` declares `db_host = db`.
#[derive(Clone, Debug)]
pub struct EnvOptionSource {
    prefix: String,
    vars: Option<Vec<(String, String)>>,
}

impl EnvOptionSource {
    /// Creates a source reading the process environment on every call.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: None,
        }
    }

    /// Creates a source over a fixed set of variables.
    pub fn from_vars<K, V>(prefix: impl Into<String>, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn collect(&self, vars: impl Iterator<Item = (String, String)>) -> DeclaredOptions {
        vars.filter_map(|(name, value)| {
            let key = name.strip_prefix(&self.prefix)?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_lowercase(), value))
        })
        .collect()
    }
}

impl OptionSource for EnvOptionSource {
    fn options(&self) -> DeclaredOptions {
        match &self.vars {
            Some(vars) => self.collect(vars.iter().cloned()),
            None => self.collect(std::env::vars_os().filter_map(|(name, value)| {
                match (name.into_string(), value.into_string()) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    (name, _) => {
                        let name = name.unwrap_or_else(|n| n.to_string_lossy().into_owned());
                        if name.starts_with(&self.prefix) {
                            warn!("ignoring {} because it is not valid unicode", name);
                        }
                        None
                    }
                }
            })),
        }
    }
}
