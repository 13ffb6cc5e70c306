//! The materialized configuration artifact.

use std::fmt;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use indexmap::IndexMap;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{Error, Result};

const SECTION: &str = "[options]";

/// The application may run as another user than the writer.
const FILE_MODE: u32 = 0o644;

/// Ordered option name to value mapping, rendered as an `[options]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    options: IndexMap<String, String>,
}

impl ConfigDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// Sets `key`, keeping its position if already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.options.insert(key.into(), value.into())
    }

    /// Renames `from` to `to` in place.
    ///
    /// If `to` is already present it is kept and `from` is dropped. Returns
    /// whether `from` was present.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        let Some((index, _, value)) = self.options.shift_remove_full(from) else {
            return false;
        };

        if !self.options.contains_key(to) {
            self.options.shift_insert(index, to.to_string(), value);
        }

        true
    }

    /// Iterates over the options in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether the document has no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Renders the document in the application's configuration format.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Atomically replaces the file at `path` with the rendered document.
    ///
    /// The file is world-readable so a de-privileged application can load it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file could not be written.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| Error::Io("failed to create config directory", e))?;

        let mut file =
            NamedTempFile::new_in(dir).map_err(|e| Error::Io("failed to create temp file", e))?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| Error::Io("failed to write config", e))?;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(FILE_MODE))
            .map_err(|e| Error::Io("failed to set config permissions", e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| Error::Io("failed to sync config", e))?;
        file.persist(path)
            .map_err(|e| Error::Io("failed to replace config file", e.error))?;

        info!("wrote {} options to {}", self.len(), path.display());

        Ok(())
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SECTION}")?;
        for (key, value) in &self.options {
            writeln!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigDocument {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            options: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_render() {
        let document: ConfigDocument = [("db_host", "db"), ("workers", "4")].into_iter().collect();

        assert_eq!(document.render(), "[options]\ndb_host = db\nworkers = 4\n");
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut document: ConfigDocument = [("a", "1"), ("old", "2"), ("c", "3")]
            .into_iter()
            .collect();

        assert!(document.rename("old", "new"));

        assert_eq!(
            document.iter().collect::<Vec<_>>(),
            vec![("a", "1"), ("new", "2"), ("c", "3")]
        );
    }

    #[test]
    fn test_rename_prefers_existing_target() {
        let mut document: ConfigDocument = [("old", "1"), ("new", "2")].into_iter().collect();

        assert!(document.rename("old", "new"));

        assert_eq!(document.iter().collect::<Vec<_>>(), vec![("new", "2")]);
    }

    #[test]
    fn test_rename_missing_key() {
        let mut document: ConfigDocument = [("a", "1")].into_iter().collect();

        assert!(!document.rename("old", "new"));
        assert_eq!(document.len(), 1);
    }

    #[test]
    fn test_write_to_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/app.conf");

        let first: ConfigDocument = [("workers", "2")].into_iter().collect();
        first.write_to(&path).unwrap();

        let second: ConfigDocument = [("workers", "5")].into_iter().collect();
        second.write_to(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "[options]\nworkers = 5\n"
        );
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_written_file_is_readable_by_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");

        let document: ConfigDocument = [("workers", "2")].into_iter().collect();
        document.write_to(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
