//! Configuration loading.
//!
//! Settings live in `config.toml` inside the config directory, falling back to
//! `config.default.toml` and finally to built-in defaults. Relative paths in
//! the file resolve against the config directory.
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::frame::Styler;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "QUARRY_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const DEFAULT_CONFIG_FILE: &str = "config.default.toml";

/// Folders created by [`init_workspace`].
pub const WORKSPACE_FOLDERS: [&str; 3] = ["queries", "output", "data"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: BTreeMap<String, PathSpec>,
    #[serde(default)]
    pub credentials: BTreeMap<String, PathSpec>,
    #[serde(default)]
    pub sanity: BTreeMap<String, SanityDefaults>,
    #[serde(default)]
    pub quick_filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub report: ReportConfig,
    /// Directory the config file was read from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// A path entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
    Named(BTreeMap<String, String>),
}

/// Resolved paths, keeping the shape of the config entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Paths {
    One(PathBuf),
    Many(Vec<PathBuf>),
    Named(BTreeMap<String, PathBuf>),
}

impl Paths {
    pub fn into_vec(self) -> Vec<PathBuf> {
        match self {
            Paths::One(p) => vec![p],
            Paths::Many(ps) => ps,
            Paths::Named(map) => map.into_values().collect(),
        }
    }

    /// The first path, for entries that are expected to hold a single path.
    pub fn into_single(self) -> Result<PathBuf> {
        self.into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Config entry holds no paths"))
    }
}

/// Per-source defaults for the staleness check.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SanityDefaults {
    pub mutation_date_column: Option<String>,
    pub table: Option<String>,
    pub threshold_in_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub styler: Styler,
}

/// Which table of the config a path lookup reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTable {
    Paths,
    Credentials,
}

impl Config {
    /// Parse config text, resolving relative paths against `base_dir`.
    pub fn from_toml(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Invalid config file")?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quarry")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_dir())
    }

    /// Read `config.toml` from `dir`, or `config.default.toml` when absent.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut path = dir.join(CONFIG_FILE);
        if !path.exists() {
            path = dir.join(DEFAULT_CONFIG_FILE);
        }
        if !path.exists() {
            tracing::debug!("No config file in {}, using defaults", dir.display());
            return Ok(Config {
                base_dir: dir.to_path_buf(),
                ..Default::default()
            });
        }
        tracing::debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content, dir)
    }

    /// Resolve a path against the config directory and require it to exist.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.expand_path(path);
        if !path.exists() {
            bail!("Config: '{}' does not exist", path.display());
        }
        Ok(std::fs::canonicalize(&path).unwrap_or(path))
    }

    /// Expand `~` and anchor relative paths at the config directory without
    /// checking existence.
    pub fn expand_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let path = match path.strip_prefix("~") {
            Ok(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            Err(_) => path.to_path_buf(),
        };
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    fn table(&self, table: PathTable) -> &BTreeMap<String, PathSpec> {
        match table {
            PathTable::Paths => &self.paths,
            PathTable::Credentials => &self.credentials,
        }
    }

    /// Look up `key` in `table` and resolve every path it holds.
    ///
    /// Without `keep_shape` the result is always [`Paths::Many`]; with it a
    /// single string stays [`Paths::One`] and a table stays [`Paths::Named`].
    pub fn paths_from_config(&self, key: &str, table: PathTable, keep_shape: bool) -> Result<Paths> {
        let spec = self
            .table(table)
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Config: no entry '{}' in {:?}", key, table))?;
        let paths = match spec {
            PathSpec::Many(list) => Paths::Many(
                list.iter()
                    .map(|p| self.resolve_path(p))
                    .collect::<Result<_>>()?,
            ),
            PathSpec::Named(map) => {
                let resolved = map
                    .iter()
                    .map(|(k, p)| Ok((k.clone(), self.resolve_path(p)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                if keep_shape {
                    Paths::Named(resolved)
                } else {
                    Paths::Many(resolved.into_values().collect())
                }
            }
            PathSpec::One(p) => {
                let path = self.resolve_path(p)?;
                if keep_shape {
                    Paths::One(path)
                } else {
                    Paths::Many(vec![path])
                }
            }
        };
        Ok(paths)
    }

    /// Paths under `[paths]` that do not need to exist yet (output targets).
    pub fn target_path(&self, key: &str) -> Result<PathBuf> {
        match self.paths.get(key) {
            Some(PathSpec::One(p)) => Ok(self.expand_path(p)),
            Some(PathSpec::Many(list)) => list
                .first()
                .map(|p| self.expand_path(p))
                .ok_or_else(|| anyhow::anyhow!("Config: entry '{}' is empty", key)),
            Some(PathSpec::Named(_)) => bail!("Config: entry '{}' must be a single path", key),
            None => bail!("Config: no entry '{}' in paths", key),
        }
    }

    /// Query template folders; empty when not configured.
    pub fn query_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.paths.contains_key("queries") {
            return Ok(vec![]);
        }
        Ok(self
            .paths_from_config("queries", PathTable::Paths, false)?
            .into_vec())
    }

    /// Report template folders; empty when not configured.
    pub fn template_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.paths.contains_key("templates") {
            return Ok(vec![]);
        }
        Ok(self
            .paths_from_config("templates", PathTable::Paths, false)?
            .into_vec())
    }

    /// Load `<schema path>/<name>.json`.
    pub fn load_schema(&self, name: &str) -> Result<serde_json::Value> {
        let dir = self
            .paths_from_config("schema", PathTable::Paths, true)?
            .into_single()?;
        let file = dir.join(name).with_extension("json");
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read schema: {}", file.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid schema: {}", file.display()))
    }
}

/// Create the standard working folders under `dir`.
pub fn init_workspace(dir: &Path) -> Result<()> {
    for folder in WORKSPACE_FOLDERS {
        std::fs::create_dir_all(dir.join(folder))
            .with_context(|| format!("Failed to create {}", folder))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert!(config.paths.is_empty());
        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.report.styler, Styler::default());
    }

    #[test]
    fn test_falls_back_to_default_file() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), DEFAULT_CONFIG_FILE, "[paths]\noutput = \"out\"\n");
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.paths["output"], PathSpec::One("out".into()));
    }

    #[test]
    fn test_config_file_preferred_over_default() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), DEFAULT_CONFIG_FILE, "[paths]\noutput = \"default\"\n");
        write_config(dir.path(), CONFIG_FILE, "[paths]\noutput = \"custom\"\n");
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.paths["output"], PathSpec::One("custom".into()));
    }

    #[test]
    fn test_paths_keep_shape() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["a", "b"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }
        let config = Config::from_toml(
            "[paths]\none = \"a\"\nmany = [\"a\", \"b\"]\n[paths.named]\nfirst = \"a\"\nsecond = \"b\"\n",
            dir.path(),
        )
        .unwrap();

        let one = config.paths_from_config("one", PathTable::Paths, true).unwrap();
        assert!(matches!(one, Paths::One(_)));
        let one = config.paths_from_config("one", PathTable::Paths, false).unwrap();
        assert!(matches!(one, Paths::Many(ref v) if v.len() == 1));

        let many = config.paths_from_config("many", PathTable::Paths, true).unwrap();
        assert_eq!(many.into_vec().len(), 2);

        match config.paths_from_config("named", PathTable::Paths, true).unwrap() {
            Paths::Named(map) => {
                assert!(map["first"].ends_with("a"));
                assert!(map["second"].ends_with("b"));
            }
            other => panic!("Expected named paths, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_toml("[paths]\nqueries = \"nope\"\n", dir.path()).unwrap();
        let err = config
            .paths_from_config("queries", PathTable::Paths, false)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_unknown_key() {
        let config = Config::default();
        assert!(config
            .paths_from_config("missing", PathTable::Credentials, false)
            .is_err());
    }

    #[test]
    fn test_query_paths_empty_without_entry() {
        let config = Config::default();
        assert!(config.query_paths().unwrap().is_empty());
    }

    #[test]
    fn test_target_path_does_not_need_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_toml("[paths]\ntasks = \"tasks/task.json\"\n", dir.path()).unwrap();
        let path = config.target_path("tasks").unwrap();
        assert_eq!(path, dir.path().join("tasks/task.json"));
    }

    #[test]
    fn test_sanity_and_quick_filters() {
        let config = Config::from_toml(
            r#"
            [sanity.warehouse]
            table = "enrolments"
            threshold_in_hours = 4

            [quick_filters]
            warehouse = ["student_id", "course_id"]
            "#,
            ".",
        )
        .unwrap();
        let sanity = &config.sanity["warehouse"];
        assert_eq!(sanity.table.as_deref(), Some("enrolments"));
        assert_eq!(sanity.threshold_in_hours, Some(4));
        assert!(sanity.mutation_date_column.is_none());
        assert_eq!(config.quick_filters["warehouse"].len(), 2);
    }

    #[test]
    fn test_load_schema() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("schema")).unwrap();
        std::fs::write(
            dir.path().join("schema/warehouse.json"),
            r#"{"tables": ["a"]}"#,
        )
        .unwrap();
        let config = Config::from_toml("[paths]\nschema = \"schema\"\n", dir.path()).unwrap();
        let schema = config.load_schema("warehouse").unwrap();
        assert_eq!(schema["tables"][0], "a");
    }

    #[test]
    fn test_init_workspace_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_workspace(dir.path()).unwrap();
        init_workspace(dir.path()).unwrap();
        for folder in WORKSPACE_FOLDERS {
            assert!(dir.path().join(folder).is_dir());
        }
    }
}
