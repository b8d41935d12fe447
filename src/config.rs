use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ProjectError;

fn default_coalesce_delay_ms() -> u64 {
    50
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_write_back() -> bool {
    true
}

/// Tuning knobs for a [`ProjectTree`](crate::tree::ProjectTree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// How long `Urgency::Later` requests are held back so bursts collapse into one job.
    #[serde(default = "default_coalesce_delay_ms")]
    pub coalesce_delay_ms: u64,
    /// Evaluation jobs allowed to run at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// When false the Writer computes edits but never writes them.
    #[serde(default = "default_write_back")]
    pub write_back: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            coalesce_delay_ms: default_coalesce_delay_ms(),
            max_workers: default_max_workers(),
            write_back: default_write_back(),
        }
    }
}

impl TreeConfig {
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }
}

/// Ambient settings captured by every evaluation job at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Shadow build root. `None` builds in the source tree.
    #[serde(default)]
    pub build_dir: Option<PathBuf>,
    /// Active configuration name, e.g. `debug` or `release`.
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default)]
    pub sysroot: Option<PathBuf>,
    /// Active platform scopes such as `unix` or `linux`.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl BuildContext {
    /// Scope names that hold before any `CONFIG` value is considered.
    pub fn active_scopes(&self) -> BTreeSet<String> {
        let mut active = self.scopes.clone();
        if let Some(configuration) = &self.configuration {
            active.insert(configuration.clone());
        }
        active
    }
}

/// On-disk configuration: `[tree]` and `[build]` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub build: BuildContext,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<ConfigFile, ProjectError> {
        tracing::debug!("Attempting to read configuration from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(ConfigFile::default());
        }
        let content = read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_toml(&self) -> Result<String, ProjectError> {
        Ok(toml::to_string(self)?)
    }
}

/// Source of the ambient build context. Changes are announced to the tree through
/// `ProjectTree::on_build_settings_changed`.
pub trait BuildSettingsProvider: Send + Sync {
    fn context(&self) -> BuildContext;
}

#[derive(Debug, Default)]
pub struct StaticBuildSettings {
    context: RwLock<BuildContext>,
}

impl StaticBuildSettings {
    pub fn new(context: BuildContext) -> Self {
        StaticBuildSettings {
            context: RwLock::new(context),
        }
    }

    pub fn set_context(&self, context: BuildContext) {
        *self.context.write() = context;
    }

    pub fn set_configuration(&self, configuration: impl Into<String>) {
        self.context.write().configuration = Some(configuration.into());
    }
}

impl BuildSettingsProvider for StaticBuildSettings {
    fn context(&self) -> BuildContext {
        self.context.read().clone()
    }
}

/// Build context read from the `[build]` table of a TOML file and kept until `reload`.
#[derive(Debug)]
pub struct TomlBuildSettings {
    path: PathBuf,
    context: RwLock<BuildContext>,
}

impl TomlBuildSettings {
    pub fn open(path: PathBuf) -> Result<Self, ProjectError> {
        let settings = TomlBuildSettings {
            path,
            context: RwLock::new(BuildContext::default()),
        };
        settings.reload()?;
        Ok(settings)
    }

    /// Re-read the file. Returns whether the context changed.
    pub fn reload(&self) -> Result<bool, ProjectError> {
        let loaded = ConfigFile::load(&self.path)?.build;
        let mut current = self.context.write();
        if *current == loaded {
            return Ok(false);
        }
        tracing::debug!("Build settings changed in {:?}", self.path);
        *current = loaded;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BuildSettingsProvider for TomlBuildSettings {
    fn context(&self) -> BuildContext {
        self.context.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load(&dir.path().join("prosync.toml")).unwrap();
        assert_eq!(config.tree.coalesce_delay_ms, 50);
        assert!(config.tree.write_back);
        assert!(config.tree.max_workers >= 1);
        assert_eq!(config.build, BuildContext::default());
    }

    #[test]
    fn partial_tables_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prosync.toml");
        std::fs::write(
            &path,
            "[tree]\nwrite_back = false\n\n[build]\nconfiguration = \"debug\"\nscopes = [\"unix\"]\n",
        )
        .unwrap();
        let config = ConfigFile::load(&path).unwrap();
        assert!(!config.tree.write_back);
        assert_eq!(config.tree.coalesce_delay_ms, 50);
        assert_eq!(
            config.build.active_scopes(),
            BTreeSet::from(["debug".to_string(), "unix".to_string()])
        );
    }

    #[test]
    fn toml_settings_report_changes_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prosync.toml");
        std::fs::write(&path, "[build]\nconfiguration = \"debug\"\n").unwrap();
        let settings = TomlBuildSettings::open(path.clone()).unwrap();
        assert_eq!(settings.context().configuration.as_deref(), Some("debug"));
        assert!(!settings.reload().unwrap());

        std::fs::write(&path, "[build]\nconfiguration = \"release\"\n").unwrap();
        assert!(settings.reload().unwrap());
        assert_eq!(settings.context().configuration.as_deref(), Some("release"));
    }
}
