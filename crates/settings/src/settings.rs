use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const SETTINGS_VERSION: u32 = 1;

/// Directory under the workspace root holding tool state; never a collection.
pub const SETTINGS_DIR: &str = ".modelbench";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize settings {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            workspace: WorkspaceSettings::default(),
            batch: BatchSettings::default(),
            runner: RunnerSettings::default(),
        }
    }
}

impl Settings {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = SETTINGS_VERSION;
        }
        self.workspace.sanitize();
        self.runner.sanitize();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default = "default_collection")]
    pub default_collection: String,
    #[serde(default = "default_marker_file")]
    pub marker_file: String,
}

fn default_collection() -> String {
    "default".to_string()
}

fn default_marker_file() -> String {
    ".config".to_string()
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            default_collection: default_collection(),
            marker_file: default_marker_file(),
        }
    }
}

impl WorkspaceSettings {
    fn sanitize(&mut self) {
        let name = self.default_collection.replace(".xml", "");
        let name = name.trim();
        self.default_collection = if name.is_empty() || is_path_like(name) || name.starts_with('.')
        {
            default_collection()
        } else {
            name.to_string()
        };

        let marker = self.marker_file.trim();
        self.marker_file = if marker.is_empty() || is_path_like(marker) {
            default_marker_file()
        } else {
            marker.to_string()
        };
    }
}

fn is_path_like(name: &str) -> bool {
    name.contains(['/', '\\']) || name == "." || name == ".."
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Ask before continuing after each test.
    #[serde(default)]
    pub confirm_each_step: bool,
}

/// External interpreter command used by `modelbench run`.
/// （`modelbench run` 使用的外部直譯器指令。）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    15
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: None,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RunnerSettings {
    fn sanitize(&mut self) {
        if self
            .program
            .as_deref()
            .is_some_and(|program| program.trim().is_empty())
        {
            self.program = None;
        }
        if self.timeout_ms == Some(0) {
            self.timeout_ms = None;
        }
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = default_poll_interval();
        }
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 1_000);
    }
}

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            data: settings,
        }
    }

    /// Location of the settings file for the workspace rooted at `root`.
    /// （工作區設定檔的位置。）
    pub fn path_for(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(SETTINGS_DIR).join(SETTINGS_FILE)
    }

    pub fn load_for(root: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::load(Self::path_for(root))
    }

    /// Loads settings, falling back to defaults when the file is missing.
    /// （載入設定；檔案不存在時使用預設值。）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            let mut data = Settings::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn settings(&self) -> &Settings {
        &self.data
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), SettingsError>
    where
        F: FnMut(&mut Settings),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            SettingsError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| SettingsError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
