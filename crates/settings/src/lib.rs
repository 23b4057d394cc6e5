//! Persisted modelbench settings stored beside the workspace.
//! （儲存在工作區旁的 modelbench 設定。）

pub mod settings;

pub use settings::{
    BatchSettings, RunnerSettings, Settings, SettingsError, SettingsStore, WorkspaceSettings,
    SETTINGS_DIR, SETTINGS_FILE,
};
