use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use modelbench_memo::TestMemoCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{EventBus, StoreEvent};
use crate::lock::{self, LockSet};
use crate::naming::{
    ensure_model_extension, normalize_collection_name, unique_collection_name,
    unique_model_name, MODEL_EXTENSION,
};
use crate::record::ModelRecord;
use crate::util::{remove_path, touch_if_missing, write_atomic};

/// Collection store shared between the UI thread and the batch thread.
pub type SharedStore = Arc<Mutex<CollectionStore>>;

/// Errors reported by [`CollectionStore`] operations.
/// [`CollectionStore`] 操作回報的錯誤。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection {0} already exists")]
    DuplicateCollection(String),
    #[error("collection {0} is reserved and cannot be changed")]
    ReservedCollection(String),
    #[error("collection {0} not found")]
    CollectionNotFound(String),
    #[error("model {0} not found")]
    ModelNotFound(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("workspace IO error: {0}")]
    Io(#[from] io::Error),
}

/// Layout options of a workspace.
/// 工作區的配置選項。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub default_collection: String,
    pub marker_file: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_collection: "default".to_string(),
            marker_file: ".config".to_string(),
        }
    }
}

/// Editor-side content of the current model, flushed on every model switch.
/// 目前模型在編輯器中的內容，切換模型時寫回紀錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveContent {
    pub xml: String,
    pub modified: bool,
}

impl LiveContent {
    pub fn new(xml: impl Into<String>, modified: bool) -> Self {
        Self {
            xml: xml.into(),
            modified,
        }
    }
}

/// Owns collections, model records and the current-model pointer, keeping
/// them in step with the directory tree under the workspace root.
/// 管理收藏、模型紀錄與目前模型，並與工作區目錄保持一致。
#[derive(Debug)]
pub struct CollectionStore {
    root: PathBuf,
    options: StoreOptions,
    collections: BTreeSet<String>,
    models: BTreeMap<String, ModelRecord>,
    current: Option<String>,
    locks: Option<LockSet>,
    memo: Arc<TestMemoCache>,
    events: EventBus,
}

impl CollectionStore {
    /// Opens (or initialises) the workspace rooted at `root` and locks it.
    /// 開啟或初始化工作區並加以鎖定。
    pub fn open(
        root: impl AsRef<Path>,
        options: StoreOptions,
        memo: Arc<TestMemoCache>,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut store = Self {
            root,
            options,
            collections: BTreeSet::new(),
            models: BTreeMap::new(),
            current: None,
            locks: None,
            memo,
            events: EventBus::default(),
        };

        let default = store.options.default_collection.clone();
        let default_dir = store.collection_dir(&default);
        fs::create_dir_all(&default_dir)?;
        touch_if_missing(&store.marker_path(&default))?;
        store.load_existing()?;
        store.collections.insert(default);

        store.locks = lock::lock_directory(&store.root);
        if store.locks.is_none() {
            warn!(root = %store.root.display(), "workspace could not be locked; continuing unlocked");
        }
        Ok(store)
    }

    fn load_existing(&mut self) -> Result<(), StoreError> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !dir.join(&self.options.marker_file).is_file() {
                continue;
            }
            let collection = name.to_string();
            let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();

            for path in files {
                let Some(model) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if !model.ends_with(MODEL_EXTENSION) {
                    continue;
                }
                if self.model_name_taken(model) {
                    warn!(path = %path.display(), "skipping model whose name is already used");
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(xml) => {
                        let record = ModelRecord::new(model, collection.as_str(), xml, &path);
                        self.models.insert(model.to_string(), record);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable model")
                    }
                }
            }
            self.collections.insert(collection);
        }
        debug!(
            collections = self.collections.len(),
            models = self.models.len(),
            "workspace loaded"
        );
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn memo(&self) -> &Arc<TestMemoCache> {
        &self.memo
    }

    pub fn is_locked(&self) -> bool {
        self.locks.is_some()
    }

    /// Registers a new subscriber for mutation events.
    /// 註冊新的異動事件訂閱者。
    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Releases the workspace lock; the store stays usable but unprotected.
    pub fn close(&mut self) {
        if let Some(set) = self.locks.take() {
            if !lock::unlock(set) {
                warn!(root = %self.root.display(), "some workspace locks could not be released");
            }
        }
    }

    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn marker_path(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(&self.options.marker_file)
    }

    fn is_default(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.options.default_collection)
    }

    fn model_name_taken(&self, name: &str) -> bool {
        self.models.keys().any(|key| key.eq_ignore_ascii_case(name))
    }

    /// Returns `true` when the (normalised) collection is known.
    /// 判斷收藏是否存在。
    pub fn collection_exists(&self, name: &str) -> bool {
        let name = normalize_collection_name(name);
        self.is_default(&name) || self.collections.contains(&name)
    }

    fn resolve_collection(&self, name: &str) -> Result<String, StoreError> {
        let name = normalize_collection_name(name);
        if self.is_default(&name) {
            Ok(self.options.default_collection.clone())
        } else if self.collections.contains(&name) {
            Ok(name)
        } else {
            Err(StoreError::CollectionNotFound(name))
        }
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(String::as_str)
    }

    /// Lists the models recorded for `collection`, sorted by name.
    /// 列出收藏內的模型（依名稱排序）。
    pub fn models_in(&self, collection: &str) -> Result<Vec<&ModelRecord>, StoreError> {
        let collection = self.resolve_collection(collection)?;
        Ok(self
            .models
            .values()
            .filter(|record| record.collection() == collection)
            .collect())
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelRecord> {
        self.models.values()
    }

    pub fn model(&self, name: &str) -> Option<&ModelRecord> {
        self.models.get(name)
    }

    pub fn current(&self) -> Option<&ModelRecord> {
        self.current.as_ref().and_then(|name| self.models.get(name))
    }

    /// Path of the current model's backing file.
    /// 目前模型的檔案路徑。
    pub fn current_path(&self) -> Option<&Path> {
        self.current().map(ModelRecord::path)
    }

    /// Adds a collection; `Ok(false)` (or an error when `notify_on_duplicate`)
    /// if it already exists.
    /// 新增收藏；若已存在則回傳 `Ok(false)`，或在要求通知時回傳錯誤。
    pub fn add_collection(
        &mut self,
        name: &str,
        notify_on_duplicate: bool,
    ) -> Result<bool, StoreError> {
        let name = validated_collection_name(name)?;
        if self.collection_exists(&name) {
            if notify_on_duplicate {
                return Err(StoreError::DuplicateCollection(name));
            }
            return Ok(false);
        }
        self.create_collection(&name);
        Ok(true)
    }

    /// Adds a collection under the first free `base`, `base(1)`, … name.
    /// 以不重複的名稱新增收藏並回傳實際名稱。
    pub fn generate_collection(&mut self, base: &str) -> Result<String, StoreError> {
        let base = validated_collection_name(base)?;
        let name = unique_collection_name(&base, |candidate| self.collection_exists(candidate));
        self.create_collection(&name);
        Ok(name)
    }

    fn create_collection(&mut self, name: &str) {
        let dir = self.collection_dir(name);
        let marker = self.marker_path(name);
        let created = fs::create_dir_all(&dir).and_then(|_| touch_if_missing(&marker).map(|_| ()));
        if self.persisted(&dir, created) {
            if let Some(locks) = self.locks.as_mut() {
                if !lock::append_lock(&marker, locks) {
                    warn!(path = %marker.display(), "could not lock collection marker");
                }
            }
        }
        self.collections.insert(name.to_string());
        debug!(collection = name, "collection added");
        self.events.publish(StoreEvent::CollectionAdded {
            name: name.to_string(),
        });
    }

    /// Deletes a collection, its directory and every model inside it.
    /// 刪除收藏、其目錄與所有模型。
    pub fn remove_collection(&mut self, name: &str) -> Result<(), StoreError> {
        let name = normalize_collection_name(name);
        if self.is_default(&name) {
            return Err(StoreError::ReservedCollection(name));
        }
        if !self.collections.contains(&name) {
            return Err(StoreError::CollectionNotFound(name));
        }

        let dir = self.collection_dir(&name);
        self.with_unlocked(|store| {
            let result = remove_path(&dir);
            store.persisted(&dir, result);
        });
        self.collections.remove(&name);

        let contained: Vec<String> = self
            .models
            .values()
            .filter(|record| record.collection() == name)
            .map(|record| record.name().to_string())
            .collect();
        let current_removed = self
            .current
            .as_ref()
            .is_some_and(|current| contained.contains(current));
        for model in contained {
            self.models.remove(&model);
            self.events.publish(StoreEvent::ModelRemoved { name: model });
        }
        debug!(collection = %name, "collection removed");
        self.events
            .publish(StoreEvent::CollectionRemoved { name: name.clone() });

        if current_removed {
            self.select_replacement();
        }
        Ok(())
    }

    /// Renames a collection directory and rewrites the paths of its models.
    /// 重新命名收藏目錄並更新其模型路徑。
    pub fn rename_collection(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        let old = normalize_collection_name(old);
        let new = validated_collection_name(new)?;
        if self.is_default(&old) {
            return Err(StoreError::ReservedCollection(old));
        }
        if !self.collections.contains(&old) {
            return Err(StoreError::CollectionNotFound(old));
        }
        if self.is_default(&new) {
            return Err(StoreError::ReservedCollection(new));
        }
        if old == new {
            return Ok(());
        }
        if self.collection_exists(&new) {
            return Err(StoreError::DuplicateCollection(new));
        }

        let from = self.collection_dir(&old);
        let to = self.collection_dir(&new);
        self.with_unlocked(|store| {
            let result = fs::rename(&from, &to);
            store.persisted(&from, result);
        });

        self.collections.remove(&old);
        self.collections.insert(new.clone());
        for record in self.models.values_mut() {
            if record.collection() == old {
                let path = to.join(record.name());
                record.set_collection(new.as_str());
                record.set_path(path);
            }
        }
        debug!(from = %old, to = %new, "collection renamed");
        self.events.publish(StoreEvent::CollectionRenamed {
            from: old,
            to: new.clone(),
        });
        if self
            .current()
            .is_some_and(|record| record.collection() == new)
        {
            self.announce_current();
        }
        Ok(())
    }

    /// Creates a model, makes it current and returns its path.
    /// 建立模型、設為目前模型並回傳路徑。
    pub fn open_model_in_collection(
        &mut self,
        name: &str,
        xml: &str,
        collection: &str,
        outgoing: Option<LiveContent>,
    ) -> Result<PathBuf, StoreError> {
        let collection = self.resolve_collection(collection)?;
        let base = validated_model_name(name)?;
        self.flush_outgoing(outgoing);
        let name = self.insert_model(&base, xml, &collection);
        self.current = Some(name.clone());
        self.announce_current();
        Ok(self.models[&name].path().to_path_buf())
    }

    /// Creates a model without touching the current model.
    /// 建立模型但不變更目前模型，回傳實際名稱。
    pub fn put_model_in_collection(
        &mut self,
        name: &str,
        xml: &str,
        collection: &str,
    ) -> Result<String, StoreError> {
        let collection = self.resolve_collection(collection)?;
        let base = validated_model_name(name)?;
        Ok(self.insert_model(&base, xml, &collection))
    }

    fn insert_model(&mut self, base: &str, xml: &str, collection: &str) -> String {
        let name = unique_model_name(base, |candidate| self.model_name_taken(candidate));
        let path = self.collection_dir(collection).join(&name);
        let written = write_atomic(&path, xml.as_bytes());
        if self.persisted(&path, written) {
            if let Some(locks) = self.locks.as_mut() {
                if !lock::append_lock(&path, locks) {
                    warn!(path = %path.display(), "could not lock new model file");
                }
            }
        }
        let record = ModelRecord::new(name.as_str(), collection, xml, path.as_path());
        self.models.insert(name.clone(), record);
        debug!(model = %name, collection, "model added");
        self.events.publish(StoreEvent::ModelAdded {
            name: name.clone(),
            collection: collection.to_string(),
            path,
        });
        name
    }

    /// Makes `name` current after flushing the outgoing model's live content.
    /// 寫回目前模型的即時內容後切換至指定模型。
    pub fn switch_current(
        &mut self,
        name: &str,
        outgoing: Option<LiveContent>,
    ) -> Result<ModelRecord, StoreError> {
        if !self.models.contains_key(name) {
            return Err(StoreError::ModelNotFound(name.to_string()));
        }
        self.flush_outgoing(outgoing);
        if self.current.as_deref() != Some(name) {
            self.current = Some(name.to_string());
            self.announce_current();
        }
        Ok(self.models[name].clone())
    }

    /// Records editor content for `name` without touching the disk.
    /// 記錄編輯器內容（不寫入磁碟）。
    pub fn update_live(&mut self, name: &str, xml: &str, modified: bool) -> Result<(), StoreError> {
        let record = self
            .models
            .get_mut(name)
            .ok_or_else(|| StoreError::ModelNotFound(name.to_string()))?;
        record.set_content(xml);
        record.set_modified(modified);
        Ok(())
    }

    /// Renames a model, its file and its memoized values; returns the new name.
    /// 重新命名模型與其檔案，並清除記憶值；回傳新名稱。
    pub fn rename_model(&mut self, old: &str, new: &str) -> Result<String, StoreError> {
        if !self.models.contains_key(old) {
            return Err(StoreError::ModelNotFound(old.to_string()));
        }
        let base = validated_model_name(new)?;
        if old.eq_ignore_ascii_case(&base) {
            return Ok(old.to_string());
        }
        let name = unique_model_name(&base, |candidate| self.model_name_taken(candidate));
        self.memo.remove_test(old);

        let Some(mut record) = self.models.remove(old) else {
            return Err(StoreError::ModelNotFound(old.to_string()));
        };
        let from = record.path().to_path_buf();
        let to = from.with_file_name(&name);
        self.with_unlocked(|store| {
            let result = fs::rename(&from, &to);
            store.persisted(&from, result);
        });
        record.set_name(name.as_str());
        record.set_path(to);
        self.models.insert(name.clone(), record);
        debug!(from = old, to = %name, "model renamed");
        self.events.publish(StoreEvent::ModelRenamed {
            from: old.to_string(),
            to: name.clone(),
        });

        if self.current.as_deref() == Some(old) {
            self.current = Some(name.clone());
            self.announce_current();
        }
        Ok(name)
    }

    /// Moves a model into another collection.
    /// 將模型移至另一個收藏。
    pub fn move_model(&mut self, name: &str, collection: &str) -> Result<(), StoreError> {
        let target = self.resolve_collection(collection)?;
        let (from, source) = match self.models.get(name) {
            Some(record) => (record.path().to_path_buf(), record.collection().to_string()),
            None => return Err(StoreError::ModelNotFound(name.to_string())),
        };
        if source == target {
            return Ok(());
        }

        let to = self.collection_dir(&target).join(name);
        self.with_unlocked(|store| {
            let result = fs::rename(&from, &to);
            store.persisted(&from, result);
        });
        if let Some(record) = self.models.get_mut(name) {
            record.set_collection(target.as_str());
            record.set_path(to.as_path());
        }
        debug!(model = name, from = %source, to = %target, "model moved");
        self.events.publish(StoreEvent::ModelMoved {
            name: name.to_string(),
            from: source,
            to: target,
            path: to,
        });
        if self.current.as_deref() == Some(name) {
            self.announce_current();
        }
        Ok(())
    }

    /// Deletes a model record and its file.
    /// 刪除模型紀錄與檔案。
    pub fn remove_model(&mut self, name: &str) -> Result<(), StoreError> {
        let record = self
            .models
            .remove(name)
            .ok_or_else(|| StoreError::ModelNotFound(name.to_string()))?;
        let path = record.path().to_path_buf();
        self.with_unlocked(|store| {
            let result = remove_path(&path);
            store.persisted(&path, result);
        });
        debug!(model = name, "model removed");
        self.events.publish(StoreEvent::ModelRemoved {
            name: name.to_string(),
        });
        if self.current.as_deref() == Some(name) {
            self.select_replacement();
        }
        Ok(())
    }

    /// Saves a model. With `is_save_as` the previously current model leaves
    /// the store (its file stays) and `name` is opened in the default
    /// collection, returning the new path.
    /// 儲存模型；另存新檔時以預設收藏中的新模型取代目前模型並回傳路徑。
    pub fn save_model(
        &mut self,
        name: &str,
        path: &Path,
        xml: &str,
        is_save_as: bool,
    ) -> Result<Option<PathBuf>, StoreError> {
        if is_save_as {
            let base = validated_model_name(name)?;
            if let Some(previous) = self.current.take() {
                self.forget_model(&previous);
            }
            let default = self.options.default_collection.clone();
            let path = self.open_model_in_collection(&base, xml, &default, None)?;
            return Ok(Some(path));
        }

        if !self.models.contains_key(name) {
            return Err(StoreError::ModelNotFound(name.to_string()));
        }
        self.with_unlocked(|store| {
            let result = write_atomic(path, xml.as_bytes());
            store.persisted(path, result);
        });
        let mut moved = false;
        if let Some(record) = self.models.get_mut(name) {
            moved = record.path() != path;
            record.set_content(xml);
            record.set_path(path);
            record.set_modified(false);
        }
        if moved && self.current.as_deref() == Some(name) {
            self.announce_current();
        }
        Ok(None)
    }

    /// Drops a record while leaving its file on disk.
    fn forget_model(&mut self, name: &str) {
        if self.models.remove(name).is_some() {
            debug!(model = name, "model released from workspace");
            self.events.publish(StoreEvent::ModelRemoved {
                name: name.to_string(),
            });
        }
    }

    fn flush_outgoing(&mut self, outgoing: Option<LiveContent>) {
        let (Some(current), Some(live)) = (self.current.as_ref(), outgoing) else {
            return;
        };
        if let Some(record) = self.models.get_mut(current) {
            record.set_content(live.xml);
            record.set_modified(live.modified);
        }
    }

    fn select_replacement(&mut self) {
        self.current = self.models.keys().next().cloned();
        self.announce_current();
    }

    fn announce_current(&mut self) {
        let path = self.current_path().map(Path::to_path_buf);
        self.events.publish(StoreEvent::CurrentChanged {
            name: self.current.clone(),
            path,
        });
    }

    /// Runs `op` with the workspace unlocked, restoring the previous lock state.
    fn with_unlocked<T>(&mut self, op: impl FnOnce(&mut Self) -> T) -> T {
        let was_locked = match self.locks.take() {
            Some(set) => {
                if !lock::unlock(set) {
                    warn!(root = %self.root.display(), "workspace unlock was incomplete");
                }
                true
            }
            None => false,
        };
        let output = op(self);
        if was_locked {
            self.locks = lock::lock_directory(&self.root);
            if self.locks.is_none() {
                warn!(root = %self.root.display(), "failed to re-lock workspace");
            }
        }
        output
    }

    /// Swallows a disk failure after logging and announcing it.
    fn persisted(&mut self, path: &Path, result: io::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "workspace write failed");
                self.events.publish(StoreEvent::PersistFailed {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                });
                false
            }
        }
    }
}

impl Drop for CollectionStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn validated_collection_name(name: &str) -> Result<String, StoreError> {
    let name = normalize_collection_name(name);
    if name.is_empty() || has_path_syntax(&name) || name.starts_with('.') {
        return Err(StoreError::InvalidName(name));
    }
    Ok(name)
}

fn validated_model_name(name: &str) -> Result<String, StoreError> {
    let name = ensure_model_extension(name);
    if name == MODEL_EXTENSION || has_path_syntax(&name) {
        return Err(StoreError::InvalidName(name));
    }
    Ok(name)
}

fn has_path_syntax(name: &str) -> bool {
    name.contains('/') || name.contains('\\') || name == ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn open_store() -> (TempDir, CollectionStore) {
        let dir = tempdir().unwrap();
        let store = CollectionStore::open(
            dir.path().join("ws"),
            StoreOptions::default(),
            Arc::new(TestMemoCache::new()),
        )
        .unwrap();
        (dir, store)
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".xml"))
            .collect();
        names.sort();
        names
    }

    fn drain(rx: &Receiver<StoreEvent>) -> Vec<StoreEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn open_creates_default_collection_and_locks() {
        let (_dir, store) = open_store();
        assert!(store.collection_exists("default"));
        assert!(store.collection_exists("DEFAULT"));
        assert!(store.root().join("default/.config").is_file());
        assert!(store.is_locked());
        assert!(lock::lock_file(store.root().join("default/.config")).is_none());
    }

    #[test]
    fn opened_model_name_gets_extension() {
        let (_dir, mut store) = open_store();
        let path = store
            .open_model_in_collection("login", "<m/>", "default", None)
            .unwrap();
        assert!(path.ends_with("default/login.xml"));
        assert_eq!(store.current().unwrap().name(), "login.xml");
        assert_eq!(fs::read_to_string(&path).unwrap(), "<m/>");
    }

    #[test]
    fn duplicate_model_names_are_numbered_workspace_wide() {
        let (_dir, mut store) = open_store();
        store.add_collection("other", true).unwrap();
        let a = store.put_model_in_collection("test.xml", "one", "default").unwrap();
        let b = store.put_model_in_collection("test.xml", "two", "other").unwrap();
        let c = store.put_model_in_collection("test", "three", "default").unwrap();
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("test.xml", "test(1).xml", "test(2).xml"));
        assert_eq!(store.model("test.xml").unwrap().content(), "one");
        assert_eq!(store.model("test(1).xml").unwrap().content(), "two");
        assert_eq!(store.model("test(2).xml").unwrap().content(), "three");
        assert!(store.current().is_none());
    }

    #[test]
    fn add_and_remove_collection() {
        let (_dir, mut store) = open_store();
        assert!(store.add_collection("c", true).unwrap());
        assert!(store.collection_exists("c"));
        assert!(!store.add_collection("c.xml ", false).unwrap());
        assert!(matches!(
            store.add_collection("c", true),
            Err(StoreError::DuplicateCollection(_))
        ));
        assert!(matches!(
            store.add_collection("Default", true),
            Err(StoreError::DuplicateCollection(_))
        ));

        let dir = store.collection_dir("c");
        store.put_model_in_collection("m", "<m/>", "c").unwrap();
        store.remove_collection("c").unwrap();
        assert!(!store.collection_exists("c"));
        assert!(!dir.exists());
        assert!(store.model("m.xml").is_none());
        assert!(store.is_locked());
    }

    #[test]
    fn removing_collection_with_current_model_selects_a_replacement() {
        let (_dir, mut store) = open_store();
        store.put_model_in_collection("keep", "<k/>", "default").unwrap();
        store.add_collection("c", true).unwrap();
        store.open_model_in_collection("m", "<m/>", "c", None).unwrap();
        assert_eq!(store.current().unwrap().name(), "m.xml");
        let events = store.subscribe();

        store.remove_collection("c").unwrap();

        let current = store.current().expect("a remaining model becomes current");
        assert_eq!(current.name(), "keep.xml");
        let expected = StoreEvent::CurrentChanged {
            name: Some("keep.xml".into()),
            path: Some(store.collection_dir("default").join("keep.xml")),
        };
        assert!(events.try_iter().any(|event| event == expected));
    }

    #[test]
    fn default_collection_is_protected() {
        let (_dir, mut store) = open_store();
        store.add_collection("c", true).unwrap();
        assert!(matches!(
            store.remove_collection("default"),
            Err(StoreError::ReservedCollection(_))
        ));
        assert!(matches!(
            store.rename_collection("default", "x"),
            Err(StoreError::ReservedCollection(_))
        ));
        assert!(matches!(
            store.rename_collection("c", "DEFAULT"),
            Err(StoreError::ReservedCollection(_))
        ));
    }

    #[test]
    fn generated_collections_never_collide() {
        let (_dir, mut store) = open_store();
        assert_eq!(store.generate_collection("gen").unwrap(), "gen");
        assert_eq!(store.generate_collection("gen").unwrap(), "gen(1)");
        assert!(store.root().join("gen(1)/.config").is_file());
    }

    #[test]
    fn rename_collection_moves_models_and_current_pointer() {
        let (_dir, mut store) = open_store();
        store.add_collection("c1", true).unwrap();
        store.put_model_in_collection("a", "<a/>", "c1").unwrap();
        store.open_model_in_collection("b", "<b/>", "c1", None).unwrap();
        store.add_collection("c2", true).unwrap();
        assert!(matches!(
            store.rename_collection("c1", "c2"),
            Err(StoreError::DuplicateCollection(_))
        ));
        store.remove_collection("c2").unwrap();

        let events = store.subscribe();
        store.rename_collection("c1", "c2").unwrap();

        let new_dir = store.collection_dir("c2");
        for (name, content) in [("a.xml", "<a/>"), ("b.xml", "<b/>")] {
            let record = store.model(name).unwrap();
            assert_eq!(record.content(), content);
            assert_eq!(record.path(), new_dir.join(name));
            assert_eq!(record.collection(), "c2");
        }
        assert_eq!(listing(&new_dir), vec!["a.xml", "b.xml"]);
        assert_eq!(store.current_path(), Some(new_dir.join("b.xml").as_path()));
        assert!(drain(&events).contains(&StoreEvent::CurrentChanged {
            name: Some("b.xml".into()),
            path: Some(new_dir.join("b.xml")),
        }));
        assert!(store.is_locked());
    }

    #[test]
    fn move_model_updates_listing_and_path() {
        let (_dir, mut store) = open_store();
        store.add_collection("c1", true).unwrap();
        store.add_collection("c2", true).unwrap();
        store.open_model_in_collection("m", "<m/>", "c1", None).unwrap();

        store.move_model("m.xml", "c2").unwrap();
        let names = |store: &CollectionStore, c: &str| -> Vec<String> {
            store
                .models_in(c)
                .unwrap()
                .iter()
                .map(|r| r.name().to_string())
                .collect()
        };
        assert!(names(&store, "c1").is_empty());
        assert_eq!(names(&store, "c2"), vec!["m.xml"]);
        assert!(listing(&store.collection_dir("c1")).is_empty());
        assert_eq!(listing(&store.collection_dir("c2")), vec!["m.xml"]);
        assert_eq!(
            store.current_path(),
            Some(store.collection_dir("c2").join("m.xml").as_path())
        );
    }

    #[test]
    fn switching_current_flushes_live_content() {
        let (_dir, mut store) = open_store();
        store.open_model_in_collection("a", "<a/>", "default", None).unwrap();
        store
            .open_model_in_collection("b", "<b/>", "default", Some(LiveContent::new("<a2/>", true)))
            .unwrap();
        let a = store.model("a.xml").unwrap();
        assert_eq!(a.content(), "<a2/>");
        assert!(a.is_modified());

        let b = store
            .switch_current("a.xml", Some(LiveContent::new("<b2/>", false)))
            .unwrap();
        assert_eq!(b.name(), "a.xml");
        assert_eq!(store.model("b.xml").unwrap().content(), "<b2/>");
        assert!(matches!(
            store.switch_current("zzz.xml", None),
            Err(StoreError::ModelNotFound(_))
        ));
    }

    #[test]
    fn rename_model_purges_memo_and_renames_file() {
        let (_dir, mut store) = open_store();
        store.open_model_in_collection("old", "<m/>", "default", None).unwrap();
        store.put_model_in_collection("taken", "<t/>", "default").unwrap();
        store.memo().put_header("old", "s", "H", "V");

        assert_eq!(store.rename_model("old.xml", "OLD").unwrap(), "old.xml");
        let renamed = store.rename_model("old.xml", "taken").unwrap();
        assert_eq!(renamed, "taken(1).xml");
        assert_eq!(store.memo().get_header("old", "s", "H"), None);
        assert_eq!(
            listing(&store.collection_dir("default")),
            vec!["taken(1).xml", "taken.xml"]
        );
        assert_eq!(store.current().unwrap().name(), "taken(1).xml");
    }

    #[test]
    fn removing_current_model_selects_a_replacement() {
        let (_dir, mut store) = open_store();
        store.put_model_in_collection("a", "<a/>", "default").unwrap();
        store.open_model_in_collection("b", "<b/>", "default", None).unwrap();
        store.remove_model("b.xml").unwrap();
        assert!(!store.collection_dir("default").join("b.xml").exists());
        assert_eq!(store.current().unwrap().name(), "a.xml");

        store.remove_model("a.xml").unwrap();
        assert!(store.current().is_none());
    }

    #[test]
    fn save_in_place_and_save_as() {
        let (_dir, mut store) = open_store();
        let path = store
            .open_model_in_collection("draft", "<d/>", "default", None)
            .unwrap();
        store.update_live("draft.xml", "<d2/>", true).unwrap();

        assert_eq!(store.save_model("draft.xml", &path, "<d3/>", false).unwrap(), None);
        let record = store.model("draft.xml").unwrap();
        assert_eq!(record.content(), "<d3/>");
        assert!(!record.is_modified());
        assert_eq!(fs::read_to_string(&path).unwrap(), "<d3/>");

        let saved = store
            .save_model("final", &path, "<f/>", true)
            .unwrap()
            .expect("save-as returns the new path");
        assert!(saved.ends_with("default/final.xml"));
        assert!(store.model("draft.xml").is_none());
        assert_eq!(store.current().unwrap().name(), "final.xml");
        assert_eq!(fs::read_to_string(&saved).unwrap(), "<f/>");
    }

    #[test]
    fn save_as_keeps_the_source_file() {
        let (_dir, mut store) = open_store();
        store.add_collection("c1", true).unwrap();
        let original = store
            .open_model_in_collection("draft", "<d/>", "c1", None)
            .unwrap();
        let events = store.subscribe();

        let saved = store
            .save_model("copy", &original, "<d2/>", true)
            .unwrap()
            .expect("save-as returns the new path");

        assert!(original.exists(), "save-as must not delete the source file");
        assert_eq!(fs::read_to_string(&original).unwrap(), "<d/>");
        assert!(saved.ends_with("default/copy.xml"));
        assert!(store.model("draft.xml").is_none());
        assert!(store.models_in("c1").unwrap().is_empty());
        assert_eq!(store.current().unwrap().name(), "copy.xml");
        let events: Vec<_> = events.try_iter().collect();
        assert!(events.contains(&StoreEvent::ModelRemoved {
            name: "draft.xml".into()
        }));
    }

    #[test]
    fn lock_state_is_preserved_when_unlocked() {
        let (_dir, mut store) = open_store();
        store.close();
        store.add_collection("c", true).unwrap();
        store.open_model_in_collection("m", "<m/>", "c", None).unwrap();
        store.rename_collection("c", "d").unwrap();
        store.remove_collection("d").unwrap();
        assert!(!store.is_locked());
    }

    #[test]
    fn reopening_restores_collections_and_models() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("ws");
        {
            let mut store =
                CollectionStore::open(&root, StoreOptions::default(), Arc::default()).unwrap();
            store.add_collection("suite", true).unwrap();
            store.put_model_in_collection("case", "<c/>", "suite").unwrap();
        }
        fs::create_dir_all(root.join("stray")).unwrap();

        let store = CollectionStore::open(&root, StoreOptions::default(), Arc::default()).unwrap();
        assert!(store.collection_exists("suite"));
        assert!(!store.collection_exists("stray"));
        assert_eq!(store.model("case.xml").unwrap().content(), "<c/>");
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_dir, mut store) = open_store();
        assert!(matches!(
            store.add_collection(" .xml ", true),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.add_collection("a/b", true),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.put_model_in_collection("", "<m/>", "default"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.put_model_in_collection("m", "<m/>", "missing"),
            Err(StoreError::CollectionNotFound(_))
        ));
    }
}
