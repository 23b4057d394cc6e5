use std::path::{Path, PathBuf};

use serde::Serialize;

/// In-memory state of one model (test specification).
/// 單一模型（測試規格）的記憶體狀態。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRecord {
    name: String,
    collection: String,
    content: String,
    path: PathBuf,
    modified: bool,
}

impl ModelRecord {
    /// Creates a clean record; panics when `name` or `path` is empty.
    /// 建立未修改的紀錄；名稱或路徑為空時 panic。
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        content: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let mut record = Self {
            name: String::new(),
            collection: String::new(),
            content: content.into(),
            path: PathBuf::new(),
            modified: false,
        };
        record.set_name(name);
        record.set_collection(collection);
        record.set_path(path);
        record
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        assert!(!name.is_empty(), "model name must not be empty");
        self.name = name;
    }

    pub fn set_collection(&mut self, collection: impl Into<String>) {
        let collection = collection.into();
        assert!(!collection.is_empty(), "collection name must not be empty");
        self.collection = collection;
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        assert!(
            !path.as_os_str().is_empty(),
            "model path must not be empty"
        );
        self.path = path;
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_update_fields() {
        let mut record = ModelRecord::new("a.xml", "default", "<a/>", "/ws/default/a.xml");
        assert!(!record.is_modified());
        record.set_content("<b/>");
        record.set_modified(true);
        record.set_path("/ws/other/a.xml");
        assert_eq!(record.content(), "<b/>");
        assert!(record.is_modified());
        assert_eq!(record.path(), Path::new("/ws/other/a.xml"));
    }

    #[test]
    #[should_panic(expected = "model name must not be empty")]
    fn empty_name_is_a_programming_error() {
        let mut record = ModelRecord::new("a.xml", "default", "", "/ws/default/a.xml");
        record.set_name("");
    }

    #[test]
    #[should_panic(expected = "model path must not be empty")]
    fn empty_path_is_a_programming_error() {
        ModelRecord::new("a.xml", "default", "", "");
    }
}
