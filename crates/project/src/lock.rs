use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Exclusive advisory lock held on a single file.
/// 單一檔案上的獨占建議鎖。
///
/// The lock is released when the handle is dropped.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: File,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn release(self) -> bool {
        match self.file.unlock() {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to release lock");
                false
            }
        }
    }
}

/// Locks held over a whole workspace subtree.
/// 涵蓋整個工作區子樹的鎖集合。
#[derive(Debug, Default)]
pub struct LockSet {
    handles: Vec<LockHandle>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.iter().any(|handle| handle.path == path)
    }

    pub fn push(&mut self, handle: LockHandle) {
        self.handles.push(handle);
    }
}

/// Takes an exclusive advisory lock on `path`.
/// 對指定檔案取得獨占建議鎖。
///
/// Returns `None` when the file does not exist or is already locked, including
/// by another handle inside this process.
pub fn lock_file(path: impl AsRef<Path>) -> Option<LockHandle> {
    let path = path.as_ref();
    if !path.is_file() {
        return None;
    }
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cannot open file for locking");
            return None;
        }
    };
    match file.try_lock() {
        Ok(()) => Some(LockHandle {
            path: path.to_path_buf(),
            file,
        }),
        Err(TryLockError::WouldBlock) => {
            debug!(path = %path.display(), "file already locked");
            None
        }
        Err(TryLockError::Error(err)) => {
            debug!(path = %path.display(), error = %err, "lock attempt failed");
            None
        }
    }
}

/// Recursively locks every regular file below `path`.
/// 遞迴鎖定目錄下所有一般檔案。
///
/// Any failure aborts the whole operation; handles taken before the failure
/// are released as the partial set is dropped.
pub fn lock_directory(path: impl AsRef<Path>) -> Option<LockSet> {
    let mut set = LockSet::default();
    if collect_locks(path.as_ref(), &mut set) {
        Some(set)
    } else {
        None
    }
}

fn collect_locks(dir: &Path, set: &mut LockSet) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "cannot list directory for locking");
            return false;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else {
            return false;
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            return false;
        };
        if file_type.is_dir() {
            if !collect_locks(&path, set) {
                return false;
            }
        } else if file_type.is_file() {
            match lock_file(&path) {
                Some(handle) => set.push(handle),
                None => return false,
            }
        }
    }
    true
}

/// Releases every handle in `set`, returning `false` if any release failed.
/// 釋放所有鎖；任一失敗時回傳 `false`，但仍會嘗試釋放其餘鎖。
pub fn unlock(set: LockSet) -> bool {
    let mut all_released = true;
    for handle in set.handles {
        all_released &= handle.release();
    }
    all_released
}

/// Adds the lock of a freshly created file to a live set.
/// 將新建檔案的鎖加入既有的鎖集合。
pub fn append_lock(path: impl AsRef<Path>, set: &mut LockSet) -> bool {
    let path = path.as_ref();
    if set.contains(path) {
        return true;
    }
    match lock_file(path) {
        Some(handle) => {
            set.push(handle);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_on_same_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.xml");
        fs::write(&path, "<model/>").unwrap();

        let first = lock_file(&path).expect("first lock should succeed");
        assert!(lock_file(&path).is_none());

        drop(first);
        assert!(lock_file(&path).is_some());
    }

    #[test]
    fn missing_file_cannot_be_locked() {
        let dir = tempdir().unwrap();
        assert!(lock_file(dir.path().join("absent.xml")).is_none());
    }

    #[test]
    fn directory_lock_covers_nested_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/.config"), "").unwrap();
        fs::write(dir.path().join("a/b/one.xml"), "1").unwrap();
        fs::write(dir.path().join("top.xml"), "2").unwrap();

        let set = lock_directory(dir.path()).expect("directory should lock");
        assert_eq!(set.len(), 3);
        assert!(lock_file(dir.path().join("a/b/one.xml")).is_none());

        assert!(unlock(set));
        assert!(lock_file(dir.path().join("a/b/one.xml")).is_some());
    }

    #[test]
    fn directory_lock_aborts_when_one_file_is_held() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("free.xml"), "1").unwrap();
        fs::write(dir.path().join("held.xml"), "2").unwrap();
        let _held = lock_file(dir.path().join("held.xml")).unwrap();

        assert!(lock_directory(dir.path()).is_none());
        // partial locks are released with the discarded set
        assert!(lock_file(dir.path().join("free.xml")).is_some());
    }

    #[test]
    fn append_lock_extends_live_set() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.xml"), "1").unwrap();
        let mut set = lock_directory(dir.path()).unwrap();

        let fresh = dir.path().join("new.xml");
        fs::write(&fresh, "2").unwrap();
        assert!(append_lock(&fresh, &mut set));
        assert!(append_lock(&fresh, &mut set));
        assert_eq!(set.len(), 2);
        assert!(lock_file(&fresh).is_none());
    }
}
