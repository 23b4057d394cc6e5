//! Workspace management primitives for modelbench: advisory locks, model
//! records, the collection store and its view adapter.
//! 管理 modelbench 工作區的核心模組：建議鎖、模型紀錄、收藏儲存區與其檢視轉接器。

mod naming;
mod util;

pub mod events;
pub mod import;
pub mod lock;
pub mod record;
pub mod store;
pub mod tree;

pub use events::StoreEvent;
pub use import::{ImportReport, ModelValidator, WellFormedXml};
pub use lock::{append_lock, lock_directory, lock_file, unlock, LockHandle, LockSet};
pub use naming::{ensure_model_extension, normalize_collection_name};
pub use record::ModelRecord;
pub use store::{CollectionStore, LiveContent, SharedStore, StoreError, StoreOptions};
pub use tree::{CollectionTree, TreeDiff, TreeError, TreeNode, TreeNodeId, TreeNodeKind};
