use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::naming::{normalize_collection_name, MODEL_EXTENSION};
use crate::store::{CollectionStore, StoreError};

/// Decides whether a file is an acceptable model.
/// 判斷檔案是否為可接受的模型。
pub trait ModelValidator {
    fn validate(&self, xml: &str) -> bool;
}

impl<F> ModelValidator for F
where
    F: Fn(&str) -> bool,
{
    fn validate(&self, xml: &str) -> bool {
        self(xml)
    }
}

/// Accepts well-formed XML documents with exactly one root element.
/// 僅接受格式正確且只有一個根元素的 XML 文件。
#[derive(Debug, Clone, Copy, Default)]
pub struct WellFormedXml;

impl ModelValidator for WellFormedXml {
    fn validate(&self, xml: &str) -> bool {
        let mut reader = Reader::from_str(xml);
        let mut depth = 0usize;
        let mut roots = 0usize;
        loop {
            match reader.read_event() {
                Ok(Event::Start(_)) => {
                    if depth == 0 {
                        roots += 1;
                    }
                    depth += 1;
                }
                Ok(Event::End(_)) => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                Ok(Event::Empty(_)) => {
                    if depth == 0 {
                        roots += 1;
                    }
                }
                Ok(Event::Text(text)) => {
                    if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) {
                        return false;
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        depth == 0 && roots == 1
    }
}

/// Outcome of a folder import.
/// 資料夾匯入的結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub collection: String,
    pub imported: Vec<String>,
    pub rejected: Vec<PathBuf>,
}

impl CollectionStore {
    /// Ingests every valid `*.xml` file directly inside `dir` into the
    /// collection named after `dir`, creating it when needed.
    /// 將資料夾內所有有效的 `*.xml` 檔匯入同名收藏。
    pub fn import_folder(
        &mut self,
        dir: impl AsRef<Path>,
        validator: &dyn ModelValidator,
    ) -> Result<ImportReport, StoreError> {
        let dir = dir.as_ref();
        let name = dir
            .file_name()
            .map(|name| normalize_collection_name(&name.to_string_lossy()))
            .unwrap_or_default();
        self.add_collection(&name, false)?;

        let mut report = ImportReport {
            collection: name,
            ..ImportReport::default()
        };
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !entry.file_type().is_file() || !file_name.ends_with(MODEL_EXTENSION) {
                continue;
            }
            let xml = match fs::read_to_string(entry.path()) {
                Ok(xml) if validator.validate(&xml) => xml,
                Ok(_) => {
                    debug!(path = %entry.path().display(), "model rejected by validator");
                    report.rejected.push(entry.path().to_path_buf());
                    continue;
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "cannot read model");
                    report.rejected.push(entry.path().to_path_buf());
                    continue;
                }
            };
            let imported = self.put_model_in_collection(file_name, &xml, &report.collection)?;
            report.imported.push(imported);
        }
        Ok(report)
    }
}
