//! Session-scoped storage for values captured while tests execute.
//! （保存測試執行期間擷取之數值的工作階段快取。）
//!
//! Three independent key spaces are kept: response headers per state, response
//! content per state, and pattern values per identifier. Every key space is
//! keyed by the test name with a trailing `.xml` removed, so `login.xml` and
//! `login` address the same entries. Captured values survive across batch runs
//! until [`TestMemoCache::reset_all`] is called explicitly.
//! 共有三個獨立的鍵空間：各狀態的回應標頭、各狀態的回應內容，以及各識別碼的樣式值。
//! 所有鍵空間皆以去除 `.xml` 後綴的測試名稱為主鍵，數值會跨批次保留，直到明確重設。

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

type HeaderMap = HashMap<String, HashMap<String, HashMap<String, String>>>;
type ContentMap = HashMap<String, HashMap<String, String>>;
type PatternMap = HashMap<String, HashMap<String, String>>;

/// Memoization cache shared by the UI thread and the batch thread.
/// （由介面執行緒與批次執行緒共用的記憶快取。）
#[derive(Debug, Default)]
pub struct TestMemoCache {
    headers: Mutex<HeaderMap>,
    content: Mutex<ContentMap>,
    patterns: Mutex<PatternMap>,
}

/// Normalises a test name into the key used by every key space.
/// （將測試名稱轉為各鍵空間使用的主鍵。）
pub fn test_key(test: &str) -> &str {
    test.strip_suffix(".xml").unwrap_or(test)
}

impl TestMemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the header captured for `test` in `state`.
    /// （取得測試在指定狀態下擷取到的標頭值。）
    pub fn get_header(&self, test: &str, state: &str, header: &str) -> Option<String> {
        let guard = self.headers.lock();
        guard
            .get(test_key(test))
            .and_then(|states| states.get(state))
            .and_then(|headers| headers.get(header))
            .cloned()
    }

    /// Stores a header value, creating the intermediate maps on demand.
    /// （儲存標頭值，必要時建立中間層級。）
    pub fn put_header(
        &self,
        test: &str,
        state: &str,
        header: impl Into<String>,
        value: impl Into<String>,
    ) {
        let mut guard = self.headers.lock();
        guard
            .entry(test_key(test).to_string())
            .or_default()
            .entry(state.to_string())
            .or_default()
            .insert(header.into(), value.into());
    }

    /// Drops every header captured for `test`.
    /// （移除該測試的所有標頭紀錄。）
    pub fn remove_all_headers(&self, test: &str) {
        self.headers.lock().remove(test_key(test));
    }

    pub fn remove_header_state(&self, test: &str, state: &str) {
        if let Some(states) = self.headers.lock().get_mut(test_key(test)) {
            states.remove(state);
        }
    }

    pub fn remove_header(&self, test: &str, state: &str, header: &str) {
        if let Some(headers) = self
            .headers
            .lock()
            .get_mut(test_key(test))
            .and_then(|states| states.get_mut(state))
        {
            headers.remove(header);
        }
    }

    /// Returns the response content captured for `test` in `state`.
    /// （取得測試在指定狀態下擷取到的回應內容。）
    pub fn get_content(&self, test: &str, state: &str) -> Option<String> {
        let guard = self.content.lock();
        guard
            .get(test_key(test))
            .and_then(|states| states.get(state))
            .cloned()
    }

    pub fn put_content(&self, test: &str, state: &str, value: impl Into<String>) {
        let mut guard = self.content.lock();
        guard
            .entry(test_key(test).to_string())
            .or_default()
            .insert(state.to_string(), value.into());
    }

    pub fn remove_all_content(&self, test: &str) {
        self.content.lock().remove(test_key(test));
    }

    pub fn remove_content_state(&self, test: &str, state: &str) {
        if let Some(states) = self.content.lock().get_mut(test_key(test)) {
            states.remove(state);
        }
    }

    /// Returns the pattern value captured under `id` for `test`.
    /// （取得測試在識別碼下擷取到的樣式值。）
    pub fn get_pattern_value(&self, test: &str, id: &str) -> Option<String> {
        let guard = self.patterns.lock();
        guard
            .get(test_key(test))
            .and_then(|values| values.get(id))
            .cloned()
    }

    pub fn put_pattern_value(&self, test: &str, id: &str, value: impl Into<String>) {
        let mut guard = self.patterns.lock();
        guard
            .entry(test_key(test).to_string())
            .or_default()
            .insert(id.to_string(), value.into());
    }

    pub fn remove_all_pattern_values(&self, test: &str) {
        self.patterns.lock().remove(test_key(test));
    }

    pub fn remove_pattern_value(&self, test: &str, id: &str) {
        if let Some(values) = self.patterns.lock().get_mut(test_key(test)) {
            values.remove(id);
        }
    }

    /// Purges `test` from all three key spaces (used when a model is renamed).
    /// （自三個鍵空間移除該測試，模型改名時使用。）
    pub fn remove_test(&self, test: &str) {
        debug!(test = test_key(test), "purging memoized values");
        self.remove_all_headers(test);
        self.remove_all_content(test);
        self.remove_all_pattern_values(test);
    }

    /// Replaces every key space with an empty map.
    /// （以空集合取代所有鍵空間。）
    pub fn reset_all(&self) {
        *self.headers.lock() = HeaderMap::new();
        *self.content.lock() = ContentMap::new();
        *self.patterns.lock() = PatternMap::new();
        debug!("memo cache reset");
    }

    /// Returns `true` when nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.headers.lock().is_empty()
            && self.content.lock().is_empty()
            && self.patterns.lock().is_empty()
    }
}
