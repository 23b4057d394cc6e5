//! Name normalisation and collision resolution for models and collections.

pub const MODEL_EXTENSION: &str = ".xml";

/// Removes every `.xml` occurrence and surrounding whitespace.
pub fn normalize_collection_name(name: &str) -> String {
    name.replace(MODEL_EXTENSION, "").trim().to_string()
}

/// Trims the name and appends `.xml` when it is missing.
pub fn ensure_model_extension(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.ends_with(MODEL_EXTENSION) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{MODEL_EXTENSION}")
    }
}

/// Appends `(1)`, `(2)`, … before the `.xml` extension until `taken` says no.
pub fn unique_model_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let stem = name.strip_suffix(MODEL_EXTENSION).unwrap_or(name);
    (1u64..)
        .map(|n| format!("{stem}({n}){MODEL_EXTENSION}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Appends `(1)`, `(2)`, … to a collection name until `taken` says no.
pub fn unique_collection_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    (1u64..)
        .map(|n| format!("{name}({n})"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}
