//! Caller-facing view of the workspace after an execution.

use std::collections::BTreeMap;

/// Bindings pre-seeded into every workspace. They belong to the runtime,
/// not to the generated code, and never appear in the caller-facing context.
pub const RESERVED_BINDINGS: &[&str] = &["df", "pd", "np", "plt", "px", "go"];

/// Longest preview retained for a single context value.
pub const MAX_PREVIEW_CHARS: usize = 500;

/// Display snapshot of one workspace variable.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextValue {
    pub type_name: String,
    pub preview: String,
}

/// Reduce a raw workspace snapshot to the variables generated code
/// introduced: reserved bindings and underscore-prefixed names are
/// dropped, previews are capped for safe display.
pub fn filter_context(
    raw: BTreeMap<String, ContextValue>,
) -> BTreeMap<String, ContextValue> {
    raw.into_iter()
        .filter(|(name, _)| {
            !name.starts_with('_') && !RESERVED_BINDINGS.contains(&name.as_str())
        })
        .map(|(name, mut value)| {
            value.preview = truncate_preview(value.preview);
            (name, value)
        })
        .collect()
}

fn truncate_preview(preview: String) -> String {
    if preview.chars().count() <= MAX_PREVIEW_CHARS {
        return preview;
    }
    let mut truncated: String = preview.chars().take(MAX_PREVIEW_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(type_name: &str, preview: &str) -> ContextValue {
        ContextValue {
            type_name: type_name.into(),
            preview: preview.into(),
        }
    }

    #[test]
    fn reserved_bindings_are_dropped() {
        let mut raw = BTreeMap::new();
        raw.insert("df".to_string(), value("DataFrame", "..."));
        raw.insert("pd".to_string(), value("module", "..."));
        raw.insert("result".to_string(), value("int", "5"));
        let filtered = filter_context(raw);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["result"], value("int", "5"));
    }

    #[test]
    fn underscore_names_are_dropped() {
        let mut raw = BTreeMap::new();
        raw.insert("_tmp".to_string(), value("list", "[1]"));
        raw.insert("total".to_string(), value("float", "1.5"));
        let filtered = filter_context(raw);
        assert!(!filtered.contains_key("_tmp"));
        assert!(filtered.contains_key("total"));
    }

    #[test]
    fn long_previews_are_capped() {
        let mut raw = BTreeMap::new();
        raw.insert("big".to_string(), value("str", &"x".repeat(2_000)));
        let filtered = filter_context(raw);
        let preview = &filtered["big"].preview;
        assert_eq!(preview.chars().count(), MAX_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn short_previews_pass_through() {
        let mut raw = BTreeMap::new();
        raw.insert("n".to_string(), value("int", "42"));
        assert_eq!(filter_context(raw)["n"].preview, "42");
    }

    #[test]
    fn multibyte_previews_are_capped_on_char_boundaries() {
        let mut raw = BTreeMap::new();
        raw.insert("s".to_string(), value("str", &"é".repeat(600)));
        let filtered = filter_context(raw);
        assert_eq!(filtered["s"].preview.chars().count(), MAX_PREVIEW_CHARS + 3);
    }
}
