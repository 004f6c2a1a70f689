use std::collections::BTreeMap;
use std::path::Path;

/// A tabular dataset as supplied by the caller. The CSV text is retained
/// for the lifetime of the workspace so the worker can be re-seeded after
/// a timeout or crash recovery.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub name: String,
    pub csv: String,
}

impl Dataset {
    pub fn new(name: impl Into<String>, csv: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            csv: csv.into(),
        }
    }

    /// Read a CSV file from disk; the dataset name is the file stem.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let csv = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        Ok(Self { name, csv })
    }
}

/// Structural profile of a loaded dataset, computed in the worker at load
/// time. Fed to the code generator so it can reason about columns and
/// types without seeing the full data.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: usize,
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    #[serde(default)]
    pub missing: BTreeMap<String, u64>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    #[serde(default)]
    pub categorical_columns: Vec<String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub head: serde_json::Value,
    #[serde(default)]
    pub describe: serde_json::Value,
}
