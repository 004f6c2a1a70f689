//! Wire protocol between the host and the Python worker: one JSON object
//! per line, tagged by `type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetSummary;
use crate::workspace::ContextValue;

// --- Host → worker (stdin) ---

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "load")]
    Load { id: String, name: String, csv: String },
    #[serde(rename = "exec")]
    Exec { id: String, code: String },
    #[serde(rename = "shutdown")]
    Shutdown,
}

// --- Worker → host (stdout) ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "load_result")]
    LoadResult {
        id: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        summary: Option<DatasetSummary>,
    },
    #[serde(rename = "exec_result")]
    ExecResult {
        id: String,
        success: bool,
        output: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        figures: Vec<WireFigure>,
        #[serde(default)]
        context: BTreeMap<String, ContextValue>,
    },
}

/// A figure as shipped over the wire. PNG payloads are base64; Plotly
/// payloads are the figure JSON itself.
#[derive(Debug, Clone, Deserialize)]
pub struct WireFigure {
    pub mime: String,
    pub data: String,
    pub label: String,
}
