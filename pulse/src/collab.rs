//! Collaborator seams: natural-language-to-code, code repair, and report
//! summarization are consumed through these traits, never implemented
//! against a provider here.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::dataset::DatasetSummary;
use crate::history::ConversationTurn;

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("collaborator unreachable: {0}")]
    Unreachable(String),
    #[error("collaborator returned unusable text")]
    EmptyReply,
    #[error("collaborator call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Everything the code generator sees for one instruction.
#[derive(Clone, Debug)]
pub struct GenerationRequest<'a> {
    pub summary: &'a DatasetSummary,
    pub instruction: &'a str,
    /// The most recent turns, oldest first.
    pub recent_history: &'a [ConversationTurn],
}

#[derive(Clone, Debug)]
pub struct RepairRequest<'a> {
    pub failing_code: &'a str,
    pub error_text: &'a str,
}

#[derive(Clone, Debug)]
pub struct SummaryRequest<'a> {
    /// Variables the generated code introduced, as display previews.
    pub metrics: &'a BTreeMap<String, String>,
    pub combined_output: &'a str,
}

#[async_trait::async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Turn an instruction into a code string (markdown-fenced or raw).
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, CollabError>;
}

#[async_trait::async_trait]
pub trait CodeFixer: Send + Sync {
    /// Produce a replacement for code that failed with the given error.
    async fn fix(&self, request: RepairRequest<'_>) -> Result<String, CollabError>;
}

#[async_trait::async_trait]
pub trait ReportSummarizer: Send + Sync {
    /// Turn metrics and captured output into a prose summary.
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String, CollabError>;
}
