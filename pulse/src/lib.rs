pub mod agent;
pub mod collab;
pub mod controller;
pub mod dataset;
pub mod fence;
pub mod history;
pub mod protocol;
pub mod sandbox;
pub mod workspace;

// Re-exports
pub use agent::{Agent, AgentConfig, AgentError, InstructionOutcome};
pub use collab::{
    CodeFixer, CodeGenerator, CollabError, GenerationRequest, RepairRequest, ReportSummarizer,
    SummaryRequest,
};
pub use controller::{ControllerError, RepairOutcome, RetryController, Verdict};
pub use dataset::{Dataset, DatasetSummary};
pub use history::{ConversationHistory, ConversationTurn};
pub use sandbox::{ExecutionResult, PythonSandbox, Sandbox, SandboxConfig, SandboxError};
pub use workspace::{ContextValue, RESERVED_BINDINGS};

/// An opaque handle to one generated visualization artifact.
#[derive(Clone, Debug)]
pub struct Figure {
    /// Position in creation order within one execution.
    pub seq: usize,
    /// "image/png" for rendered charts, "application/vnd.plotly.v1+json"
    /// for figure specs.
    pub mime: String,
    pub data: Vec<u8>,
    pub label: String,
}

impl Figure {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}
