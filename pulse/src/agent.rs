use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::Figure;
use crate::collab::{
    CodeFixer, CodeGenerator, CollabError, GenerationRequest, ReportSummarizer, SummaryRequest,
};
use crate::controller::{ControllerError, RetryController, Verdict};
use crate::dataset::{Dataset, DatasetSummary};
use crate::fence;
use crate::history::{ConversationHistory, ConversationTurn};
use crate::sandbox::{Sandbox, SandboxError};
use crate::workspace::ContextValue;

/// Tunables for the instruction-processing loop.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Total execution attempts per instruction, first included.
    pub max_retries: usize,
    /// Turns read back into generation context.
    pub history_window: usize,
    /// Bound on generator and fixer calls. `None` blocks indefinitely,
    /// matching the historical behavior.
    pub collab_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            history_window: 3,
            collab_timeout: None,
        }
    }
}

impl AgentConfig {
    /// Overlay `PULSE_MAX_RETRIES` onto the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("PULSE_MAX_RETRIES") {
            if let Ok(n) = v.parse::<usize>() {
                config.max_retries = n.max(1);
            }
        }
        config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no dataset loaded")]
    NoDataset,
    #[error("code generation failed: {0}")]
    Generation(CollabError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Caller-facing payload for one processed instruction. The sole data
/// contract the presentation layer may depend on.
#[derive(Clone, Debug)]
pub struct InstructionOutcome {
    pub success: bool,
    /// The last code variant that was executed.
    pub code: String,
    pub output: String,
    pub error: Option<String>,
    pub figures: Vec<Figure>,
    /// Post-success prose summary; empty when unavailable.
    pub report: String,
    pub context: BTreeMap<String, ContextValue>,
}

/// End-to-end instruction processor: generate, execute with repair,
/// summarize, remember. One agent owns one workspace; a second user needs
/// a second agent.
pub struct Agent<S: Sandbox> {
    sandbox: S,
    generator: Arc<dyn CodeGenerator>,
    controller: RetryController,
    summarizer: Arc<dyn ReportSummarizer>,
    config: AgentConfig,
    summary: Option<DatasetSummary>,
    history: ConversationHistory,
}

impl<S: Sandbox> Agent<S> {
    pub fn new(
        sandbox: S,
        generator: Arc<dyn CodeGenerator>,
        fixer: Arc<dyn CodeFixer>,
        summarizer: Arc<dyn ReportSummarizer>,
        config: AgentConfig,
    ) -> Self {
        let mut controller = RetryController::new(fixer, config.max_retries);
        if let Some(limit) = config.collab_timeout {
            controller = controller.with_fixer_timeout(limit);
        }
        Self {
            sandbox,
            generator,
            controller,
            summarizer,
            history: ConversationHistory::new(config.history_window),
            config,
            summary: None,
        }
    }

    /// (Re)create the workspace from a dataset and remember its summary.
    pub async fn load(&mut self, dataset: Dataset) -> Result<DatasetSummary, AgentError> {
        let summary = self.sandbox.load(dataset).await?;
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    pub fn summary(&self) -> Option<&DatasetSummary> {
        self.summary.as_ref()
    }

    /// All completed turns, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        self.history.turns()
    }

    /// Process one natural-language instruction end to end.
    pub async fn process_instruction(
        &mut self,
        instruction: &str,
    ) -> Result<InstructionOutcome, AgentError> {
        let summary = self.summary.as_ref().ok_or(AgentError::NoDataset)?;

        let request = GenerationRequest {
            summary,
            instruction,
            recent_history: self.history.recent(),
        };
        let reply = match self.config.collab_timeout {
            Some(limit) => tokio::time::timeout(limit, self.generator.generate(request))
                .await
                .map_err(|_| AgentError::Generation(CollabError::TimedOut(limit)))?
                .map_err(AgentError::Generation)?,
            None => self
                .generator
                .generate(request)
                .await
                .map_err(AgentError::Generation)?,
        };
        let code = fence::extract_code(&reply);
        if code.trim().is_empty() {
            return Err(AgentError::Generation(CollabError::EmptyReply));
        }

        let outcome = self.controller.run(&mut self.sandbox, code).await?;

        let mut report = String::new();
        if outcome.verdict == Verdict::Succeeded {
            let metrics: BTreeMap<String, String> = outcome
                .result
                .context
                .iter()
                .map(|(name, value)| (name.clone(), value.preview.clone()))
                .collect();
            let request = SummaryRequest {
                metrics: &metrics,
                combined_output: &outcome.result.output,
            };
            match self.summarizer.summarize(request).await {
                Ok(text) => report = text,
                Err(e) => {
                    // A failed summary never invalidates a successful run.
                    tracing::warn!(error = %e, "report summarizer failed");
                }
            }
        }

        let response_summary = if !report.is_empty() {
            report.clone()
        } else if let Some(error) = &outcome.result.error {
            error.clone()
        } else {
            "execution completed without a report".to_string()
        };
        self.history.push(instruction, response_summary);

        Ok(InstructionOutcome {
            success: outcome.result.success,
            code: outcome.code,
            output: outcome.result.output,
            error: outcome.result.error,
            figures: outcome.result.figures,
            report,
            context: outcome.result.context,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::collab::RepairRequest;
    use crate::sandbox::ExecutionResult;

    fn result_with(success: bool, output: &str, error: Option<&str>) -> ExecutionResult {
        let mut context = BTreeMap::new();
        context.insert(
            "result".to_string(),
            ContextValue {
                type_name: "int".into(),
                preview: "5".into(),
            },
        );
        ExecutionResult {
            success,
            output: output.into(),
            error: error.map(String::from),
            timed_out: false,
            figures: Vec::new(),
            context,
            duration_ms: 1,
        }
    }

    struct FakeSandbox {
        results: Mutex<Vec<ExecutionResult>>,
        executed: Mutex<Vec<String>>,
    }

    impl FakeSandbox {
        fn new(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Sandbox for FakeSandbox {
        async fn load(&mut self, _dataset: Dataset) -> Result<DatasetSummary, SandboxError> {
            Ok(DatasetSummary {
                rows: 5,
                columns: 2,
                ..DatasetSummary::default()
            })
        }

        async fn execute(&mut self, code: &str) -> Result<ExecutionResult, SandboxError> {
            self.executed.lock().unwrap().push(code.to_string());
            Ok(self.results.lock().unwrap().remove(0))
        }
    }

    /// Generator that replies with a fixed fenced block and records the
    /// history window it was shown.
    struct FakeGenerator {
        reply: String,
        seen_history: Mutex<Vec<usize>>,
    }

    impl FakeGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                seen_history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CodeGenerator for FakeGenerator {
        async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, CollabError> {
            self.seen_history
                .lock()
                .unwrap()
                .push(request.recent_history.len());
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait::async_trait]
    impl CodeGenerator for FailingGenerator {
        async fn generate(&self, _request: GenerationRequest<'_>) -> Result<String, CollabError> {
            Err(CollabError::Unreachable("dns".into()))
        }
    }

    struct EchoFixer;

    #[async_trait::async_trait]
    impl CodeFixer for EchoFixer {
        async fn fix(&self, request: RepairRequest<'_>) -> Result<String, CollabError> {
            Ok(format!("```python\n{}\n```", request.failing_code))
        }
    }

    struct FixedSummarizer(&'static str);

    #[async_trait::async_trait]
    impl ReportSummarizer for FixedSummarizer {
        async fn summarize(&self, _request: SummaryRequest<'_>) -> Result<String, CollabError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait::async_trait]
    impl ReportSummarizer for FailingSummarizer {
        async fn summarize(&self, _request: SummaryRequest<'_>) -> Result<String, CollabError> {
            Err(CollabError::Unreachable("down".into()))
        }
    }

    fn agent_with(
        results: Vec<ExecutionResult>,
        generator: Arc<dyn CodeGenerator>,
        summarizer: Arc<dyn ReportSummarizer>,
    ) -> Agent<FakeSandbox> {
        Agent::new(
            FakeSandbox::new(results),
            generator,
            Arc::new(EchoFixer),
            summarizer,
            AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn instruction_before_load_is_rejected() {
        let mut agent = agent_with(
            vec![],
            Arc::new(FakeGenerator::new("```python\nx = 1\n```")),
            Arc::new(FixedSummarizer("fine")),
        );
        let err = agent.process_instruction("count rows").await.unwrap_err();
        assert!(matches!(err, AgentError::NoDataset));
    }

    #[tokio::test]
    async fn happy_path_produces_report_and_history() {
        let mut agent = agent_with(
            vec![result_with(true, "5\n", None)],
            Arc::new(FakeGenerator::new(
                "```python\nresult = len(df)\nprint(result)\n```",
            )),
            Arc::new(FixedSummarizer("five rows of sales data")),
        );
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        let outcome = agent.process_instruction("count rows").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.code, "result = len(df)\nprint(result)");
        assert_eq!(outcome.output, "5\n");
        assert_eq!(outcome.report, "five rows of sales data");
        assert_eq!(outcome.context["result"].preview, "5");

        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history()[0].instruction, "count rows");
        assert_eq!(agent.history()[0].response_summary, "five rows of sales data");
    }

    #[tokio::test]
    async fn generator_transport_failure_is_a_generation_error() {
        let mut agent = agent_with(
            vec![],
            Arc::new(FailingGenerator),
            Arc::new(FixedSummarizer("unused")),
        );
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        let err = agent.process_instruction("count rows").await.unwrap_err();
        assert!(matches!(err, AgentError::Generation(_)));
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn prose_only_generator_reply_is_unusable() {
        let mut agent = agent_with(
            vec![],
            Arc::new(FakeGenerator::new("")),
            Arc::new(FixedSummarizer("unused")),
        );
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        let err = agent.process_instruction("count rows").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Generation(CollabError::EmptyReply)
        ));
    }

    #[tokio::test]
    async fn summarizer_failure_keeps_the_successful_result() {
        let mut agent = agent_with(
            vec![result_with(true, "ok\n", None)],
            Arc::new(FakeGenerator::new("```python\nprint('ok')\n```")),
            Arc::new(FailingSummarizer),
        );
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        let outcome = agent.process_instruction("do it").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.report.is_empty());
        assert_eq!(agent.history().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_the_last_error_verbatim() {
        let mut agent = agent_with(
            vec![
                result_with(false, "", Some("error one")),
                result_with(false, "", Some("error two")),
                result_with(false, "", Some("error three")),
            ],
            Arc::new(FakeGenerator::new("```python\nbad()\n```")),
            Arc::new(FixedSummarizer("unused")),
        );
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        let outcome = agent.process_instruction("do it").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("error three"));
        assert!(outcome.report.is_empty());
        assert_eq!(agent.history()[0].response_summary, "error three");
    }

    #[tokio::test]
    async fn generator_sees_at_most_the_history_window() {
        let generator = Arc::new(FakeGenerator::new("```python\nprint('ok')\n```"));
        let results = (0..5).map(|_| result_with(true, "ok\n", None)).collect();
        let mut agent = agent_with(results, generator.clone(), Arc::new(FixedSummarizer("r")));
        agent.load(Dataset::new("sales", "a\n1\n")).await.unwrap();

        for i in 0..5 {
            agent
                .process_instruction(&format!("instruction {i}"))
                .await
                .unwrap();
        }

        let seen = generator.seen_history.lock().unwrap();
        assert_eq!(*seen, vec![0, 1, 2, 3, 3]);
        assert_eq!(agent.history().len(), 5);
    }

    #[tokio::test]
    async fn default_config_values() {
        let config = AgentConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.history_window, 3);
        assert!(config.collab_timeout.is_none());
    }
}
