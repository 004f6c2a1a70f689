use std::sync::Arc;
use std::time::Duration;

use crate::collab::{CodeFixer, CollabError, RepairRequest};
use crate::fence;
use crate::sandbox::{ExecutionResult, Sandbox, SandboxError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("code fixer failed: {0}")]
    Fixer(#[from] CollabError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Terminal verdict of one repair loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct RepairOutcome {
    /// The first successful result, or the last failing one unmodified.
    pub result: ExecutionResult,
    /// The code string the final attempt actually executed.
    pub code: String,
    pub attempts: usize,
    pub verdict: Verdict,
}

/// Drives up to `max_retries` execution attempts for one instruction,
/// asking the fixer collaborator for replacement code between failures.
pub struct RetryController {
    fixer: Arc<dyn CodeFixer>,
    max_retries: usize,
    fixer_timeout: Option<Duration>,
}

impl RetryController {
    pub fn new(fixer: Arc<dyn CodeFixer>, max_retries: usize) -> Self {
        Self {
            fixer,
            max_retries: max_retries.max(1),
            fixer_timeout: None,
        }
    }

    /// Bound each fixer call. Without this the call blocks indefinitely,
    /// matching the historical behavior.
    pub fn with_fixer_timeout(mut self, timeout: Duration) -> Self {
        self.fixer_timeout = Some(timeout);
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Execute `code`, repairing and retrying on failure until success or
    /// the budget is spent. The first attempt counts against the budget;
    /// with a budget of one the fixer is never consulted. Fixer transport
    /// failures abort the loop: repair is only for execution failures.
    pub async fn run<S: Sandbox>(
        &self,
        sandbox: &mut S,
        code: String,
    ) -> Result<RepairOutcome, ControllerError> {
        let mut code = code;
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(attempt, max = self.max_retries, "executing attempt");
            let result = sandbox.execute(&code).await?;

            if result.success {
                tracing::info!(attempt, "execution succeeded");
                return Ok(RepairOutcome {
                    result,
                    code,
                    attempts: attempt,
                    verdict: Verdict::Succeeded,
                });
            }

            let error_text = result.error.clone().unwrap_or_default();
            tracing::warn!(attempt, error = %error_text, "execution failed");

            if attempt >= self.max_retries {
                // The caller sees the final error verbatim, never a
                // synthesized "gave up" message.
                return Ok(RepairOutcome {
                    result,
                    code,
                    attempts: attempt,
                    verdict: Verdict::Exhausted,
                });
            }

            let reply = self.request_fix(&code, &error_text).await?;
            let fixed = fence::extract_code(&reply);
            if fixed.trim().is_empty() {
                return Err(ControllerError::Fixer(CollabError::EmptyReply));
            }
            code = fixed;
        }
    }

    async fn request_fix(
        &self,
        failing_code: &str,
        error_text: &str,
    ) -> Result<String, CollabError> {
        let request = RepairRequest {
            failing_code,
            error_text,
        };
        match self.fixer_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fixer.fix(request))
                .await
                .map_err(|_| CollabError::TimedOut(limit))?,
            None => self.fixer.fix(request).await,
        }
    }
}
