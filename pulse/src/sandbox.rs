use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};

use crate::Figure;
use crate::dataset::{Dataset, DatasetSummary};
use crate::protocol::{HostMessage, WireFigure, WorkerMessage};
use crate::workspace::{ContextValue, filter_context};

const WORKER_PY: &str = include_str!("../python/worker.py");

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("worker process exited unexpectedly")]
    WorkerExited,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("spawn error: {0}")]
    Spawn(String),
    #[error("dataset load failed: {0}")]
    DatasetLoad(String),
    #[error("no dataset loaded")]
    NoDataset,
}

/// Everything one execution attempt did, observed without ambiguity.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    /// Captured stdout, verbatim.
    pub output: String,
    pub error: Option<String>,
    /// True when the wall-clock budget expired before the code finished.
    pub timed_out: bool,
    /// Figures produced during this attempt, in creation order.
    pub figures: Vec<Figure>,
    /// Variables introduced by generated code (reserved bindings removed,
    /// previews capped for display).
    pub context: BTreeMap<String, ContextValue>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn failed(error: String, timed_out: bool, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            timed_out,
            figures: Vec::new(),
            context: BTreeMap::new(),
            duration_ms,
        }
    }
}

/// Interpreter-invocation boundary: the workspace lifecycle plus running
/// one code string against it. Implementations may differ (subprocess,
/// embedded interpreter); the capture contract stays fixed. `&mut self`
/// makes a second concurrent writer against one workspace unrepresentable.
#[async_trait::async_trait]
pub trait Sandbox: Send {
    /// Replace the workspace with a fresh one seeded from `dataset`.
    async fn load(&mut self, dataset: Dataset) -> Result<DatasetSummary, SandboxError>;

    /// Run one code string against the live workspace. Infrastructure
    /// faults are `Err`; everything the code itself does, including
    /// raising or timing out, is an `ExecutionResult`.
    async fn execute(&mut self, code: &str) -> Result<ExecutionResult, SandboxError>;
}

/// Configuration for a Python worker sandbox.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Override the Python command (default: "python3").
    pub python: Option<String>,
    /// Working directory for the worker (default: a scratch temp dir).
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the worker.
    pub env: HashMap<String, String>,
    /// Wall-clock budget for one execute call.
    pub execution_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: None,
            working_dir: None,
            env: HashMap::new(),
            execution_timeout: Duration::from_secs(60),
        }
    }
}

impl SandboxConfig {
    /// Overlay `PULSE_PYTHON` and `PULSE_EXECUTION_TIMEOUT` (seconds)
    /// onto the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(python) = std::env::var("PULSE_PYTHON") {
            if !python.is_empty() {
                config.python = Some(python);
            }
        }
        if let Ok(secs) = std::env::var("PULSE_EXECUTION_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.execution_timeout = Duration::from_secs(secs);
            }
        }
        config
    }
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Keeps the harness script on disk for the worker's lifetime.
    _script: tempfile::TempPath,
    _scratch_dir: tempfile::TempDir,
}

impl Worker {
    fn check_alive(&mut self) -> Result<(), SandboxError> {
        match self.child.try_wait() {
            Ok(Some(_status)) => Err(SandboxError::WorkerExited),
            Ok(None) => Ok(()),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn send(&mut self, msg: &HostMessage) -> Result<(), SandboxError> {
        self.check_alive()?;
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<WorkerMessage, SandboxError> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).await?;
        if n == 0 {
            return Err(SandboxError::WorkerExited);
        }
        let msg: WorkerMessage = serde_json::from_str(line.trim())?;
        Ok(msg)
    }

    /// Receive with a deadline. `Ok(None)` means the budget expired while
    /// the worker was still computing.
    async fn recv_deadline(
        &mut self,
        limit: Duration,
    ) -> Result<Option<WorkerMessage>, SandboxError> {
        match tokio::time::timeout(limit, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => {
                self.check_alive()?;
                Ok(None)
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Persistent Python worker hosting the workspace. One worker process per
/// loaded dataset; executions are strictly sequential against it.
pub struct PythonSandbox {
    config: SandboxConfig,
    worker: Option<Worker>,
    dataset: Option<Dataset>,
    summary: Option<DatasetSummary>,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            worker: None,
            dataset: None,
            summary: None,
        }
    }

    /// Summary of the currently loaded dataset, if any.
    pub fn summary(&self) -> Option<&DatasetSummary> {
        self.summary.as_ref()
    }

    async fn spawn_worker(&self) -> Result<Worker, SandboxError> {
        let scratch_dir = tempfile::TempDir::new()?;

        // Write the embedded harness to a temp file the interpreter can run.
        let script = tempfile::NamedTempFile::new()?;
        std::fs::write(script.path(), WORKER_PY)?;

        let program = find_python(&self.config);
        let mut cmd = tokio::process::Command::new(&program);
        cmd.arg(script.path())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .env("PULSE_SCRATCH_DIR", scratch_dir.path());
        match &self.config.working_dir {
            Some(cwd) => {
                cmd.current_dir(cwd);
            }
            None => {
                cmd.current_dir(scratch_dir.path());
            }
        }
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("missing stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("missing stdout".to_string()))?;

        let mut worker = Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            _script: script.into_temp_path(),
            _scratch_dir: scratch_dir,
        };

        match worker.recv().await? {
            WorkerMessage::Ready => {}
            other => {
                return Err(SandboxError::Protocol(format!(
                    "expected ready, got: {other:?}"
                )));
            }
        }

        tracing::debug!(%program, "worker ready");
        Ok(worker)
    }

    async fn load_into_worker(&mut self, dataset: &Dataset) -> Result<DatasetSummary, SandboxError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = HostMessage::Load {
            id: id.clone(),
            name: dataset.name.clone(),
            csv: dataset.csv.clone(),
        };
        let worker = self.worker.as_mut().ok_or(SandboxError::NoDataset)?;
        worker.send(&msg).await?;
        match worker.recv().await? {
            WorkerMessage::LoadResult { error, summary, .. } => {
                if let Some(error) = error {
                    return Err(SandboxError::DatasetLoad(error));
                }
                summary.ok_or_else(|| {
                    SandboxError::Protocol("load_result carried neither summary nor error".into())
                })
            }
            other => Err(SandboxError::Protocol(format!(
                "expected load_result, got: {other:?}"
            ))),
        }
    }

    /// Politely stop the worker and drop the workspace. Dropping the
    /// sandbox kills the process anyway; this waits for a clean exit.
    pub async fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.send(&HostMessage::Shutdown).await;
            let _ = worker.child.wait().await;
        }
        self.dataset = None;
        self.summary = None;
    }

    /// Kill the current worker, start a fresh one, and rebind the dataset.
    /// Variables earlier attempts introduced do not survive this path; the
    /// interpreter that held them is gone.
    async fn respawn(&mut self) -> Result<(), SandboxError> {
        tracing::warn!("respawning worker");
        self.worker = Some(self.spawn_worker().await?);
        let dataset = self.dataset.clone().ok_or(SandboxError::NoDataset)?;
        let summary = self.load_into_worker(&dataset).await?;
        self.summary = Some(summary);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sandbox for PythonSandbox {
    async fn load(&mut self, dataset: Dataset) -> Result<DatasetSummary, SandboxError> {
        // A fresh worker per dataset: the previous workspace, if any, is
        // torn down with its process. State is only rebound once the
        // worker has accepted the dataset, so a failed load leaves the
        // sandbox with no workspace rather than a stale one.
        self.dataset = None;
        self.summary = None;
        self.worker = Some(self.spawn_worker().await?);
        let summary = self.load_into_worker(&dataset).await?;
        tracing::info!(
            dataset = %dataset.name,
            rows = summary.rows,
            columns = summary.columns,
            "dataset loaded"
        );
        self.dataset = Some(dataset);
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    async fn execute(&mut self, code: &str) -> Result<ExecutionResult, SandboxError> {
        if self.dataset.is_none() {
            return Err(SandboxError::NoDataset);
        }
        let start = Instant::now();
        let budget = self.config.execution_timeout;
        let deadline = start + budget;
        let id = uuid::Uuid::new_v4().to_string();

        let worker = self.worker.as_mut().ok_or(SandboxError::NoDataset)?;
        worker
            .send(&HostMessage::Exec {
                id: id.clone(),
                code: code.to_string(),
            })
            .await?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let worker = self.worker.as_mut().ok_or(SandboxError::NoDataset)?;
            match worker.recv_deadline(remaining).await {
                Ok(Some(WorkerMessage::ExecResult {
                    id: got,
                    success,
                    output,
                    error,
                    figures,
                    context,
                })) => {
                    if got != id {
                        return Err(SandboxError::Protocol(format!(
                            "exec_result for unknown request {got}"
                        )));
                    }
                    return Ok(ExecutionResult {
                        success,
                        output,
                        error,
                        timed_out: false,
                        figures: decode_figures(figures),
                        context: filter_context(context),
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Ok(Some(WorkerMessage::Ready)) => {
                    // Harmless duplicate.
                }
                Ok(Some(other)) => {
                    return Err(SandboxError::Protocol(format!(
                        "unexpected message during exec: {other:?}"
                    )));
                }
                Ok(None) => {
                    // Budget spent; there is no way to interrupt the worker
                    // mid-computation, so replace it and rebind the dataset.
                    tracing::warn!(budget_secs = budget.as_secs(), "execution timed out");
                    self.respawn().await?;
                    return Ok(ExecutionResult::failed(
                        format!(
                            "execution timed out after {}s; the wall-clock budget was exceeded",
                            budget.as_secs()
                        ),
                        true,
                        start.elapsed().as_millis() as u64,
                    ));
                }
                Err(SandboxError::WorkerExited) => {
                    // The code killed the interpreter (os._exit, crash).
                    // That is an effect of the code, not an infrastructure
                    // fault: report it as a failed attempt and recover.
                    tracing::warn!("worker died during execution");
                    self.respawn().await?;
                    return Ok(ExecutionResult::failed(
                        "interpreter process exited during execution".to_string(),
                        false,
                        start.elapsed().as_millis() as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn find_python(config: &SandboxConfig) -> String {
    config
        .python
        .clone()
        .unwrap_or_else(|| "python3".to_string())
}

fn decode_figures(wire: Vec<WireFigure>) -> Vec<Figure> {
    wire.into_iter()
        .enumerate()
        .map(|(seq, f)| {
            let data = if f.mime == "image/png" {
                match base64::engine::general_purpose::STANDARD.decode(&f.data) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(label = %f.label, error = %e, "bad figure payload");
                        Vec::new()
                    }
                }
            } else {
                f.data.into_bytes()
            };
            Figure {
                seq,
                mime: f.mime,
                data,
                label: f.label,
            }
        })
        .collect()
}
