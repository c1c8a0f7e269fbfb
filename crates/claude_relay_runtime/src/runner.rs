use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::errors::RunnerError;
use crate::registry::{ProcessHandle, ProcessRegistry};
use crate::run_output::RunOutputCollector;
use crate::session_store::SessionStore;
use crate::stream::LineJsonStreamParser;

/// Returned when a run exits cleanly without producing any text.
pub const NO_OUTPUT_PLACEHOLDER: &str = "(no output)";
/// Stderr characters carried in [`RunnerError::AbnormalExit`].
pub const STDERR_EXCERPT_CHARS: usize = 500;

const STDOUT_READ_CHUNK: usize = 8 * 1024;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One prompt for one conversation thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRequest {
    pub thread_id: String,
    pub text: String,
}

impl PromptRequest {
    pub fn new(thread_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            text: text.into(),
        }
    }
}

/// Seam between chat routing and whatever executes prompts.
pub trait PromptBackend: Send + Sync {
    /// Run one prompt; `on_chunk` observes the accumulated text as it grows.
    fn run_prompt<'a>(
        &'a self,
        request: PromptRequest,
        on_chunk: &'a mut (dyn FnMut(&str) + Send),
    ) -> BackendFuture<'a, Result<String, RunnerError>>;

    fn abort(&self, thread_id: &str) -> bool;

    fn clear_session(&self, thread_id: &str) -> bool;
}

/// Runs the Claude CLI once per prompt, keeping one resumable session per thread.
#[derive(Clone)]
pub struct ClaudeRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    config: RunnerConfig,
    sessions: SessionStore,
    processes: ProcessRegistry,
}

impl ClaudeRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RunnerInner {
                config,
                sessions: SessionStore::new(),
                processes: ProcessRegistry::new(),
            }),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Run one prompt without observing intermediate output.
    pub async fn run_prompt_simple(
        &self,
        thread_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<String, RunnerError> {
        self.run_prompt(PromptRequest::new(thread_id, text), |_: &str| {})
            .await
    }

    /// Spawn the CLI for `request`, stream its output into `on_chunk`, and return the
    /// final text.
    ///
    /// Side effects: spawns one child process; records the CLI session id for the thread
    /// on exit (even when the run fails) unless the thread was reset meanwhile.
    /// Errors: `ThreadBusy` when the thread already has a run in flight, `Spawn` when the
    /// CLI cannot start, `AbnormalExit` on a failed exit with no text.
    pub async fn run_prompt<F>(
        &self,
        request: PromptRequest,
        mut on_chunk: F,
    ) -> Result<String, RunnerError>
    where
        F: FnMut(&str) + Send,
    {
        let inner = &self.inner;
        let thread_id = request.thread_id.as_str();
        if inner.processes.is_running(thread_id) {
            return Err(RunnerError::ThreadBusy(request.thread_id));
        }

        let resume = inner.sessions.get(thread_id);
        let args = build_cli_args(&inner.config, &request.text, resume.as_deref());
        let mut child = spawn_cli(&inner.config, &args)?;
        let (stdout, stderr) = match take_pipes(&mut child) {
            Ok(pipes) => pipes,
            Err(err) => {
                if let Err(kill_err) = child.start_kill() {
                    tracing::debug!(thread_id, error = %kill_err, "child kill failed");
                }
                return Err(err);
            }
        };

        let run_id = new_run_id();
        let handle = ProcessHandle::new(run_id.clone(), child.id());
        if inner
            .processes
            .try_register(thread_id, handle.clone())
            .is_err()
        {
            if let Err(err) = child.start_kill() {
                tracing::debug!(thread_id, error = %err, "child kill failed");
            }
            if let Err(err) = child.wait().await {
                tracing::debug!(thread_id, error = %err, "child wait failed");
            }
            return Err(RunnerError::ThreadBusy(request.thread_id));
        }
        let registration = RunRegistration {
            processes: &inner.processes,
            thread_id,
            handle: &handle,
        };
        tracing::debug!(
            thread_id,
            run_id = run_id.as_str(),
            resume = resume.is_some(),
            "claude run started"
        );

        let stderr_task = tokio::spawn(capture_stderr(stderr, inner.config.stderr_capture_bytes));
        let output = stream_stdout(
            &mut child,
            stdout,
            &handle,
            inner.config.max_line_bytes,
            &mut on_chunk,
        )
        .await;
        let waited = child.wait().await;
        // The child is reaped: stop tracking it before stderr reaches EOF, which a
        // surviving grandchild can delay.
        drop(registration);
        let stderr_text = stderr_task.await.unwrap_or_default();

        let (text, session_id) = output.into_parts();
        if let Some(session_id) = session_id {
            if handle.session_discarded() {
                tracing::debug!(thread_id, "thread was reset during run; session not recorded");
            } else {
                inner.sessions.set(thread_id, session_id);
            }
        }

        let status = waited
            .map_err(|err| RunnerError::Io(format!("failed to wait for claude: {err}")))?;
        tracing::debug!(
            thread_id,
            run_id = run_id.as_str(),
            exit_code = ?status.code(),
            text_len = text.len(),
            "claude run finished"
        );
        finish_run(status, text, &stderr_text)
    }

    /// Interrupt the thread's running process. The session is kept.
    pub fn abort(&self, thread_id: &str) -> bool {
        self.inner.processes.abort(thread_id)
    }

    /// Interrupt any running process and forget the thread's session.
    /// Returns whether a session existed.
    pub fn clear_session(&self, thread_id: &str) -> bool {
        self.inner.processes.abort_and_discard_session(thread_id);
        self.inner.sessions.delete(thread_id)
    }

    /// Interrupt every running process.
    pub fn abort_all(&self) -> usize {
        let aborted = self.inner.processes.abort_all();
        if aborted > 0 {
            tracing::info!(aborted, "interrupted all running claude processes");
        }
        aborted
    }

    pub fn session_for(&self, thread_id: &str) -> Option<String> {
        self.inner.sessions.get(thread_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.processes.running_count()
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.inner.processes.is_running(thread_id)
    }
}

impl PromptBackend for ClaudeRunner {
    fn run_prompt<'a>(
        &'a self,
        request: PromptRequest,
        on_chunk: &'a mut (dyn FnMut(&str) + Send),
    ) -> BackendFuture<'a, Result<String, RunnerError>> {
        Box::pin(ClaudeRunner::run_prompt(self, request, on_chunk))
    }

    fn abort(&self, thread_id: &str) -> bool {
        ClaudeRunner::abort(self, thread_id)
    }

    fn clear_session(&self, thread_id: &str) -> bool {
        ClaudeRunner::clear_session(self, thread_id)
    }
}

/// Argument vector for one run, after `cli_prefix_args`.
pub fn build_cli_args(config: &RunnerConfig, prompt: &str, resume: Option<&str>) -> Vec<String> {
    let mut args = config.cli_prefix_args.clone();
    args.extend([
        "-p".to_owned(),
        prompt.to_owned(),
        "--output-format".to_owned(),
        "stream-json".to_owned(),
        "--verbose".to_owned(),
        "--model".to_owned(),
        config.model.clone(),
        "--permission-mode".to_owned(),
        config.permission_mode.clone(),
        "--max-turns".to_owned(),
        config.max_turns.to_string(),
    ]);
    if let Some(session_id) = resume {
        args.push("--resume".to_owned());
        args.push(session_id.to_owned());
    }
    args
}

fn spawn_cli(config: &RunnerConfig, args: &[String]) -> Result<Child, RunnerError> {
    let mut command = Command::new(&config.cli_bin);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &config.env {
        command.env(key, value);
    }

    command.spawn().map_err(|err| {
        RunnerError::Spawn(format!("{}: {err}", config.cli_bin.to_string_lossy()))
    })
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdout, ChildStderr), RunnerError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Spawn("failed to acquire child stdout pipe".to_owned()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Spawn("failed to acquire child stderr pipe".to_owned()))?;
    Ok((stdout, stderr))
}

/// Registry entry of one in-flight run. Dropping it, including when the run future is
/// cancelled, forgets the pid and removes the entry if it still belongs to this run.
struct RunRegistration<'a> {
    processes: &'a ProcessRegistry,
    thread_id: &'a str,
    handle: &'a ProcessHandle,
}

impl Drop for RunRegistration<'_> {
    fn drop(&mut self) {
        self.handle.mark_exited();
        self.processes
            .unregister_run(self.thread_id, self.handle.run_id());
    }
}

/// Read stdout to EOF, feeding every completed line into the collector.
/// An interrupt without a deliverable signal kills the child from here.
async fn stream_stdout<F>(
    child: &mut Child,
    mut stdout: ChildStdout,
    handle: &ProcessHandle,
    max_line_bytes: usize,
    on_chunk: &mut F,
) -> RunOutputCollector
where
    F: FnMut(&str) + Send,
{
    let mut parser = LineJsonStreamParser::with_max_line_bytes(max_line_bytes);
    let mut output = RunOutputCollector::new();
    let mut chunk = vec![0u8; STDOUT_READ_CHUNK];
    let mut kill_sent = false;

    loop {
        tokio::select! {
            read = stdout.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for value in parser.feed(&chunk[..n]) {
                        output.push_value(&value, on_chunk);
                    }
                }
                Err(err) => {
                    tracing::warn!(run_id = handle.run_id(), error = %err, "claude stdout read failed");
                    break;
                }
            },
            _ = handle.interrupted(), if !kill_sent => {
                kill_sent = true;
                if let Err(err) = child.start_kill() {
                    tracing::debug!(run_id = handle.run_id(), error = %err, "child kill failed");
                }
            }
        }
    }

    if parser.malformed_line_count() > 0 {
        tracing::debug!(
            run_id = handle.run_id(),
            dropped = parser.malformed_line_count(),
            "dropped non-json stdout lines"
        );
    }
    if let Some(value) = parser.finish() {
        output.push_value(&value, on_chunk);
    }
    output
}

/// Drain stderr to EOF, keeping at most `limit` bytes.
async fn capture_stderr(mut stderr: ChildStderr, limit: usize) -> String {
    let mut captured = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

fn finish_run(status: ExitStatus, text: String, stderr: &str) -> Result<String, RunnerError> {
    if !status.success() && text.is_empty() {
        return Err(RunnerError::AbnormalExit {
            code: status.code(),
            stderr: stderr_excerpt(stderr),
        });
    }
    if text.is_empty() {
        return Ok(NO_OUTPUT_PLACEHOLDER.to_owned());
    }
    Ok(text)
}

fn stderr_excerpt(stderr: &str) -> String {
    stderr.chars().take(STDERR_EXCERPT_CHARS).collect()
}

fn new_run_id() -> String {
    format!("run_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests;
