//! Claude CLI process runner.
//!
//! One prompt = one child process. Stdout is split into JSON lines, folded into the
//! assistant text, and the CLI session id is remembered per thread so the next prompt
//! resumes the same conversation.

pub mod config;
pub mod errors;
pub mod registry;
pub mod run_output;
pub mod runner;
pub mod session_store;
pub mod stream;

pub use config::RunnerConfig;
pub use errors::RunnerError;
pub use registry::{ProcessHandle, ProcessRegistry};
pub use run_output::RunOutputCollector;
pub use runner::{
    build_cli_args, BackendFuture, ClaudeRunner, PromptBackend, PromptRequest,
    NO_OUTPUT_PLACEHOLDER, STDERR_EXCERPT_CHARS,
};
pub use session_store::SessionStore;
pub use stream::{LineJsonStreamParser, StreamEvent, DEFAULT_MAX_LINE_BYTES};
