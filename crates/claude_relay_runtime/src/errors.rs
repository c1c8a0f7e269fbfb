use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunnerError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("failed to start claude cli: {0}")]
    Spawn(String),
    #[error("{}", format_abnormal_exit(*code, stderr))]
    AbnormalExit { code: Option<i32>, stderr: String },
    #[error("a run is already in progress for thread {0}")]
    ThreadBusy(String),
    #[error("io error: {0}")]
    Io(String),
}

fn format_abnormal_exit(code: Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("claude exited with code {code}"),
        None => "claude was terminated by a signal".to_owned(),
    };
    if stderr.trim().is_empty() {
        status
    } else {
        format!("{status}: {}", stderr.trim_end())
    }
}
