use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::RunnerError;
use crate::stream::DEFAULT_MAX_LINE_BYTES;

pub const CLI_BIN_ENV: &str = "CLAUDE_BIN";
pub const WORKING_DIR_ENV: &str = "CLAUDE_WORKING_DIR";
pub const MODEL_ENV: &str = "CLAUDE_MODEL";
pub const PERMISSION_MODE_ENV: &str = "CLAUDE_PERMISSION_MODE";
pub const MAX_TURNS_ENV: &str = "CLAUDE_MAX_TURNS";

pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_PERMISSION_MODE: &str = "acceptEdits";
pub const DEFAULT_MAX_TURNS: u32 = 25;
pub const DEFAULT_STDERR_CAPTURE_BYTES: usize = 64 * 1024;

/// How the runner launches the CLI. Values are passed through to argv unmodified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    pub cli_bin: PathBuf,
    /// Arguments placed before the generated ones (wrapper scripts, `sh -c` in tests).
    pub cli_prefix_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub model: String,
    pub permission_mode: String,
    pub max_turns: u32,
    pub env: HashMap<String, String>,
    pub max_line_bytes: usize,
    pub stderr_capture_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cli_bin: PathBuf::from("claude"),
            cli_prefix_args: Vec::new(),
            working_dir: None,
            model: DEFAULT_MODEL.to_owned(),
            permission_mode: DEFAULT_PERMISSION_MODE.to_owned(),
            max_turns: DEFAULT_MAX_TURNS,
            env: HashMap::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            stderr_capture_bytes: DEFAULT_STDERR_CAPTURE_BYTES,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `CLAUDE_*` environment variables.
    /// Side effects: reads process env.
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(bin) = read(CLI_BIN_ENV) {
            config.cli_bin = PathBuf::from(bin);
        }
        if let Some(dir) = read(WORKING_DIR_ENV) {
            config.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(model) = read(MODEL_ENV) {
            config.model = model;
        }
        if let Some(mode) = read(PERMISSION_MODE_ENV) {
            config.permission_mode = mode;
        }
        if let Some(raw) = read(MAX_TURNS_ENV) {
            config.max_turns = raw.parse().map_err(|_| {
                RunnerError::InvalidConfig(format!("{MAX_TURNS_ENV} must be an integer: {raw}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_cli_bin(mut self, cli_bin: impl Into<PathBuf>) -> Self {
        self.cli_bin = cli_bin.into();
        self
    }

    pub fn with_cli_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cli_prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_permission_mode(mut self, permission_mode: impl Into<String>) -> Self {
        self.permission_mode = permission_mode.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.cli_bin.as_os_str().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "cli_bin must not be empty".to_owned(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "model must not be empty".to_owned(),
            ));
        }
        if self.permission_mode.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "permission_mode must not be empty".to_owned(),
            ));
        }
        if self.max_turns == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_turns must be > 0".to_owned(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_line_bytes must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}
