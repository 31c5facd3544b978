//! Command-backed injection sink.
//!
//! Each sequence is an external command defined in the configuration file.
//! The message body is written to the command's stdin and the transport
//! headers are exported as `INBOUND_HEADER_*` environment variables.
//! Arguments may use `{file}`, `{basename}`, `{id}` and `{sequence}`
//! placeholders.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::sink::{InjectError, InjectStatus, InjectionSink, Message};
use crate::file::{HEADER_FILE_NAME, HEADER_FILE_PATH};

/// Sequence definition from the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SequenceConfig {
    /// Command to execute.
    pub command: String,
    /// Arguments (placeholders are expanded per message).
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout in seconds (default: 60).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Exit codes that request redelivery instead of failure (default: 75).
    #[serde(default = "default_rollback_codes")]
    pub rollback_exit_codes: Vec<i32>,
}

fn default_timeout() -> u64 {
    60
}

fn default_rollback_codes() -> Vec<i32> {
    vec![75]
}

impl SequenceConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_seconds: default_timeout(),
            rollback_exit_codes: default_rollback_codes(),
        }
    }
}

/// Turn a header key into an environment variable suffix.
fn env_key(header: &str) -> String {
    header
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub struct CommandSink {
    sequences: HashMap<String, SequenceConfig>,
}

impl CommandSink {
    pub fn new(sequences: HashMap<String, SequenceConfig>) -> Self {
        Self { sequences }
    }

    fn expand_arg(arg: &str, message: &Message, sequence: &str) -> String {
        let file = message
            .headers
            .get(HEADER_FILE_PATH)
            .map(String::as_str)
            .unwrap_or("");
        let basename = message
            .headers
            .get(HEADER_FILE_NAME)
            .map(String::as_str)
            .unwrap_or("");
        arg.replace("{file}", file)
            .replace("{basename}", basename)
            .replace("{id}", &message.id)
            .replace("{sequence}", sequence)
    }

    fn build_command(config: &SequenceConfig, message: &Message, sequence: &str) -> Command {
        let mut cmd = Command::new(&config.command);
        cmd.args(
            config
                .args
                .iter()
                .map(|arg| Self::expand_arg(arg, message, sequence)),
        )
        .envs(&config.env)
        .env("INBOUND_SEQUENCE", sequence)
        .env("INBOUND_MESSAGE_ID", &message.id)
        .env("INBOUND_CONTENT_TYPE", &message.content_type)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        for (key, value) in &message.headers {
            cmd.env(format!("INBOUND_HEADER_{}", env_key(key)), value);
        }
        cmd
    }
}

#[async_trait]
impl InjectionSink for CommandSink {
    fn has_sequence(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
    }

    async fn inject(
        &self,
        message: &Message,
        sequence: &str,
    ) -> Result<InjectStatus, InjectError> {
        let config = self
            .sequences
            .get(sequence)
            .ok_or_else(|| InjectError::SequenceNotFound(sequence.to_string()))?;

        let mut child = Self::build_command(config, message, sequence)
            .spawn()
            .map_err(|source| InjectError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        // Feeding stdin and waiting share one deadline: a command that neither
        // reads its input nor exits would otherwise block the write forever.
        // On expiry the child is dropped, which kills it.
        let stdin = child.stdin.take();
        let body = message.body.to_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that exits without reading stdin closes the pipe early.
                if let Err(e) = stdin.write_all(&body).await {
                    debug!("{}: stdin closed early: {}", sequence, e);
                }
            }
        };
        let run = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let timeout = Duration::from_secs(config.timeout_seconds);
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    "{}: {} did not finish within {}s, killed",
                    sequence, message.id, config.timeout_seconds
                );
                return Err(InjectError::Timeout {
                    sequence: sequence.to_string(),
                    seconds: config.timeout_seconds,
                });
            }
        };

        match output.status.code() {
            Some(0) => Ok(InjectStatus::Accepted),
            Some(code) if config.rollback_exit_codes.contains(&code) => {
                debug!("{}: exit {} requests rollback of {}", sequence, code, message.id);
                Ok(InjectStatus::Rollback)
            }
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "{}: rejected {} (exit {:?}): {}",
                    sequence,
                    message.id,
                    code,
                    stderr.trim()
                );
                Ok(InjectStatus::Rejected)
            }
        }
    }
}
