//! Local LM command client.
//!
//! Runs a user-configured command with the prompt on stdin and returns its
//! stdout. Any tool that reads text and writes text works (`llm`,
//! `ollama run`, a wrapper script).
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use super::AiClient;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct CommandClient {
    argv: Vec<String>,
}

impl CommandClient {
    /// Parse `command` with shell quoting rules.
    pub fn new(command: &str) -> anyhow::Result<Self> {
        let argv = shell_words::split(command)
            .map_err(|err| anyhow::anyhow!("parse LM command `{command}`: {err}"))?;
        if argv.is_empty() {
            return Err(anyhow::anyhow!("LM command is empty"));
        }
        Ok(Self { argv })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl AiClient for CommandClient {
    fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let start = Instant::now();
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProviderError::fatal(format!("spawn LM command {}: {err}", self.argv[0])))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that exits without reading its input closes the pipe;
            // its exit status decides the outcome.
            if let Err(err) = stdin.write_all(prompt.as_bytes()) {
                tracing::debug!(error = %err, "LM command closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|err| ProviderError::transient(format!("wait for LM command: {err}")))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            elapsed_ms,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm invoke complete"
        );

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = ProviderError::transient(format!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
            return Err(if stdout.is_empty() {
                error
            } else {
                error.with_raw_response(stdout)
            });
        }
        if stdout.trim().is_empty() {
            return Err(ProviderError::transient("LM command produced no output"));
        }
        Ok(stdout)
    }

    fn describe(&self) -> String {
        format!("command {}", self.argv[0])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn echoes_stdin_through_cat() {
        let client = CommandClient::new("cat").expect("client");
        assert_eq!(client.send("{\"industry\": \"x\"}").expect("send"), "{\"industry\": \"x\"}");
    }

    #[test]
    fn failing_command_is_retryable_with_stderr() {
        let client = CommandClient::new("sh -c 'echo quota exceeded >&2; exit 3'").expect("client");
        let err = client.send("prompt").expect_err("fails");
        assert!(err.retryable);
        assert!(err.message.contains("quota exceeded"));
    }

    #[test]
    fn missing_program_is_fatal() {
        let client = CommandClient::new("lmenrich-no-such-binary --flag").expect("client");
        let err = client.send("prompt").expect_err("spawn fails");
        assert!(!err.retryable);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandClient::new("   ").is_err());
        assert!(CommandClient::new("'unterminated").is_err());
    }
}
