//! Shell command execution tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::registry::{Tool, ToolConfig};
use crate::result::ToolResult;

/// Shell tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Command to execute.
    pub command: String,

    /// Shell to use (default: "bash").
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_shell() -> String {
    "bash".to_string()
}

/// Shell command execution tool.
pub struct ShellTool;

impl ShellTool {
    /// Create a new shell tool.
    pub fn new() -> Self {
        Self
    }

    /// Execute a shell command.
    ///
    /// Honors the context's cancellation token: the child is killed and
    /// `ToolError::Cancelled` returned when it fires mid-run.
    pub async fn execute_command(
        &self,
        config: &ShellConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&config.shell);
        cmd.arg("-c").arg(&config.command);

        if let Some(ref dir) = config.cwd {
            cmd.current_dir(dir);
        }

        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Process(format!("Failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        enum WaitOutcome {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let deadline = config.timeout_seconds.map(Duration::from_secs);
        let outcome = match deadline {
            Some(duration) => {
                tokio::select! {
                    result = timeout(duration, child.wait()) => match result {
                        Ok(wait) => WaitOutcome::Exited(wait),
                        Err(_) => WaitOutcome::TimedOut,
                    },
                    _ = ctx.cancellation.cancelled() => WaitOutcome::Cancelled,
                }
            }
            None => {
                tokio::select! {
                    wait = child.wait() => WaitOutcome::Exited(wait),
                    _ = ctx.cancellation.cancelled() => WaitOutcome::Cancelled,
                }
            }
        };

        let status = match outcome {
            WaitOutcome::Exited(result) => result
                .map_err(|e| ToolError::Process(format!("Failed to wait for process: {}", e)))?,
            WaitOutcome::TimedOut => {
                let _ = child.kill().await;
                let duration_ms = start.elapsed().as_millis() as u64;
                return Ok(ToolResult::timeout(config.timeout_seconds.unwrap_or(0))
                    .with_duration(duration_ms));
            }
            WaitOutcome::Cancelled => {
                let _ = child.kill().await;
                return Err(ToolError::Cancelled);
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(ToolResult::from_process(exit_code, stdout, stderr).with_duration(duration_ms))
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(
        &self,
        config: &ToolConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let mut shell_config: ShellConfig = serde_json::from_value(config.config.clone())
            .map_err(|e| ToolError::Configuration(format!("Invalid shell config: {}", e)))?;

        if shell_config.timeout_seconds.is_none() {
            shell_config.timeout_seconds = config.timeout;
        }

        tracing::debug!(
            command = %shell_config.command,
            shell = %shell_config.shell,
            cwd = ?shell_config.cwd,
            "Executing shell command"
        );

        self.execute_command(&shell_config, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ToolStatus;
    use tokio_util::sync::CancellationToken;

    fn shell_config(command: &str) -> ShellConfig {
        ShellConfig {
            command: command.to_string(),
            shell: "bash".to_string(),
            cwd: None,
            env: HashMap::new(),
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_shell_echo() {
        let tool = ShellTool::new();
        let ctx = ExecutionContext::default();
        let result = tool
            .execute_command(&shell_config("echo 'hello world'"), &ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        let data = result.data.unwrap();
        assert_eq!(data["exit_code"], 0);
        assert!(data["stdout"].as_str().unwrap().contains("hello world"));
    }

    #[tokio::test]
    async fn test_shell_exit_code() {
        let tool = ShellTool::new();
        let ctx = ExecutionContext::default();
        let result = tool
            .execute_command(&shell_config("exit 42"), &ctx)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.data.unwrap()["exit_code"], 42);
    }

    #[tokio::test]
    async fn test_shell_env() {
        let tool = ShellTool::new();
        let ctx = ExecutionContext::default();
        let mut config = shell_config("echo $MY_VAR");
        config.env.insert("MY_VAR".to_string(), "my_value".to_string());

        let result = tool.execute_command(&config, &ctx).await.unwrap();
        assert!(result.is_success());
        assert!(result.data.unwrap()["stdout"]
            .as_str()
            .unwrap()
            .contains("my_value"));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let tool = ShellTool::new();
        let ctx = ExecutionContext::default();
        let mut config = shell_config("sleep 10");
        config.timeout_seconds = Some(1);

        let result = tool.execute_command(&config, &ctx).await.unwrap();
        assert_eq!(result.status, ToolStatus::Timeout);
    }

    #[tokio::test]
    async fn test_shell_cancellation() {
        let tool = ShellTool::new();
        let token = CancellationToken::new();
        let ctx = ExecutionContext::default().with_cancellation(token.clone());

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let result = tool.execute_command(&shell_config("sleep 10"), &ctx).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_shell_tool_interface() {
        let tool = ShellTool::new();
        assert_eq!(tool.name(), "shell");

        let config = ToolConfig {
            kind: "shell".to_string(),
            config: serde_json::json!({"command": "echo 'test'"}),
            timeout: None,
            auth: None,
        };

        let ctx = ExecutionContext::default();
        let result = tool.execute(&config, &ctx).await.unwrap();
        assert!(result.is_success());
    }
}
