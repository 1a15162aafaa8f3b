//! Local process executor.

use async_trait::async_trait;
use conveyor_core::executor::{CommandOutput, CommandSpec, Executor};
use conveyor_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as child processes of the server.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessExecutor;

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for LocalProcessExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        debug!(program = %spec.program, args = ?spec.args, "Spawning process");

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ExecutionFailed(format!("failed to start {}: {}", spec.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        // Dropping this future kills the child.
        let run = async move {
            let output = collect_output(stdout, stderr).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(CommandOutput {
                output,
                exit_code: status.code(),
            })
        };

        let result = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(program = %spec.program, ?limit, "Process timed out");
                    return Err(Error::Timeout(format!(
                        "{} did not finish within {}s",
                        spec.program,
                        limit.as_secs_f64()
                    )));
                }
            },
            None => run.await,
        };

        result.map_err(|e| Error::ExecutionFailed(format!("{}: {}", spec.program, e)))
    }
}

/// Interleave stdout and stderr line by line into one buffer.
async fn collect_output(
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
) -> std::io::Result<String> {
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut out_line = Vec::new();
    let mut err_line = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut combined = Vec::new();

    while out_open || err_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if out_open => {
                if read? == 0 {
                    out_open = false;
                }
                combined.append(&mut out_line);
            }
            read = stderr.read_until(b'\n', &mut err_line), if err_open => {
                if read? == 0 {
                    err_open = false;
                }
                combined.append(&mut err_line);
            }
        }
    }

    Ok(String::from_utf8_lossy(&combined).into_owned())
}
