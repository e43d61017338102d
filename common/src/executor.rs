//! Local subprocess execution with a hard wall-clock timeout.
//!
//! Used by the audit reader to invoke `ausearch`/`auditctl` without risking
//! an indefinitely hanging task.

use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("command timed out after {0}s")]
    TimedOut(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `cmd args...` locally, bounded by `timeout_secs`.
pub async fn run_local(cmd: &str, args: &[&str], timeout_secs: u64) -> Result<CommandOutput, ExecError> {
    let fut = Command::new(cmd).args(args).output();

    let output = match timeout(Duration::from_secs(timeout_secs), fut).await {
        Err(_) => return Err(ExecError::TimedOut(timeout_secs)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExecError::NotFound(cmd.to_string()))
        }
        Ok(Err(e)) => return Err(ExecError::Io(e)),
        Ok(Ok(output)) => output,
    };

    Ok(CommandOutput {
        status_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_local_success() {
        let out = run_local("echo", &["hello"], 5).await.unwrap();
        assert_eq!(out.status_code, Some(0));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_local_not_found() {
        let err = run_local("definitely-not-a-real-binary", &[], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_run_local_timeout() {
        let err = run_local("sleep", &["2"], 0).await;
        assert!(matches!(err, Err(ExecError::TimedOut(_))));
    }
}
