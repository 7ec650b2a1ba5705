//! Bounded runs of short-lived helper processes.

use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Upper bound for `--version` queries
pub const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `cmd` to completion, capturing stdout and stderr. If it has not exited
/// within `timeout` the child is killed and a `TimedOut` error is returned.
pub async fn output_within(mut cmd: Command, timeout: Duration) -> std::io::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output,
        Err(_) => {
            warn!(
                "Killing {:?} after {}s without exit",
                cmd.as_std().get_program(),
                timeout.as_secs()
            );
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("did not exit within {}s", timeout.as_secs()),
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_output_is_captured() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let output = output_within(cmd, Duration::from_secs(10)).await.unwrap();

        assert!(output.status.success());
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
    }

    #[tokio::test]
    async fn test_hung_process_times_out() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exec sleep 30");
        let started = Instant::now();
        let error = output_within(cmd, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), std::io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
