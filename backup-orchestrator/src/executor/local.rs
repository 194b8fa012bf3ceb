use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::lines::LineBuffer;
use super::{ExecOutput, StreamLogger};
use crate::error::Result;

/// Run `command` through `sh -c` on this machine.
pub(super) async fn run(command: &str, out: &StreamLogger) -> Result<ExecOutput> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stderr not captured"))?;

    let (stdout, stderr) = tokio::join!(
        drain(stdout, |line| out.stdout_line(line)),
        drain(stderr, |line| out.stderr_line(line)),
    );
    let status = child.wait().await?;

    Ok(ExecOutput {
        stdout: stdout?,
        stderr: stderr?,
        // Killed by a signal.
        exit_code: status.code().unwrap_or(-1),
    })
}

async fn drain<R>(mut reader: R, mut on_line: impl FnMut(&str)) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in lines.push(&chunk[..n]) {
            on_line(&line);
        }
    }
    if let Some(line) = lines.finish() {
        on_line(&line);
    }
    Ok(lines.into_text())
}
