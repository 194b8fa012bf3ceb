//! Blocking ssh2 plumbing. Everything here runs inside `spawn_blocking`.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::{Channel, Session};

use super::lines::LineBuffer;
use super::{ExecOutput, StreamLogger};
use crate::credentials::{AuthMethod, KeySource};
use crate::error::{OrchestratorError, Result};
use crate::models::ConnectionDescriptor;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(super) fn open_session(d: &ConnectionDescriptor, timeout: Duration) -> Result<Session> {
    let addrs = (d.host.as_str(), d.port)
        .to_socket_addrs()
        .map_err(|e| OrchestratorError::connection(format!("Cannot resolve {}: {e}", d.host)))?;

    let mut tcp = None;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        let reason = last_err.map(|e| e.to_string()).unwrap_or_else(|| "no address".into());
        OrchestratorError::connection(format!("Cannot reach {}:{}: {reason}", d.host, d.port))
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    // Bounds handshake and auth only; reset before any command runs.
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| OrchestratorError::connection(format!("SSH handshake failed: {e}")))?;
    authenticate(&session, d)?;
    session.set_timeout(0);
    Ok(session)
}

fn authenticate(session: &Session, d: &ConnectionDescriptor) -> Result<()> {
    let auth = d
        .credentials
        .auth()
        .ok_or_else(|| OrchestratorError::config("No SSH credentials available"))?;

    let outcome = match auth {
        AuthMethod::Key { key: KeySource::Inline(pem), passphrase } => {
            session.userauth_pubkey_memory(&d.username, None, &pem, passphrase)
        }
        AuthMethod::Key { key: KeySource::File(path), passphrase } => {
            if !path.exists() {
                return Err(OrchestratorError::connection(format!(
                    "Private key not found at {}",
                    path.display()
                )));
            }
            session.userauth_pubkey_file(&d.username, None, &path, passphrase)
        }
        AuthMethod::Password(password) => session.userauth_password(&d.username, password),
    };
    outcome.map_err(|e| OrchestratorError::connection(format!("SSH authentication failed: {e}")))?;

    if !session.authenticated() {
        return Err(OrchestratorError::connection("SSH authentication failed"));
    }
    Ok(())
}

pub(super) fn run(session: &Session, command: &str, out: &StreamLogger) -> Result<ExecOutput> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    session.set_blocking(false);
    let drained = drain(&mut channel, out);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;
    Ok(ExecOutput { stdout, stderr, exit_code })
}

/// Interleave stdout and stderr reads until the remote side closes.
fn drain(channel: &mut Channel, out: &StreamLogger) -> Result<(String, String)> {
    let mut stderr = channel.stderr();
    let mut out_lines = LineBuffer::new();
    let mut err_lines = LineBuffer::new();
    let mut chunk = [0u8; 16 * 1024];

    loop {
        let mut progressed = false;

        if let Some(n) = read_available(channel, &mut chunk)? {
            progressed = true;
            for line in out_lines.push(&chunk[..n]) {
                out.stdout_line(&line);
            }
        }
        if let Some(n) = read_available(&mut stderr, &mut chunk)? {
            progressed = true;
            for line in err_lines.push(&chunk[..n]) {
                out.stderr_line(&line);
            }
        }

        if !progressed {
            if channel.eof() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    if let Some(line) = out_lines.finish() {
        out.stdout_line(&line);
    }
    if let Some(line) = err_lines.finish() {
        out.stderr_line(&line);
    }
    Ok((out_lines.into_text(), err_lines.into_text()))
}

/// `Some(n)` when bytes arrived, `None` when nothing is ready or the stream is at EOF.
fn read_available(reader: &mut impl Read, buf: &mut [u8]) -> Result<Option<usize>> {
    match reader.read(buf) {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}
