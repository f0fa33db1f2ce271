// serverbackup/src/remote/ssh.rs
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{ErrorCode, ExtendedData, Session};
use tracing::{debug, error, info, warn};

use super::{CommandOutput, RemoteSession, SessionConnector, ensure_connected};
use crate::backup::constants::SSH_CONNECT_TIMEOUT_SECS;
use crate::config::SshSettings;
use crate::errors::{BackupError, Result};
use crate::records::RemoteServer;

/// Opens public-key authenticated ssh2 sessions using the process-wide key material.
pub struct SshConnector {
    settings: Arc<SshSettings>,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(settings: Arc<SshSettings>) -> Self {
        Self {
            settings,
            timeout: Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self, server: &RemoteServer) -> Result<Box<dyn RemoteSession>> {
        info!(remote_server = %server.address, "Establishing SFTP connection.");
        let settings = Arc::clone(&self.settings);
        let server = server.clone();
        let timeout = self.timeout;
        let session = tokio::task::spawn_blocking(move || open_session(&settings, &server, timeout)).await??;
        info!(remote_server = %session.address, "SFTP connection established.");
        Ok(Box::new(session))
    }
}

fn open_session(settings: &SshSettings, server: &RemoteServer, timeout: Duration) -> Result<SshSession> {
    let address = format!("{}:{}", server.address, server.port);
    let socket = (server.address.as_str(), server.port)
        .to_socket_addrs()
        .map_err(|e| BackupError::Connection(format!("Unable to resolve {}: {}", address, e)))?
        .next()
        .ok_or_else(|| BackupError::Connection(format!("No address found for {}", address)))?;

    let tcp = TcpStream::connect_timeout(&socket, timeout)
        .map_err(|e| BackupError::Connection(format!("Unable to reach {}: {}", address, e)))?;

    let mut session = Session::new()
        .map_err(|e| BackupError::Connection(format!("Failed to create session: {}", e)))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| BackupError::Connection(format!("SSH handshake with {} failed: {}", address, e)))?;

    session
        .userauth_pubkey_file(
            &server.username,
            None,
            &settings.private_key_path,
            settings.passphrase.as_deref(),
        )
        .map_err(|e| {
            error!(error = %e, "SSH login failed.");
            BackupError::Connection(format!("SSH Login failed: {}", e))
        })?;

    if !session.authenticated() {
        return Err(BackupError::Connection(
            "SSH Login failed: server did not accept the key".to_string(),
        ));
    }

    // Only connecting is bounded. Dumps and zips can stay silent for hours.
    session.set_timeout(COMMAND_TIMEOUT_MILLIS);

    Ok(SshSession {
        session,
        address,
        connected: Arc::new(AtomicBool::new(true)),
    })
}

/// libssh2 blocking calls wait forever once the session is up.
const COMMAND_TIMEOUT_MILLIS: u32 = 0;

/// libssh2 codes after which the socket or the transport state is unusable.
const TRANSPORT_ERROR_CODES: [i32; 8] = [
    -4,  // LIBSSH2_ERROR_INVALID_MAC
    -7,  // LIBSSH2_ERROR_SOCKET_SEND
    -9,  // LIBSSH2_ERROR_TIMEOUT
    -12, // LIBSSH2_ERROR_DECRYPT
    -13, // LIBSSH2_ERROR_SOCKET_DISCONNECT
    -14, // LIBSSH2_ERROR_PROTO
    -30, // LIBSSH2_ERROR_SOCKET_TIMEOUT
    -43, // LIBSSH2_ERROR_SOCKET_RECV
];

fn is_transport_failure(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(code) if TRANSPORT_ERROR_CODES.contains(&code))
}

fn is_transport_io_failure(e: &io::Error) -> bool {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<ssh2::Error>()) {
        Some(inner) => is_transport_failure(inner),
        None => matches!(
            e.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::TimedOut
        ),
    }
}

/// A failed libssh2 call and whether the session survived it.
///
/// A refused channel (MaxSessions, a busy server) leaves the session usable, so
/// the next attempt can run on it.
#[derive(Debug)]
struct Failure {
    error: BackupError,
    transport_lost: bool,
}

impl Failure {
    fn ssh(context: &str, e: ssh2::Error) -> Self {
        Self {
            transport_lost: is_transport_failure(&e),
            error: BackupError::Connection(format!("{}: {}", context, e)),
        }
    }

    fn io(error: BackupError, e: &io::Error) -> Self {
        Self {
            transport_lost: is_transport_io_failure(e),
            error,
        }
    }

    fn keep(error: BackupError) -> Self {
        Self {
            error,
            transport_lost: false,
        }
    }
}

pub struct SshSession {
    session: Session,
    address: String,
    connected: Arc<AtomicBool>,
}

impl SshSession {
    /// Runs blocking libssh2 work off the runtime; only a lost transport marks the session dead.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Session) -> std::result::Result<T, Failure> + Send + 'static,
    {
        ensure_connected(self)?;
        let session = self.session.clone();
        match tokio::task::spawn_blocking(move || work(session)).await? {
            Ok(value) => Ok(value),
            Err(failure) => {
                if failure.transport_lost {
                    warn!(remote_server = %self.address, error = %failure.error, "Marking SSH session as disconnected.");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(failure.error)
            }
        }
    }
}

fn run_command(session: &Session, command: &str) -> std::result::Result<CommandOutput, Failure> {
    let failed = |e: ssh2::Error| Failure::ssh("Remote command failed", e);

    let mut channel = session.channel_session().map_err(failed)?;
    channel.handle_extended_data(ExtendedData::Merge).map_err(failed)?;
    channel.exec(command).map_err(failed)?;

    let mut raw = Vec::new();
    channel.read_to_end(&mut raw).map_err(|e| {
        Failure::io(
            BackupError::Connection(format!("Failed to read command output: {}", e)),
            &e,
        )
    })?;
    channel.wait_close().map_err(failed)?;

    Ok(CommandOutput {
        text: String::from_utf8_lossy(&raw).into_owned(),
        exit_status: channel.exit_status().ok(),
    })
}

#[async_trait]
impl RemoteSession for SshSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.session.authenticated()
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let command = command.to_string();
        debug!(remote_server = %self.address, command = %command, "Executing remote command.");
        self.blocking(move |session| run_command(&session, &command)).await
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session
                .sftp()
                .map_err(|e| Failure::ssh("Failed to open SFTP channel", e))?;
            Ok(sftp.stat(Path::new(&path)).ok().map(|stat| stat.size.unwrap_or(0)))
        })
        .await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let remote_path = remote_path.to_string();
        let local_path = local_path.to_path_buf();
        self.blocking(move |session| {
            let sftp = session
                .sftp()
                .map_err(|e| Failure::ssh("Failed to open SFTP channel", e))?;
            let mut remote = sftp.open(Path::new(&remote_path)).map_err(|e| {
                Failure::keep(BackupError::Transfer(format!(
                    "Failed to download the remote file {}: {}",
                    remote_path, e
                )))
            })?;
            let mut local = std::fs::File::create(&local_path).map_err(|e| {
                Failure::keep(BackupError::Transfer(format!("Failed to open {}: {}", local_path.display(), e)))
            })?;
            let bytes = io::copy(&mut remote, &mut local).map_err(|e| {
                Failure::io(
                    BackupError::Transfer(format!("Failed to download the remote file {}: {}", remote_path, e)),
                    &e,
                )
            })?;
            local.sync_all().map_err(|e| {
                Failure::keep(BackupError::Transfer(format!("Failed to flush {}: {}", local_path.display(), e)))
            })?;
            Ok(bytes)
        })
        .await
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let session = self.session.clone();
        let closed = tokio::task::spawn_blocking(move || {
            session.disconnect(None, "backup run finished", None)
        })
        .await;
        match closed {
            Ok(Ok(())) => debug!(remote_server = %self.address, "SSH session closed."),
            Ok(Err(e)) => warn!(remote_server = %self.address, error = %e, "Failed to close SSH session cleanly."),
            Err(e) => warn!(remote_server = %self.address, error = %e, "SSH disconnect task aborted."),
        }
    }
}
