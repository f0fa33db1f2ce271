// serverbackup/src/remote/testing.rs
//! Scripted stand-ins for the ssh2 backend.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CommandOutput, RemoteSession, SessionConnector, ensure_connected};
use crate::errors::{BackupError, Result};
use crate::records::RemoteServer;

#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    /// The command failed but the session survives, like a refused channel.
    Fail(String),
    /// The transport went away; later calls fail fast.
    Disconnect(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// Answers commands by substring match, first registered rule wins. A rule
/// with several replies hands them out in order and repeats the last one.
/// Unmatched commands succeed with empty output.
#[derive(Debug)]
pub struct ScriptedSession {
    connected: AtomicBool,
    rules: Mutex<Vec<Rule>>,
    executed: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, u64>>,
    download_body: Mutex<Option<Vec<u8>>>,
    disconnects: AtomicUsize,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            rules: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            download_body: Mutex::new(Some(b"-- dump --".to_vec())),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn on(self, needle: &str, text: &str) -> Self {
        self.on_replies(needle, vec![Reply::Output(CommandOutput::new(text, Some(0)))])
    }

    pub fn on_status(self, needle: &str, text: &str, status: i32) -> Self {
        self.on_replies(needle, vec![Reply::Output(CommandOutput::new(text, Some(status)))])
    }

    pub fn on_replies(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn with_file(self, path: &str, size: u64) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), size);
        self
    }

    pub fn with_download(self, body: Option<Vec<u8>>) -> Self {
        *self.download_body.lock().unwrap() = body;
        self
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.executed().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        ensure_connected(self)?;
        self.executed.lock().unwrap().push(command.to_string());
        let mut rules = self.rules.lock().unwrap();
        let reply = rules
            .iter_mut()
            .find(|rule| command.contains(&rule.needle))
            .and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            });
        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Fail(message)) => Err(BackupError::Connection(message)),
            Some(Reply::Disconnect(message)) => {
                self.drop_connection();
                Err(BackupError::Connection(message))
            }
            None => Ok(CommandOutput::new("", Some(0))),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.files.lock().unwrap().get(path).copied())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let body = self.download_body.lock().unwrap().clone();
        match body {
            Some(bytes) => {
                std::fs::write(local_path, &bytes)
                    .map_err(|e| BackupError::Transfer(e.to_string()))?;
                Ok(bytes.len() as u64)
            }
            None => Err(BackupError::Transfer(format!(
                "Failed to download the remote file: {}",
                remote_path
            ))),
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: RemoteSession + ?Sized> RemoteSession for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        (**self).exec(command).await
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        (**self).stat(path).await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        (**self).download(remote_path, local_path).await
    }

    async fn disconnect(&self) {
        (**self).disconnect().await
    }
}

/// Hands out a shared scripted session, or refuses to connect.
pub struct ScriptedConnector {
    session: Option<Arc<ScriptedSession>>,
    refusal: String,
}

impl ScriptedConnector {
    pub fn new(session: Arc<ScriptedSession>) -> Self {
        Self {
            session: Some(session),
            refusal: String::new(),
        }
    }

    pub fn refusing(message: &str) -> Self {
        Self {
            session: None,
            refusal: message.to_string(),
        }
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self, _server: &RemoteServer) -> Result<Box<dyn RemoteSession>> {
        match &self.session {
            Some(session) => Ok(Box::new(Arc::clone(session))),
            None => Err(BackupError::Connection(self.refusal.clone())),
        }
    }
}
