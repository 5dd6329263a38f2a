//! Stdio transport for locally launched MCP servers
//!
//! The configured command line is split with shell quoting rules, spawned
//! with piped stdio and driven by three background tasks: a stdin writer, a
//! stdout line reader and a stderr logger. Stderr output is diagnostic only.
//! Dropping the transport sends SIGTERM to the child.

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgentSmithError, Result};
use crate::mcp::transport::{receiver_stream, Transport};

#[derive(Debug)]
pub struct StdioTransport {
    program: String,
    stdin_tx: mpsc::UnboundedSender<String>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    child: Arc<Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn the server process
    ///
    /// # Arguments
    ///
    /// * `command` - Command line; may carry its own arguments
    /// * `args` - Extra arguments appended after those in `command`
    ///
    /// # Errors
    ///
    /// Returns `McpConnection` if the command is empty or unbalanced, and
    /// `McpTransport` if the process cannot be started
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut argv = shlex::split(command).ok_or_else(|| {
            AgentSmithError::McpConnection(format!("cannot parse command line '{}'", command))
        })?;
        if argv.is_empty() {
            return Err(AgentSmithError::McpConnection("empty command".to_string()).into());
        }
        let program = argv.remove(0);
        argv.extend(args.iter().cloned());

        let mut cmd = Command::new(&program);
        cmd.args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AgentSmithError::McpTransport(format!("failed to spawn MCP server `{}`: {}", program, e))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AgentSmithError::McpTransport("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentSmithError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AgentSmithError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(message) = stdin_rx.recv().await {
                let line = format!("{}\n", message);
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if stdout_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let name = program.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("[{}] stderr: {}", name, line);
            }
        });

        Ok(Self {
            program,
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            child: Arc::new(Mutex::new(child)),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx.send(message).map_err(|_| {
            AgentSmithError::McpTransport(format!("stdin of `{}` is closed", self.program)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.stdout_rx))
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // If another task holds the lock, kill_on_drop still reaps the child.
        if let Ok(child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid comes from a live tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
            tracing::debug!("Stopped MCP server process `{}`", self.program);
        }
    }
}
