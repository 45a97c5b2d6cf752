//! Duplex byte stream to the remote chat program
//!
//! The bridge never speaks a protocol to the remote; it only moves bytes. Two
//! transports are provided: a child process (normally `ssh -tt user@sdf.org
//! com`, which handles authentication itself) and an in-memory channel pair
//! for embedding and tests.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::config::{RemoteConfig, TerminalConfig};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from remote: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to remote: {0}")]
    Write(#[source] io::Error),

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[async_trait]
pub trait Transport: Send {
    /// Read available bytes into `buf`; `Ok(0)` means end of stream.
    ///
    /// Must be cancel safe: dropping the future before it completes loses no data.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Remote session running as a child process on piped stdio
pub struct ProcessTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ProcessTransport {
    /// Start the remote command; `terminal` sizes its screen
    pub fn spawn(remote: &RemoteConfig, terminal: &TerminalConfig) -> Result<Self> {
        let args = remote.args_for(terminal);
        let describe = || format!("{} {}", remote.command, args.join(" "));

        let mut child = Command::new(&remote.command)
            .args(&args)
            .env("TERM", &remote.term)
            .env("COLUMNS", terminal.cols.to_string())
            .env("LINES", terminal.rows.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: describe(),
                source,
            })?;

        let missing = |what: &str| TransportError::Spawn {
            command: describe(),
            source: io::Error::new(io::ErrorKind::Other, format!("{} not captured", what)),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!("remote stderr: {}", line);
                }
            });
        }

        tracing::info!("spawned `{}` (pid {:?})", describe(), child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stdout.read(buf).await.map_err(TransportError::Read)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(bytes).await.map_err(TransportError::Write)?;
        stdin.flush().await.map_err(TransportError::Write)
    }

    async fn close(&mut self) -> Result<()> {
        // Closing stdin lets ssh wind down; kill whatever is left
        self.stdin.take();
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                tracing::debug!("kill after close failed: {}", e);
            }
        }
        Ok(())
    }
}

/// In-memory transport; the other side is a [`RemoteEnd`]
pub struct ChannelTransport {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Bytes received but not yet handed to a reader
    leftover: Vec<u8>,
}

/// The remote side of a [`ChannelTransport`]
pub struct RemoteEnd {
    to_local: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_local: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, RemoteEnd) {
        let (to_local, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_local) = mpsc::unbounded_channel();
        (
            ChannelTransport {
                incoming,
                outgoing: Some(outgoing),
                leftover: Vec::new(),
            },
            RemoteEnd {
                to_local: Some(to_local),
                from_local,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.leftover.is_empty() {
            match self.incoming.recv().await {
                Some(bytes) => self.leftover = bytes,
                None => return Ok(0),
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        outgoing.send(bytes.to_vec()).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }
}

impl RemoteEnd {
    /// Deliver output as if the remote printed it; false once the local side is gone
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        match &self.to_local {
            Some(tx) => tx.send(bytes.into()).is_ok(),
            None => false,
        }
    }

    /// Next chunk written by the local side; `None` after it closed
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_local.recv().await
    }

    /// Everything written so far without waiting
    pub fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.from_local.try_recv() {
            out.extend(bytes);
        }
        out
    }

    /// End of stream for the local reader
    pub fn hang_up(&mut self) {
        self.to_local = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (mut local, mut remote) = ChannelTransport::pair();

        remote.send(b"hello".to_vec());
        let mut buf = [0u8; 3];
        assert_eq!(local.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(local.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        local.write(b"g").await.unwrap();
        assert_eq!(remote.recv().await, Some(b"g".to_vec()));
    }

    #[tokio::test]
    async fn test_hang_up_is_end_of_stream() {
        let (mut local, mut remote) = ChannelTransport::pair();

        remote.send("bye");
        remote.hang_up();
        let mut buf = [0u8; 16];
        assert_eq!(local.read(&mut buf).await.unwrap(), 3);
        assert_eq!(local.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut local, mut remote) = ChannelTransport::pair();

        local.close().await.unwrap();
        assert!(matches!(local.write(b"x").await, Err(TransportError::Closed)));
        assert_eq!(remote.recv().await, None);
        assert!(!remote.send("late"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let remote = RemoteConfig {
            command: "/nonexistent/combridge-remote".to_string(),
            args: Vec::new(),
            term: "xterm".to_string(),
        };
        assert!(matches!(ProcessTransport::spawn(&remote, &TerminalConfig::default()), Err(TransportError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_transport_echo() {
        let remote = RemoteConfig {
            command: "cat".to_string(),
            args: Vec::new(),
            term: "xterm".to_string(),
        };
        let mut transport = ProcessTransport::spawn(&remote, &TerminalConfig::default()).unwrap();

        transport.write(b"ping\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping\n");
        transport.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_transport_passes_screen_size() {
        let remote = RemoteConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo {cols}x{rows} $COLUMNS $LINES".to_string()],
            term: "xterm".to_string(),
        };
        let terminal = TerminalConfig {
            cols: 132,
            rows: 40,
            ..TerminalConfig::default()
        };
        let mut transport = ProcessTransport::spawn(&remote, &terminal).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = transport.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "132x40 132 40\n");
    }
}
