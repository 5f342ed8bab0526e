//! The local side of a relay: stdio, a spawned program, or anything async.

use std::io;
use std::process::Stdio;

use rcat_common::config::Exec;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

/// A reader/writer pair the relay copies to and from.
pub struct LocalIo {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Killed when the relay finishes.
    pub child: Option<Child>,
}

impl LocalIo {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawns `exec` with piped stdin/stdout. Its stderr stays ours.
    pub fn spawn(exec: &Exec) -> io::Result<Self> {
        let mut command = match exec {
            Exec::Program(line) => {
                let mut parts = line.split_whitespace();
                let program = parts
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
                let mut command = Command::new(program);
                command.args(parts);
                command
            }
            Exec::Shell(line) => {
                let mut command = Command::new("/bin/sh");
                command.arg("-c").arg(line);
                command
            }
        };

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        debug!(pid = child.id(), ?exec, "spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;

        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

/// Hands out a fresh [`LocalIo`] for every relay.
///
/// A keep-listening server relays many clients in turn and each one gets
/// its own local side, e.g. its own spawned program.
pub trait LocalIoSource: Send {
    fn open(&mut self) -> io::Result<LocalIo>;
}

/// Process stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSource;

impl LocalIoSource for StdioSource {
    fn open(&mut self) -> io::Result<LocalIo> {
        Ok(LocalIo::stdio())
    }
}

/// A new process per relay (`-e` / `-c`).
#[derive(Debug, Clone)]
pub struct ExecSource(pub Exec);

impl LocalIoSource for ExecSource {
    fn open(&mut self) -> io::Result<LocalIo> {
        LocalIo::spawn(&self.0)
    }
}

impl<F> LocalIoSource for F
where
    F: FnMut() -> io::Result<LocalIo> + Send,
{
    fn open(&mut self) -> io::Result<LocalIo> {
        self()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
