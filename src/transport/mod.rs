//! Newline-delimited text channels over local TCP.
//!
//! Both the fuzz tool and the device bridge are reached through a port on
//! `127.0.0.1` that adb forwards to the device. Each request is one line and
//! each reply, when there is one, is one line.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;


pub const LOCALHOST: &str = "127.0.0.1";

/// One open request/response connection.
#[async_trait]
pub trait LineChannel: Send {
    /// Write `line` followed by a newline and flush.
    async fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Read the next reply line without its terminator. `None` on EOF.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Shut the connection down. Errors are reported but the channel is
    /// unusable afterwards either way.
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, port: u16) -> io::Result<Box<dyn LineChannel>>;
}

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, port: u16) -> io::Result<Box<dyn LineChannel>> {
        let stream = TcpStream::connect((LOCALHOST, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpLineChannel::new(stream)))
    }
}

pub struct TcpLineChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpLineChannel {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

#[async_trait]
impl LineChannel for TcpLineChannel {
    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(normalize_line(line)))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub fn normalize_line(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

/// Bounded connection retry: a fixed number of attempts with a fixed pause
/// before each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts, pause }
    }

    /// Attempts needed to cover `total` with this policy's pause, at least one.
    pub fn spanning(total: Duration, pause: Duration) -> Self {
        let attempts = if pause.is_zero() {
            1
        } else {
            (total.as_millis() / pause.as_millis().max(1)).max(1) as u32
        };
        Self { attempts, pause }
    }

    /// Run `attempt` until it yields `Some`, pausing before every try.
    ///
    /// Returns `None` once the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Option<T>>,
    {
        for n in 1..=self.attempts {
            tokio::time::sleep(self.pause).await;
            if let Some(value) = attempt(n).await {
                return Some(value);
            }
        }
        None
    }
}
