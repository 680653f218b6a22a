//! Local stand-in for the fuzz tool's command socket.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::transport::LOCALHOST;

type QuitHook = Arc<dyn Fn() + Send + Sync>;

/// Listens on an ephemeral port and answers every command line with `OK`.
///
/// `quit` is recorded but not answered; the quit hook runs and the
/// connection is dropped, the way the real tool exits.
pub struct FakeFuzzTool {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl FakeFuzzTool {
    pub async fn bind() -> io::Result<Self> {
        Self::bind_with_quit_hook(|| {}).await
    }

    pub async fn bind_with_quit_hook<F>(on_quit: F) -> io::Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener = TcpListener::bind((LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let on_quit: QuitHook = Arc::new(on_quit);

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    *connections.lock().unwrap() += 1;
                    let received = Arc::clone(&received);
                    let on_quit = Arc::clone(&on_quit);
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = stream.into_split();
                        let mut lines = BufReader::new(read_half).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            received.lock().unwrap().push(line.clone());
                            if line == "quit" {
                                on_quit();
                                break;
                            }
                            if write_half.write_all(b"OK\n").await.is_err() {
                                break;
                            }
                        }
                    });
                }
            })
        };

        Ok(Self {
            port,
            received,
            connections,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every line received so far, across connections.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

impl Drop for FakeFuzzTool {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> io::Result<u16> {
    let listener = TcpListener::bind((LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
