//! Per-cycle server connection and its teardown
//!
//! A connection is closed in three independent steps: input, output, socket.
//! Each step runs even if an earlier one failed, and each failure is logged
//! and recorded rather than returned.

use std::io;
use std::net::Shutdown;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, error};

use crate::error::RefreshError;

/// The three resources a connection releases, in release order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Input,
    Output,
    Socket,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::Input => "input stream",
            Resource::Output => "output writer",
            Resource::Socket => "socket",
        };
        f.write_str(name)
    }
}

/// Outcome of a teardown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub attempted: Vec<Resource>,
    pub failed: Vec<Resource>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Something that can be closed in the three teardown steps
#[async_trait]
pub(crate) trait Release: Send {
    async fn close_input(&mut self) -> io::Result<()>;
    async fn close_output(&mut self) -> io::Result<()>;
    async fn close_socket(&mut self) -> io::Result<()>;
}

/// Close input, output and socket, attempting every step
pub(crate) async fn teardown<R: Release + ?Sized>(target: &mut R) -> TeardownReport {
    let mut report = TeardownReport::default();

    let result = target.close_input().await;
    record(&mut report, Resource::Input, result);

    let result = target.close_output().await;
    record(&mut report, Resource::Output, result);

    let result = target.close_socket().await;
    record(&mut report, Resource::Socket, result);

    report
}

fn record(report: &mut TeardownReport, resource: Resource, result: io::Result<()>) {
    report.attempted.push(resource);
    match result {
        Ok(()) => debug!(%resource, "teardown: closed"),
        Err(e) => {
            error!(%resource, error = %e, "Failed to close");
            report.failed.push(resource);
        }
    }
}

/// Buffered reader and writer over one TCP connection
pub(crate) struct Connection {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    pub async fn open(addr: &str) -> Result<Self, RefreshError> {
        debug!(%addr, "Connection::open: connecting");
        let stream = TcpStream::connect(addr).await.map_err(|source| RefreshError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    pub async fn close(self) -> TeardownReport {
        let mut closing = Closing {
            reader: Some(self.reader),
            read_half: None,
            writer: Some(self.writer),
        };
        teardown(&mut closing).await
    }
}

struct Closing {
    reader: Option<BufReader<OwnedReadHalf>>,
    read_half: Option<OwnedReadHalf>,
    writer: Option<BufWriter<OwnedWriteHalf>>,
}

#[async_trait]
impl Release for Closing {
    /// Discard buffered input and hand the read half to the socket step
    async fn close_input(&mut self) -> io::Result<()> {
        if let Some(mut reader) = self.reader.take() {
            let unread = reader.buffer().len();
            if unread > 0 {
                debug!(unread, "close_input: discarding buffered input");
            }
            reader.consume(unread);
            self.read_half = Some(reader.into_inner());
        }
        Ok(())
    }

    async fn close_output(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    async fn close_socket(&mut self) -> io::Result<()> {
        let write_half = self.writer.take().map(BufWriter::into_inner);
        match (self.read_half.take(), write_half) {
            (Some(read_half), Some(write_half)) => {
                let stream = read_half.reunite(write_half).map_err(io::Error::other)?;
                match stream.into_std()?.shutdown(Shutdown::Both) {
                    // Peer already closed its side; dropping the stream releases the descriptor
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                        debug!("close_socket: peer already disconnected");
                        Ok(())
                    }
                    result => result,
                }
            }
            // Dropping whichever half is left closes the descriptor
            _ => Ok(()),
        }
    }
}
