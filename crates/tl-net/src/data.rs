//! Data connection carrying length-prefixed sample records.
//!
//! Each record is a 4-byte big-endian length followed by that many bytes.
//! The length `0xFFFF_FFFF` is a sentinel followed by one status byte; status
//! EOF ends the scan normally, any other status ends it with an error.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use sane_wire::{Status, DATA_ERROR_SENTINEL};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, trace};

use crate::NetError;

const PREFIX_LEN: usize = 4;

/// Outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes copied into the caller buffer; zero in non-blocking mode when
    /// nothing is available yet.
    Data(usize),
    /// The scan ended normally.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Receive side of one scan.
#[derive(Debug)]
pub struct DataLink {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    prefix: [u8; PREFIX_LEN],
    prefix_len: usize,
    remaining: usize,
    awaiting_status: bool,
    mode: IoMode,
}

impl DataLink {
    /// Connect to the data port announced by the peer and half-close the
    /// write side; nothing is ever sent on this connection.
    pub async fn connect(addr: SocketAddr, connect_timeout: Option<Duration>) -> Result<Self, NetError> {
        let mut stream = match connect_timeout {
            Some(limit) => time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "data connect timed out"))??,
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        stream.shutdown().await?;
        info!(%addr, "data link connected");
        Ok(Self::from_stream(stream, addr))
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
            prefix: [0; PREFIX_LEN],
            prefix_len: 0,
            remaining: 0,
            awaiting_status: false,
            mode: IoMode::Blocking,
        }
    }

    pub fn set_io_mode(&mut self, mode: IoMode) {
        debug!(peer = %self.peer, ?mode, "data link io mode");
        self.mode = mode;
    }

    pub fn io_mode(&self) -> IoMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Wait until a read can make progress.
    pub async fn readable(&self) -> Result<(), NetError> {
        match &self.stream {
            Some(stream) => stream.readable().await.map_err(Into::into),
            None => Err(NetError::Cancelled),
        }
    }

    /// Drop the connection. Later reads report `Cancelled`.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(peer = %self.peer, "data link closed");
        }
    }

    /// Read sample bytes from the current record into `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, NetError> {
        if self.stream.is_none() {
            return Err(NetError::Cancelled);
        }
        if buf.is_empty() {
            return Ok(ReadStatus::Data(0));
        }
        match self.read_inner(buf).await {
            Ok(status) => Ok(status),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    async fn read_inner(&mut self, buf: &mut [u8]) -> Result<ReadStatus, NetError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(NetError::Cancelled);
            };

            if self.awaiting_status {
                let mut status = [0u8; 1];
                match read_some(stream, self.mode, &mut status).await? {
                    None => return Ok(ReadStatus::Data(0)),
                    Some(0) => return Err(unexpected_eof("data link closed before status byte")),
                    Some(_) => {}
                }
                self.awaiting_status = false;
                self.close();
                let status = Status::from_raw(i32::from(status[0]));
                info!(peer = %self.peer, %status, "scan finished");
                return match status {
                    Status::Eof => Ok(ReadStatus::Eof),
                    Status::Good => Err(NetError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "data link ended with a success status",
                    ))),
                    other => Err(NetError::check(other, &self.peer.ip().to_string())
                        .err()
                        .unwrap_or(NetError::Remote(other))),
                };
            }

            if self.remaining > 0 {
                let want = buf.len().min(self.remaining);
                return match read_some(stream, self.mode, &mut buf[..want]).await? {
                    None => Ok(ReadStatus::Data(0)),
                    Some(0) => Err(unexpected_eof("data link closed mid-record")),
                    Some(len) => {
                        self.remaining -= len;
                        trace!(bytes = len, remaining = self.remaining, "record data");
                        Ok(ReadStatus::Data(len))
                    }
                };
            }

            match read_some(stream, self.mode, &mut self.prefix[self.prefix_len..]).await? {
                None => return Ok(ReadStatus::Data(0)),
                Some(0) if self.prefix_len == 0 => {
                    debug!(peer = %self.peer, "data link closed at record boundary");
                    self.close();
                    return Ok(ReadStatus::Eof);
                }
                Some(0) => return Err(unexpected_eof("data link closed mid-prefix")),
                Some(len) => self.prefix_len += len,
            }
            if self.prefix_len < PREFIX_LEN {
                continue;
            }
            self.prefix_len = 0;
            let len = u32::from_be_bytes(self.prefix);
            if len == DATA_ERROR_SENTINEL {
                self.awaiting_status = true;
            } else {
                trace!(len, "record header");
                self.remaining = len as usize;
            }
        }
    }
}

fn unexpected_eof(msg: &'static str) -> NetError {
    NetError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

/// One read honoring the io mode; `None` when a non-blocking read would block.
async fn read_some(stream: &mut TcpStream, mode: IoMode, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match mode {
        IoMode::Blocking => stream.read(buf).await.map(Some),
        IoMode::NonBlocking => match stream.try_read(buf) {
            Ok(len) => Ok(Some(len)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        },
    }
}
