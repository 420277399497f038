//! Control connection: connect, handshake, and request/reply calls.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use sane_wire::rpc::{InitReply, InitReq};
use sane_wire::{decode, encode_call, Decode, Encode, Procedure, WireError};
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::NetError;

/// Tunables of the control connection.
pub mod consts {
    /// Initial capacity of the reply buffer.
    pub const RX_CAPACITY: usize = 4096;
}

/// One handshaken control connection to a remote host.
#[derive(Debug)]
pub struct ControlLink {
    host: String,
    stream: TcpStream,
    peer: SocketAddr,
    build: u16,
    rx: BytesMut,
    broken: bool,
}

impl ControlLink {
    /// Connect to the first reachable address of `host` and perform the
    /// handshake. Each connect attempt is bounded by `connect_timeout` when
    /// set.
    pub async fn connect(
        host: &str,
        addrs: &[SocketAddr],
        connect_timeout: Option<Duration>,
        username: Option<&str>,
    ) -> Result<Self, NetError> {
        let mut last_err = None;
        for &addr in addrs {
            match connect_stream(addr, connect_timeout).await {
                Ok(stream) => {
                    let mut link = Self {
                        host: host.to_string(),
                        stream,
                        peer: addr,
                        build: sane_wire::PROTOCOL_BUILD,
                        rx: BytesMut::with_capacity(consts::RX_CAPACITY),
                        broken: false,
                    };
                    link.handshake(username).await?;
                    return Ok(link);
                }
                Err(err) => {
                    debug!(%host, %addr, ?err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(match last_err {
            Some(err) => NetError::Io(err),
            None => NetError::invalid(format!("no addresses for {host}")),
        })
    }

    async fn handshake(&mut self, username: Option<&str>) -> Result<(), NetError> {
        let local = sane_wire::local_version();
        let req = InitReq {
            version_code: local,
            username: username.map(str::to_string),
        };
        let reply: InitReply = self.call(Procedure::Init, &req).await?;
        if !reply.status.is_good() {
            warn!(host = %self.host, status = %reply.status, "handshake refused");
            return Err(NetError::AccessDenied {
                host: self.host.clone(),
            });
        }
        let peer = reply.version_code;
        if peer.major != sane_wire::VERSION_MAJOR || !sane_wire::is_supported_build(peer.build) {
            warn!(host = %self.host, %peer, "unsupported protocol version");
            return Err(NetError::VersionMismatch {
                host: self.host.clone(),
                peer,
                expected: local,
            });
        }
        self.build = peer.build;
        info!(host = %self.host, addr = %self.peer, build = self.build, "control link established");
        Ok(())
    }

    /// Issue one call and wait for its reply.
    pub async fn call<Req, Rep>(&mut self, procedure: Procedure, request: &Req) -> Result<Rep, NetError>
    where
        Req: Encode + ?Sized,
        Rep: Decode,
    {
        self.send(procedure, request).await?;
        self.read_reply().await
    }

    /// Write one call without waiting for a reply.
    pub async fn send<Req>(&mut self, procedure: Procedure, request: &Req) -> Result<(), NetError>
    where
        Req: Encode + ?Sized,
    {
        if self.broken {
            return Err(NetError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "control link is broken",
            )));
        }
        let encoded = encode_call(procedure, request, self.build);
        trace!(host = %self.host, ?procedure, bytes = encoded.len(), "sending call");
        if let Err(err) = self.stream.write_all(&encoded).await {
            self.broken = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Read the next reply record. Bytes following the record stay buffered
    /// for the next read.
    pub async fn read_reply<Rep: Decode>(&mut self) -> Result<Rep, NetError> {
        loop {
            match decode::<Rep>(&self.rx, self.build) {
                Ok((reply, used)) => {
                    self.rx.advance(used);
                    trace!(host = %self.host, bytes = used, "decoded reply");
                    return Ok(reply);
                }
                Err(WireError::Incomplete) => {}
                Err(err) => {
                    warn!(host = %self.host, ?err, "discarding malformed reply");
                    self.rx.clear();
                    return Err(err.into());
                }
            }
            match self.stream.read_buf(&mut self.rx).await {
                Ok(0) => {
                    self.broken = true;
                    return Err(NetError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "control connection closed by peer",
                    )));
                }
                Ok(len) => trace!(host = %self.host, bytes = len, "received reply bytes"),
                Err(err) => {
                    self.broken = true;
                    return Err(err.into());
                }
            }
        }
    }

    /// Send `EXIT` and close the connection. Errors are ignored since the
    /// peer does not answer.
    pub async fn exit(mut self) {
        if self.send(Procedure::Exit, &()).await.is_ok() {
            let _ = self.stream.shutdown().await;
        }
        debug!(host = %self.host, "control link closed");
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Protocol build negotiated during the handshake.
    pub fn build(&self) -> u16 {
        self.build
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Flag the connection as unusable; the owner reconnects on next use.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

async fn connect_stream(addr: SocketAddr, limit: Option<Duration>) -> io::Result<TcpStream> {
    let stream = match limit {
        Some(limit) => time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
        None => TcpStream::connect(addr).await?,
    };
    stream.set_nodelay(true)?;
    if let Err(err) = SockRef::from(&stream).set_keepalive(true) {
        warn!(%addr, ?err, "failed to enable keepalive");
    }
    Ok(stream)
}
