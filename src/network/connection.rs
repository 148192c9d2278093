//! Full-read TCP connection wrapper.
//!
//! The protocol has no length prefixes, so reads come in two flavors:
//! fixed-size reads that must accumulate until the full payload arrived
//! ([`Connection::read_exact`]), and single-read fetches bounded by
//! [`MAX_MESSAGE_LEN`](super::protocol::MAX_MESSAGE_LEN) for the
//! variable-length FAIL/FINISHED messages ([`Connection::read_some`]).
//! A short read on a fixed-size field means the peer closed the socket
//! mid-exchange and maps to [`SlsError::ConnectionClosed`].

use std::net::SocketAddr;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;

use crate::error::{SlsError, SlsResult};
use crate::network::protocol::{ResultType, MAX_MESSAGE_LEN};

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Opens a connection with TCP_NODELAY set; every exchange is a
    /// small request/reply pair, so Nagle only adds latency.
    pub async fn connect(addr: SocketAddr) -> SlsResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected to {addr}");
        Ok(Connection { stream, peer: addr })
    }

    /// Wraps an already-accepted stream (server side).
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> SlsResult<Self> {
        stream.set_nodelay(true)?;
        Ok(Connection { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write_all(&mut self, data: &[u8]) -> SlsResult<()> {
        debug!("-> {}: {} bytes", self.peer, data.len());
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Reads exactly `n` bytes, looping over partial reads. Peer close
    /// before the payload is complete is `ConnectionClosed`.
    pub async fn read_exact(&mut self, n: usize) -> SlsResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self.stream.read(&mut buf[filled..]).await?;
            if read == 0 {
                return Err(SlsError::ConnectionClosed);
            }
            filled += read;
        }
        debug!("<- {}: {} bytes", self.peer, n);
        Ok(buf)
    }

    /// Single read of up to `bound` bytes, for the variable-length
    /// trailing messages. Empty read is `ConnectionClosed`.
    pub async fn read_some(&mut self, bound: usize) -> SlsResult<Vec<u8>> {
        let mut buf = vec![0u8; bound];
        let read = self.stream.read(&mut buf).await?;
        if read == 0 {
            return Err(SlsError::ConnectionClosed);
        }
        buf.truncate(read);
        debug!("<- {}: {} bytes (message)", self.peer, read);
        Ok(buf)
    }

    pub async fn read_i32(&mut self) -> SlsResult<i32> {
        let raw = self.read_exact(4).await?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&raw);
        Ok(i32::from_le_bytes(bytes))
    }

    pub async fn read_i64(&mut self) -> SlsResult<i64> {
        let raw = self.read_exact(8).await?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        Ok(i64::from_le_bytes(bytes))
    }

    /// Reads and decodes the leading result code of a reply.
    pub async fn read_result(&mut self) -> SlsResult<ResultType> {
        let raw = self.read_i32().await?;
        ResultType::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown result code {raw}")))
    }

    /// Reads a trailing ASCII message (FAIL/FINISHED payload).
    pub async fn read_message(&mut self) -> SlsResult<String> {
        let raw = self.read_some(MAX_MESSAGE_LEN).await?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim().to_owned())
    }

    /// Waits until the socket has bytes to read, without consuming any.
    /// Used to race a progress interval against the next frame so no
    /// partial read is ever abandoned.
    pub async fn readable(&self) -> SlsResult<()> {
        self.stream.ready(Interest::READABLE).await?;
        Ok(())
    }
}
