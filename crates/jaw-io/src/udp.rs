//! 单字节 UDP 指令接收
//!
//! 非阻塞 socket。每个控制周期把接收队列读空，只保留最后一个位置字节。

use jaw_protocol::udp::decode_datagram;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, trace};

/// 单次 drain 的报文上限，防止洪泛时单周期无限读取
const MAX_DATAGRAMS_PER_DRAIN: usize = 1024;

#[derive(Debug)]
pub struct UdpByteSocket {
    bind: String,
    socket: Option<UdpSocket>,
}

impl UdpByteSocket {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            socket: None,
        }
    }

    pub fn open(&mut self) -> io::Result<()> {
        let socket = UdpSocket::bind(&self.bind)?;
        socket.set_nonblocking(true)?;
        debug!(bind = %self.bind, "UDP socket bound");
        self.socket = Some(socket);
        Ok(())
    }

    pub fn close(&mut self) {
        self.socket = None;
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?
            .local_addr()
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind
    }

    /// 读空接收队列，返回最后一个非空报文的首字节
    pub fn drain(&mut self) -> io::Result<Option<u8>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let mut buf = [0u8; 64];
        let mut last = None;
        for _ in 0..MAX_DATAGRAMS_PER_DRAIN {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Some(byte) = decode_datagram(&buf[..n]) {
                        trace!(%from, byte, "UDP datagram");
                        last = Some(byte);
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(last)
    }
}
