//! S7 ISO-on-TCP 客户端
//!
//! 连接流程：TCP 连接（带超时）→ COTP CR/CC → Setup Communication。
//! 读写只访问 DB 区，单条目，字节传输。

use crate::{DataBlockClient, PlcError};
use jaw_protocol::s7::{self, ISO_TCP_PORT, REQUESTED_PDU_SIZE, TPKT_HEADER_LEN};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 超时后允许丢弃的迟到应答数
const MAX_STALE_FRAMES: usize = 4;

/// S7 客户端
#[derive(Debug)]
pub struct S7Client {
    host: String,
    port: u16,
    rack: u8,
    slot: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    pdu_size: u16,
    pdu_ref: u16,
}

impl S7Client {
    pub fn new(host: impl Into<String>, rack: u8, slot: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port: ISO_TCP_PORT,
            rack,
            slot,
            timeout,
            stream: None,
            pdu_size: 0,
            pdu_ref: 0,
        }
    }

    /// 非标准端口（测试或网关转发）
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 协商后的 PDU 大小（未连接时为 0）
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    fn resolve(&self) -> Result<SocketAddr, PlcError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| PlcError::Resolve(self.describe()))?
            .next()
            .ok_or_else(|| PlcError::Resolve(self.describe()))
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        if self.pdu_ref == 0 {
            self.pdu_ref = 1;
        }
        self.pdu_ref
    }

    /// 未连接时 PDU 大小为 0，必须先于大小检查返回 `NotConnected`
    fn check_payload(&self, len: usize) -> Result<(), PlcError> {
        if self.stream.is_none() {
            return Err(PlcError::NotConnected);
        }
        let limit = s7::max_payload(self.pdu_size);
        if len > limit {
            return Err(PlcError::PduTooSmall {
                requested: len,
                limit,
            });
        }
        Ok(())
    }

    /// 发送请求并读取一个应答帧
    ///
    /// `pdu_ref` 为 `Some` 时丢弃引用不符的迟到应答。
    /// 连接丢失类错误会释放 TCP 连接。
    fn exchange(&mut self, request: &[u8], pdu_ref: Option<u16>) -> Result<Vec<u8>, PlcError> {
        let result = self.exchange_inner(request, pdu_ref);
        if let Err(e) = &result
            && e.is_connection_lost()
            && self.stream.take().is_some()
        {
            warn!(plc = %self.describe(), error = %e, "PLC connection lost");
            self.pdu_size = 0;
        }
        result
    }

    fn exchange_inner(&mut self, request: &[u8], pdu_ref: Option<u16>) -> Result<Vec<u8>, PlcError> {
        let stream = self.stream.as_mut().ok_or(PlcError::NotConnected)?;
        stream.write_all(request).map_err(map_timeout)?;

        for _ in 0..MAX_STALE_FRAMES {
            let frame = read_frame(stream)?;
            match pdu_ref {
                Some(expected) if s7::ack_pdu_ref(&frame) != Some(expected) => {
                    debug!(expected, got = ?s7::ack_pdu_ref(&frame), "dropping stale S7 reply");
                },
                _ => return Ok(frame),
            }
        }
        Err(PlcError::Timeout)
    }

    /// COTP 连接 + Setup Communication，返回协商的 PDU 大小
    fn handshake(&mut self) -> Result<u16, PlcError> {
        let cc = self.exchange(&s7::connection_request(self.rack, self.slot), None)?;
        s7::check_connection_confirm(&cc)?;
        let reply = self.exchange(&s7::setup_request(REQUESTED_PDU_SIZE), None)?;
        Ok(s7::parse_setup_response(&reply)?)
    }
}

fn map_timeout(err: io::Error) -> PlcError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PlcError::Timeout,
        _ => PlcError::Io(err),
    }
}

/// 读取一个完整 TPKT 帧
fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, PlcError> {
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header).map_err(map_timeout)?;
    let len = match s7::tpkt_len(&header) {
        Ok(len) => len,
        // 帧边界已失步，只能断开重连
        Err(e) => {
            return Err(PlcError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                e.to_string(),
            )));
        },
    };
    let mut frame = vec![0u8; len];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    stream
        .read_exact(&mut frame[TPKT_HEADER_LEN..])
        .map_err(map_timeout)?;
    trace!(bytes = len, "S7 frame received");
    Ok(frame)
}

impl DataBlockClient for S7Client {
    fn connect(&mut self) -> Result<(), PlcError> {
        self.disconnect();

        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);

        match self.handshake() {
            Ok(pdu_size) => {
                self.pdu_size = pdu_size;
                info!(plc = %self.describe(), pdu_size, "PLC connected");
                Ok(())
            },
            Err(e) => {
                self.disconnect();
                Err(e)
            },
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(plc = %self.describe(), "PLC disconnected");
        }
        self.pdu_size = 0;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> Result<Vec<u8>, PlcError> {
        self.check_payload(len)?;
        let pdu_ref = self.next_pdu_ref();
        let frame = self.exchange(&s7::read_request(pdu_ref, db, start, len as u16), Some(pdu_ref))?;
        Ok(s7::parse_read_response(&frame, len)?)
    }

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> Result<(), PlcError> {
        self.check_payload(data.len())?;
        let pdu_ref = self.next_pdu_ref();
        let frame = self.exchange(&s7::write_request(pdu_ref, db, start, data), Some(pdu_ref))?;
        Ok(s7::parse_write_response(&frame)?)
    }

    fn describe(&self) -> String {
        format!(
            "{}:{} (rack {}, slot {})",
            self.host, self.port, self.rack, self.slot
        )
    }
}

impl Drop for S7Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
