//! Dynamixel 串口总线
//!
//! 半双工 TTL/RS-485 总线。一次事务先清空接收缓冲区，再写入指令包，
//! 然后在截止时间内读回一个状态包。截止时间覆盖整个事务。

use crate::{BusError, ServoBus};
use jaw_protocol::ProtocolError;
use jaw_protocol::dxl::{self, HEADER, PREAMBLE_LEN, StatusPacket};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 基于 `serialport` 的总线实现
pub struct SerialServoBus {
    path: String,
    baud: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialServoBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialServoBus")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .field("timeout", &self.timeout)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialServoBus {
    /// 打开串口
    ///
    /// # 错误
    /// - `BusError::Serial`: 设备不存在、权限不足或波特率不被支持
    pub fn open(path: impl Into<String>, baud: u32, timeout: Duration) -> Result<Self, BusError> {
        let mut bus = Self {
            path: path.into(),
            baud,
            timeout,
            port: None,
        };
        bus.open_port()?;
        Ok(bus)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_port(&mut self) -> Result<(), BusError> {
        let port = serialport::new(&self.path, self.baud).timeout(self.timeout).open()?;
        debug!(path = %self.path, baud = self.baud, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    /// 出错时若句柄已不可用则释放，之后 `is_open()` 返回 false
    fn check_lost(&mut self, err: BusError) -> BusError {
        if err.is_connection_lost() && self.port.take().is_some() {
            warn!(path = %self.path, error = %err, "serial port lost");
        }
        err
    }

    fn transact_inner(&mut self, request: &[u8], expected_id: u8) -> Result<StatusPacket, BusError> {
        let deadline = Instant::now() + self.timeout;
        let port = self.port.as_mut().ok_or(BusError::NotOpen)?;

        port.clear(ClearBuffer::Input)?;
        port.write_all(request)?;
        port.flush()?;
        trace!(bytes = request.len(), "dxl request sent");

        // 同步到包头（总线上可能残留回波或噪声）
        let mut packet = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        while packet.len() < HEADER.len() || packet[packet.len() - HEADER.len()..] != HEADER {
            read_exact_until(&mut **port, &mut byte, deadline)?;
            packet.push(byte[0]);
            if packet.len() > dxl::MAX_PACKET_LEN {
                return Err(ProtocolError::InvalidHeader.into());
            }
        }
        packet.drain(..packet.len() - HEADER.len());

        let mut rest = [0u8; PREAMBLE_LEN - 4];
        read_exact_until(&mut **port, &mut rest, deadline)?;
        packet.extend_from_slice(&rest);

        let total = dxl::total_len_from_preamble(&packet)?;
        let mut body = vec![0u8; total - PREAMBLE_LEN];
        read_exact_until(&mut **port, &mut body, deadline)?;
        packet.extend_from_slice(&body);

        let status = dxl::decode_status(&packet)?;
        if status.id != expected_id {
            return Err(ProtocolError::IdMismatch {
                expected: expected_id,
                actual: status.id,
            }
            .into());
        }
        Ok(status)
    }
}

/// 在截止时间前读满 `buf`
fn read_exact_until(
    port: &mut dyn SerialPort,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), BusError> {
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BusError::Timeout);
        }
        port.set_timeout(remaining)?;
        match port.read(&mut buf[filled..]) {
            Ok(0) => return Err(BusError::Disconnected),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(BusError::Timeout),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(BusError::Io(e)),
        }
    }
    Ok(())
}

impl ServoBus for SerialServoBus {
    fn transact(&mut self, request: &[u8], expected_id: u8) -> Result<StatusPacket, BusError> {
        self.transact_inner(request, expected_id).map_err(|e| self.check_lost(e))
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn reopen(&mut self) -> Result<(), BusError> {
        self.port = None;
        self.open_port()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
    }
}
