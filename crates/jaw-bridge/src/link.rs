//! 控制器链路（指令源 + 状态汇）
//!
//! 链路独占与控制器之间的连接。两种实现：
//! - [`PlcLink`]：S7 数据块，读 Command 块、写 Status 块
//! - [`UdpLink`]：单字节 UDP，只有指令方向

use crate::error::LinkError;
use jaw_io::udp::UdpByteSocket;
use jaw_io::{DataBlockClient, io_error_is_lost};
use jaw_protocol::block::{CommandLayout, StatusLayout};
use jaw_protocol::udp::{apply_invert, byte_to_setpoint};
use jaw_protocol::{Command, Status};
use std::io;
use tracing::{debug, info};

pub trait ControllerLink {
    fn connect(&mut self) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    /// 读取最新指令；本周期没有新数据时返回 `Ok(None)`
    fn read_command(&mut self) -> Result<Option<Command>, LinkError>;

    fn write_status(&mut self, status: &Status) -> Result<(), LinkError>;

    /// 链路描述（用于日志）
    fn describe(&self) -> String;
}

impl<L: ControllerLink + ?Sized> ControllerLink for Box<L> {
    fn connect(&mut self) -> Result<(), LinkError> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn read_command(&mut self) -> Result<Option<Command>, LinkError> {
        (**self).read_command()
    }

    fn write_status(&mut self, status: &Status) -> Result<(), LinkError> {
        (**self).write_status(status)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ============================================================================
// PLC 数据块链路
// ============================================================================

pub struct PlcLink<C: DataBlockClient> {
    client: C,
    command: CommandLayout,
    status: StatusLayout,
}

impl<C: DataBlockClient> PlcLink<C> {
    pub fn new(client: C, command: CommandLayout, status: StatusLayout) -> Self {
        Self {
            client,
            command,
            status,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

impl<C: DataBlockClient> ControllerLink for PlcLink<C> {
    fn connect(&mut self) -> Result<(), LinkError> {
        self.client.connect()?;
        info!(target_plc = %self.client.describe(), "PLC connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.client.disconnect();
    }

    fn read_command(&mut self) -> Result<Option<Command>, LinkError> {
        if !self.client.is_connected() {
            return Err(LinkError::Disconnected("PLC not connected".into()));
        }
        let buf = self
            .client
            .db_read(self.command.db, self.command.start, self.command.size)?;
        let cmd = self
            .command
            .decode(&buf)
            .map_err(|e| LinkError::Transient(e.to_string()))?;
        Ok(Some(cmd))
    }

    fn write_status(&mut self, status: &Status) -> Result<(), LinkError> {
        if !self.client.is_connected() {
            return Err(LinkError::Disconnected("PLC not connected".into()));
        }
        let buf = self.status.encode(status);
        self.client.db_write(self.status.db, self.status.start, &buf)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "s7://{} (command DB{}, status DB{})",
            self.client.describe(),
            self.command.db,
            self.status.db
        )
    }
}

// ============================================================================
// 单字节 UDP 链路
// ============================================================================

/// 单字节 UDP 链路
///
/// 字节值变化时本地序列号加一，同值重复报文产生同一序列号，由门控去重。
/// 速度/加速度取配置值，始终使能。没有状态汇。
pub struct UdpLink {
    socket: UdpByteSocket,
    invert: bool,
    velocity_sp: i16,
    accel_sp: i16,
    last_byte: Option<u8>,
    sequence: u16,
}

impl UdpLink {
    pub fn new(bind: impl Into<String>, invert: bool, velocity_sp: i16, accel_sp: i16) -> Self {
        Self {
            socket: UdpByteSocket::new(bind),
            invert,
            velocity_sp,
            accel_sp,
            last_byte: None,
            sequence: 0,
        }
    }

    pub fn socket(&self) -> &UdpByteSocket {
        &self.socket
    }

    fn command_for(&mut self, byte: u8) -> Command {
        let byte = apply_invert(byte, self.invert);
        if self.last_byte != Some(byte) {
            self.last_byte = Some(byte);
            self.sequence = self.sequence.wrapping_add(1);
            debug!(byte, sequence = self.sequence, "new UDP position");
        }
        Command {
            position_sp: byte_to_setpoint(byte),
            velocity_sp: self.velocity_sp,
            accel_sp: self.accel_sp,
            invert: false,
            enable: true,
            sequence: self.sequence,
        }
    }
}

fn udp_error(e: io::Error) -> LinkError {
    if e.kind() == io::ErrorKind::NotConnected || io_error_is_lost(&e) {
        LinkError::Disconnected(e.to_string())
    } else {
        LinkError::Transient(e.to_string())
    }
}

impl ControllerLink for UdpLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        self.socket.open().map_err(udp_error)?;
        info!(bind = %self.socket.bind_addr(), "UDP listener ready");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket.close();
        self.last_byte = None;
    }

    fn read_command(&mut self) -> Result<Option<Command>, LinkError> {
        let byte = self.socket.drain().map_err(udp_error)?;
        Ok(byte.map(|b| self.command_for(b)))
    }

    fn write_status(&mut self, _status: &Status) -> Result<(), LinkError> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.socket.bind_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jaw_io::PlcError;
    use std::collections::HashMap;
    use std::net::UdpSocket;

    /// 内存数据块
    #[derive(Default)]
    struct MemoryPlc {
        connected: bool,
        blocks: HashMap<u16, Vec<u8>>,
        fail_next: Option<PlcError>,
    }

    impl DataBlockClient for MemoryPlc {
        fn connect(&mut self) -> Result<(), PlcError> {
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn db_read(&mut self, db: u16, start: u32, len: usize) -> Result<Vec<u8>, PlcError> {
            if let Some(e) = self.fail_next.take() {
                return Err(e);
            }
            let block = self.blocks.entry(db).or_insert_with(|| vec![0; 64]);
            Ok(block[start as usize..start as usize + len].to_vec())
        }

        fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> Result<(), PlcError> {
            if let Some(e) = self.fail_next.take() {
                return Err(e);
            }
            let block = self.blocks.entry(db).or_insert_with(|| vec![0; 64]);
            block[start as usize..start as usize + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn plc_link() -> PlcLink<MemoryPlc> {
        PlcLink::new(MemoryPlc::default(), CommandLayout::default(), StatusLayout::default())
    }

    #[test]
    fn test_plc_read_requires_connection() {
        let mut link = plc_link();
        let err = link.read_command().unwrap_err();
        assert!(err.is_disconnected());
    }

    #[test]
    fn test_plc_read_command() {
        let mut link = plc_link();
        link.connect().unwrap();
        let block = link.client_mut().blocks.entry(1).or_insert_with(|| vec![0; 64]);
        block[..12].copy_from_slice(&[0x01, 0xF4, 0x03, 0xE8, 0x00, 0x64, 0b10, 0, 0x12, 0x34, 0, 0]);

        let cmd = link.read_command().unwrap().unwrap();
        assert_eq!(cmd.position_sp, 500);
        assert_eq!(cmd.velocity_sp, 1000);
        assert_eq!(cmd.accel_sp, 100);
        assert!(cmd.enable);
        assert!(!cmd.invert);
        assert_eq!(cmd.sequence, 0x1234);
    }

    #[test]
    fn test_plc_write_status() {
        let mut link = plc_link();
        link.connect().unwrap();
        let status = Status {
            position_fb: 1000,
            velocity_fb: 0,
            ack_sequence: 9,
            hw_ok: true,
            sw_ok: false,
            timestamp_ms: 0x1_0000_0001,
        };
        link.write_status(&status).unwrap();
        let block = &link.client().blocks[&2];
        assert_eq!(&block[..12], &[0x03, 0xE8, 0, 0, 0, 9, 0b01, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_plc_error_classification() {
        let mut link = plc_link();
        link.connect().unwrap();

        link.client_mut().fail_next = Some(PlcError::Timeout);
        assert_eq!(
            link.read_command().unwrap_err(),
            LinkError::Transient(PlcError::Timeout.to_string())
        );

        link.client_mut().fail_next =
            Some(PlcError::Io(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(link.read_command().unwrap_err().is_disconnected());
    }

    #[test]
    fn test_udp_sequence_follows_byte_changes() {
        let mut link = UdpLink::new("127.0.0.1:0", false, 800, 600);
        link.connect().unwrap();
        let addr = link.socket().local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        assert_eq!(link.read_command().unwrap(), None);

        sender.send_to(&[255], addr).unwrap();
        let first = wait_for_command(&mut link);
        assert_eq!(first.position_sp, 1000);
        assert_eq!(first.velocity_sp, 800);
        assert_eq!(first.accel_sp, 600);
        assert!(first.enable);

        sender.send_to(&[255], addr).unwrap();
        let repeat = wait_for_command(&mut link);
        assert_eq!(repeat.sequence, first.sequence);

        sender.send_to(&[0], addr).unwrap();
        let changed = wait_for_command(&mut link);
        assert_eq!(changed.position_sp, 0);
        assert_eq!(changed.sequence, first.sequence.wrapping_add(1));
    }

    #[test]
    fn test_udp_invert() {
        let mut link = UdpLink::new("127.0.0.1:0", true, 1000, 1000);
        link.connect().unwrap();
        let addr = link.socket().local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        sender.send_to(&[255], addr).unwrap();
        let cmd = wait_for_command(&mut link);
        assert_eq!(cmd.position_sp, 0);
        assert!(!cmd.invert);
    }

    #[test]
    fn test_udp_closed_socket_is_disconnected() {
        let mut link = UdpLink::new("127.0.0.1:0", false, 1000, 1000);
        assert!(link.read_command().unwrap_err().is_disconnected());
        assert!(link.write_status(&Status::default()).is_ok());
    }

    fn wait_for_command(link: &mut UdpLink) -> Command {
        for _ in 0..200 {
            if let Some(cmd) = link.read_command().unwrap() {
                return cmd;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("no datagram received");
    }
}
