//! PLC 数据块布局
//!
//! Command / Status 缓冲区的字段偏移是数据而不是代码：
//! 默认布局与现场 PLC 程序一致，可以按字段在配置文件中覆盖。
//! 所有偏移相对于块起始地址（`start`），多字节字段为大端。

use crate::{
    ProtocolError, read_i16_be, read_u16_be, write_i16_be, write_u16_be, write_u32_be,
};

/// 控制器下发的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Command {
    /// 位置设定值（0..=1000，越界值由缩放器钳位）
    pub position_sp: i16,
    /// 速度设定值（0..=1000）
    pub velocity_sp: i16,
    /// 加速度设定值（0..=1000）
    pub accel_sp: i16,
    pub invert: bool,
    pub enable: bool,
    /// 新指令标记（不透明，16 位回绕）
    pub sequence: u16,
}

/// 回写给控制器的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub position_fb: u16,
    pub velocity_fb: u16,
    /// 最近一次被接受的指令序号
    pub ack_sequence: u16,
    pub hw_ok: bool,
    pub sw_ok: bool,
    pub timestamp_ms: u64,
}

// ============================================================================
// 布局
// ============================================================================

/// Command 块布局
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct CommandLayout {
    pub db: u16,
    pub start: u32,
    pub size: usize,
    pub position_sp: usize,
    pub velocity_sp: usize,
    pub accel_sp: usize,
    pub flags: usize,
    pub invert_bit: u8,
    pub enable_bit: u8,
    pub sequence: usize,
}

impl Default for CommandLayout {
    fn default() -> Self {
        Self {
            db: 1,
            start: 0,
            size: 12,
            position_sp: 0,
            velocity_sp: 2,
            accel_sp: 4,
            flags: 6,
            invert_bit: 0,
            enable_bit: 1,
            sequence: 8,
        }
    }
}

/// Status 块布局
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct StatusLayout {
    pub db: u16,
    pub start: u32,
    pub size: usize,
    pub position_fb: usize,
    pub velocity_fb: usize,
    pub ack_sequence: usize,
    pub flags: usize,
    pub hw_ok_bit: u8,
    pub sw_ok_bit: u8,
    pub timestamp_ms: usize,
}

impl Default for StatusLayout {
    fn default() -> Self {
        Self {
            db: 2,
            start: 0,
            size: 12,
            position_fb: 0,
            velocity_fb: 2,
            ack_sequence: 4,
            flags: 6,
            hw_ok_bit: 0,
            sw_ok_bit: 1,
            timestamp_ms: 8,
        }
    }
}

/// 校验字段：不越界、不重叠
fn check_fields(block: &str, size: usize, fields: &[(&str, usize, usize)]) -> Result<(), ProtocolError> {
    for &(name, offset, width) in fields {
        if offset + width > size {
            return Err(ProtocolError::InvalidLayout(format!(
                "{block}.{name} at {offset}..{} exceeds block size {size}",
                offset + width
            )));
        }
    }

    for (i, &(a, a_off, a_width)) in fields.iter().enumerate() {
        for &(b, b_off, b_width) in &fields[i + 1..] {
            if a_off < b_off + b_width && b_off < a_off + a_width {
                return Err(ProtocolError::InvalidLayout(format!(
                    "{block}.{a} overlaps {block}.{b}"
                )));
            }
        }
    }
    Ok(())
}

fn check_bits(block: &str, bits: &[(&str, u8)]) -> Result<(), ProtocolError> {
    for &(name, bit) in bits {
        if bit >= 8 {
            return Err(ProtocolError::InvalidLayout(format!(
                "{block}.{name} bit index {bit} must be < 8"
            )));
        }
    }
    if bits.len() == 2 && bits[0].1 == bits[1].1 {
        return Err(ProtocolError::InvalidLayout(format!(
            "{block}.{} and {block}.{} share bit {}",
            bits[0].0, bits[1].0, bits[0].1
        )));
    }
    Ok(())
}

fn check_len(buf: &[u8], size: usize) -> Result<(), ProtocolError> {
    if buf.len() < size {
        return Err(ProtocolError::InvalidLength {
            expected: size,
            actual: buf.len(),
        });
    }
    Ok(())
}

impl CommandLayout {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.size == 0 {
            return Err(ProtocolError::InvalidLayout("command.size must be > 0".into()));
        }
        check_fields(
            "command",
            self.size,
            &[
                ("position_sp", self.position_sp, 2),
                ("velocity_sp", self.velocity_sp, 2),
                ("accel_sp", self.accel_sp, 2),
                ("flags", self.flags, 1),
                ("sequence", self.sequence, 2),
            ],
        )?;
        check_bits(
            "command",
            &[("invert_bit", self.invert_bit), ("enable_bit", self.enable_bit)],
        )
    }

    /// 解析 Command 块（`buf` 从块起始处开始）
    pub fn decode(&self, buf: &[u8]) -> Result<Command, ProtocolError> {
        check_len(buf, self.size)?;
        let flags = buf[self.flags];
        Ok(Command {
            position_sp: read_i16_be(buf, self.position_sp),
            velocity_sp: read_i16_be(buf, self.velocity_sp),
            accel_sp: read_i16_be(buf, self.accel_sp),
            invert: flags & (1 << self.invert_bit) != 0,
            enable: flags & (1 << self.enable_bit) != 0,
            sequence: read_u16_be(buf, self.sequence),
        })
    }

    /// 编码 Command 块（模拟 PLC 与测试使用）
    pub fn encode(&self, cmd: &Command) -> Vec<u8> {
        let mut buf = vec![0u8; self.size];
        write_i16_be(&mut buf, self.position_sp, cmd.position_sp);
        write_i16_be(&mut buf, self.velocity_sp, cmd.velocity_sp);
        write_i16_be(&mut buf, self.accel_sp, cmd.accel_sp);
        let mut flags = 0u8;
        if cmd.invert {
            flags |= 1 << self.invert_bit;
        }
        if cmd.enable {
            flags |= 1 << self.enable_bit;
        }
        buf[self.flags] = flags;
        write_u16_be(&mut buf, self.sequence, cmd.sequence);
        buf
    }
}

impl StatusLayout {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.size == 0 {
            return Err(ProtocolError::InvalidLayout("status.size must be > 0".into()));
        }
        check_fields(
            "status",
            self.size,
            &[
                ("position_fb", self.position_fb, 2),
                ("velocity_fb", self.velocity_fb, 2),
                ("ack_sequence", self.ack_sequence, 2),
                ("flags", self.flags, 1),
                ("timestamp_ms", self.timestamp_ms, 4),
            ],
        )?;
        check_bits(
            "status",
            &[("hw_ok_bit", self.hw_ok_bit), ("sw_ok_bit", self.sw_ok_bit)],
        )
    }

    /// 编码 Status 块
    ///
    /// 反馈值以 i16 写出（0..=1000 在正数范围内）；时间戳只写低 32 位。
    pub fn encode(&self, status: &Status) -> Vec<u8> {
        let mut buf = vec![0u8; self.size];
        write_i16_be(&mut buf, self.position_fb, status.position_fb.min(i16::MAX as u16) as i16);
        write_i16_be(&mut buf, self.velocity_fb, status.velocity_fb.min(i16::MAX as u16) as i16);
        write_u16_be(&mut buf, self.ack_sequence, status.ack_sequence);
        let mut flags = 0u8;
        if status.hw_ok {
            flags |= 1 << self.hw_ok_bit;
        }
        if status.sw_ok {
            flags |= 1 << self.sw_ok_bit;
        }
        buf[self.flags] = flags;
        write_u32_be(&mut buf, self.timestamp_ms, status.timestamp_ms as u32);
        buf
    }

    /// 解析 Status 块（测试与诊断使用）
    pub fn decode(&self, buf: &[u8]) -> Result<Status, ProtocolError> {
        check_len(buf, self.size)?;
        let flags = buf[self.flags];
        let ts = u32::from_be_bytes([
            buf[self.timestamp_ms],
            buf[self.timestamp_ms + 1],
            buf[self.timestamp_ms + 2],
            buf[self.timestamp_ms + 3],
        ]);
        Ok(Status {
            position_fb: read_i16_be(buf, self.position_fb).max(0) as u16,
            velocity_fb: read_i16_be(buf, self.velocity_fb).max(0) as u16,
            ack_sequence: read_u16_be(buf, self.ack_sequence),
            hw_ok: flags & (1 << self.hw_ok_bit) != 0,
            sw_ok: flags & (1 << self.sw_ok_bit) != 0,
            timestamp_ms: ts as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layouts_are_valid() {
        assert!(CommandLayout::default().validate().is_ok());
        assert!(StatusLayout::default().validate().is_ok());
    }

    #[test]
    fn test_command_decode_default_layout() {
        let buf = [
            0x01, 0xF4, // position_sp = 500
            0x03, 0xE8, // velocity_sp = 1000
            0xFF, 0xFF, // accel_sp = -1
            0b0000_0010, // enable
            0x00, 0x12, 0x34, // sequence = 0x1234
            0x00, 0x00,
        ];
        let cmd = CommandLayout::default().decode(&buf).unwrap();
        assert_eq!(cmd.position_sp, 500);
        assert_eq!(cmd.velocity_sp, 1000);
        assert_eq!(cmd.accel_sp, -1);
        assert!(cmd.enable);
        assert!(!cmd.invert);
        assert_eq!(cmd.sequence, 0x1234);
    }

    #[test]
    fn test_command_decode_short_buffer() {
        let err = CommandLayout::default().decode(&[0u8; 8]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 12,
                actual: 8
            }
        );
    }

    #[test]
    fn test_status_encode_default_layout() {
        let status = Status {
            position_fb: 1000,
            velocity_fb: 12,
            ack_sequence: 0xBEEF,
            hw_ok: true,
            sw_ok: true,
            timestamp_ms: 0x1_0000_0005,
        };
        let buf = StatusLayout::default().encode(&status);
        assert_eq!(
            buf,
            vec![0x03, 0xE8, 0x00, 0x0C, 0xBE, 0xEF, 0b11, 0x00, 0x00, 0x00, 0x00, 0x05]
        );

        let back = StatusLayout::default().decode(&buf).unwrap();
        assert_eq!(back.timestamp_ms, 5);
        assert_eq!(back.ack_sequence, 0xBEEF);
    }

    #[test]
    fn test_custom_layout_offsets() {
        let layout = CommandLayout {
            size: 16,
            sequence: 14,
            flags: 12,
            invert_bit: 7,
            enable_bit: 0,
            ..CommandLayout::default()
        };
        layout.validate().unwrap();
        let cmd = Command {
            position_sp: 250,
            velocity_sp: 10,
            accel_sp: 20,
            invert: true,
            enable: true,
            sequence: 9,
        };
        let buf = layout.encode(&cmd);
        assert_eq!(buf[12], 0b1000_0001);
        assert_eq!(layout.decode(&buf).unwrap(), cmd);
    }

    #[test]
    fn test_layout_rejects_overflow() {
        let layout = CommandLayout {
            sequence: 11,
            ..CommandLayout::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(ProtocolError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_layout_rejects_overlap() {
        let layout = StatusLayout {
            velocity_fb: 1,
            ..StatusLayout::default()
        };
        let err = layout.validate().unwrap_err();
        assert!(err.to_string().contains("overlaps"), "{err}");
    }

    #[test]
    fn test_layout_rejects_bad_bits() {
        let layout = CommandLayout {
            enable_bit: 8,
            ..CommandLayout::default()
        };
        assert!(layout.validate().is_err());

        let layout = StatusLayout {
            sw_ok_bit: 0,
            ..StatusLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_layout_from_toml_overrides_single_field() {
        let layout: CommandLayout = toml::from_str("db = 7\nsequence = 10\n").unwrap();
        assert_eq!(layout.db, 7);
        assert_eq!(layout.sequence, 10);
        assert_eq!(layout.flags, 6);

        let unknown: Result<StatusLayout, _> = toml::from_str("hw_ok = 1\n");
        assert!(unknown.is_err());
    }
}
