//! 单字节 UDP 位置指令
//!
//! 每个数据报的第一个字节是位置（0..=255），速度/加速度/使能隐含。

use crate::SETPOINT_SCALE;

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 5006;

/// 可选反转：`255 - b`
pub fn apply_invert(byte: u8, invert: bool) -> u8 {
    if invert { u8::MAX - byte } else { byte }
}

/// 字节 → 归一化位置设定值（0..=1000，四舍五入）
pub fn byte_to_setpoint(byte: u8) -> i16 {
    ((byte as f64) * SETPOINT_SCALE as f64 / u8::MAX as f64).round() as i16
}

/// 取数据报的位置字节（空报文返回 None）
pub fn decode_datagram(datagram: &[u8]) -> Option<u8> {
    datagram.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_to_setpoint_endpoints() {
        assert_eq!(byte_to_setpoint(0), 0);
        assert_eq!(byte_to_setpoint(255), 1000);
        assert_eq!(byte_to_setpoint(128), 502);
    }

    #[test]
    fn test_apply_invert() {
        assert_eq!(apply_invert(0, true), 255);
        assert_eq!(apply_invert(200, true), 55);
        assert_eq!(apply_invert(200, false), 200);
    }

    #[test]
    fn test_decode_datagram() {
        assert_eq!(decode_datagram(&[]), None);
        assert_eq!(decode_datagram(&[7, 8, 9]), Some(7));
    }
}
