//! S7 通信（ISO-on-TCP）报文
//!
//! 只实现桥接器需要的子集：COTP 连接、Setup Communication、
//! 对 DB 区的 Read Var / Write Var（字节传输）。
//!
//! ```text
//! TPKT(4) | COTP DT(3) | S7 Header(10/12) | Parameters | Data
//! ```

use crate::ProtocolError;

/// ISO-on-TCP 端口
pub const ISO_TCP_PORT: u16 = 102;

/// 请求的 PDU 大小
pub const REQUESTED_PDU_SIZE: u16 = 480;

pub const TPKT_HEADER_LEN: usize = 4;
const COTP_DT_LEN: usize = 3;
const S7_JOB_HEADER_LEN: usize = 10;
const S7_ACK_HEADER_LEN: usize = 12;

/// 应答报文中参数区的起始偏移
const ACK_PARAM_OFFSET: usize = TPKT_HEADER_LEN + COTP_DT_LEN + S7_ACK_HEADER_LEN;

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;

const FUNC_READ_VAR: u8 = 0x04;
const FUNC_WRITE_VAR: u8 = 0x05;
const FUNC_SETUP_COMM: u8 = 0xF0;

/// 区域：数据块
const AREA_DB: u8 = 0x84;
/// 传输尺寸：BYTE
const TRANSPORT_BYTE: u8 = 0x02;
/// 数据区传输尺寸：BYTE/WORD/DWORD（长度以 bit 计）
const DATA_TRANSPORT_BYTES: u8 = 0x04;

/// 条目返回码：成功
pub const ITEM_SUCCESS: u8 = 0xFF;

/// COTP 连接确认 PDU 类型
const COTP_CC: u8 = 0xD0;

fn tpkt_wrap(payload: &[u8]) -> Vec<u8> {
    let total = (TPKT_HEADER_LEN + payload.len()) as u16;
    let mut frame = Vec::with_capacity(total as usize);
    frame.extend_from_slice(&[0x03, 0x00]);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// 从 TPKT 头读取整帧长度
pub fn tpkt_len(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() < TPKT_HEADER_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: TPKT_HEADER_LEN,
            actual: header.len(),
        });
    }
    if header[0] != 0x03 {
        return Err(ProtocolError::InvalidHeader);
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len < TPKT_HEADER_LEN + COTP_DT_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: TPKT_HEADER_LEN + COTP_DT_LEN,
            actual: len,
        });
    }
    Ok(len)
}

// ============================================================================
// 连接
// ============================================================================

/// COTP 连接请求
///
/// 本地 TSAP 0x0100，远端 TSAP `01, rack*32+slot`，TPDU 1024。
pub fn connection_request(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = rack.wrapping_mul(32).wrapping_add(slot);
    tpkt_wrap(&[
        0x11, // COTP 长度
        0xE0, // CR
        0x00, 0x00, // 目标引用
        0x00, 0x01, // 源引用
        0x00, // 类别
        0xC0, 0x01, 0x0A, // TPDU size = 1024
        0xC1, 0x02, 0x01, 0x00, // 本地 TSAP
        0xC2, 0x02, 0x01, remote_tsap, // 远端 TSAP
    ])
}

/// 校验 COTP 连接确认
pub fn check_connection_confirm(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < 6 {
        return Err(ProtocolError::InvalidLength {
            expected: 6,
            actual: frame.len(),
        });
    }
    if frame[5] != COTP_CC {
        return Err(ProtocolError::UnexpectedInstruction(frame[5]));
    }
    Ok(())
}

fn job_frame(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(COTP_DT_LEN + S7_JOB_HEADER_LEN + params.len() + data.len());
    payload.extend_from_slice(&[0x02, 0xF0, 0x80]);
    payload.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_ref.to_be_bytes());
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt_wrap(&payload)
}

/// Setup Communication 请求
pub fn setup_request(pdu_size: u16) -> Vec<u8> {
    let mut params = vec![FUNC_SETUP_COMM, 0x00, 0x00, 0x01, 0x00, 0x01];
    params.extend_from_slice(&pdu_size.to_be_bytes());
    job_frame(0, &params, &[])
}

/// 校验 ack_data 头，返回 (参数区长度, 数据区长度)
fn parse_ack_header(frame: &[u8]) -> Result<(usize, usize), ProtocolError> {
    if frame.len() < ACK_PARAM_OFFSET {
        return Err(ProtocolError::InvalidLength {
            expected: ACK_PARAM_OFFSET,
            actual: frame.len(),
        });
    }
    let s7 = &frame[TPKT_HEADER_LEN + COTP_DT_LEN..];
    if s7[0] != S7_PROTOCOL_ID {
        return Err(ProtocolError::InvalidHeader);
    }
    if s7[1] != ROSCTR_ACK_DATA {
        return Err(ProtocolError::UnexpectedInstruction(s7[1]));
    }
    let (class, code) = (s7[10], s7[11]);
    if class != 0 || code != 0 {
        return Err(ProtocolError::S7Header { class, code });
    }
    let param_len = u16::from_be_bytes([s7[6], s7[7]]) as usize;
    let data_len = u16::from_be_bytes([s7[8], s7[9]]) as usize;
    let needed = ACK_PARAM_OFFSET + param_len + data_len;
    if frame.len() < needed {
        return Err(ProtocolError::InvalidLength {
            expected: needed,
            actual: frame.len(),
        });
    }
    Ok((param_len, data_len))
}

/// 应答报文的 PDU 引用（用于丢弃超时后迟到的旧应答）
pub fn ack_pdu_ref(frame: &[u8]) -> Option<u16> {
    let offset = TPKT_HEADER_LEN + COTP_DT_LEN;
    if frame.len() < offset + 6 || frame[offset] != S7_PROTOCOL_ID {
        return None;
    }
    Some(u16::from_be_bytes([frame[offset + 4], frame[offset + 5]]))
}

/// 单次读写的最大数据量（PDU 减去头部与条目开销）
pub fn max_payload(pdu_size: u16) -> usize {
    (pdu_size as usize).saturating_sub(S7_ACK_HEADER_LEN + 2 + 4 + 10)
}

/// 解析 Setup Communication 应答，返回协商后的 PDU 大小
pub fn parse_setup_response(frame: &[u8]) -> Result<u16, ProtocolError> {
    let (param_len, _) = parse_ack_header(frame)?;
    if param_len < 8 {
        return Err(ProtocolError::InvalidLength {
            expected: 8,
            actual: param_len,
        });
    }
    let params = &frame[ACK_PARAM_OFFSET..];
    if params[0] != FUNC_SETUP_COMM {
        return Err(ProtocolError::UnexpectedInstruction(params[0]));
    }
    Ok(u16::from_be_bytes([params[6], params[7]]))
}

// ============================================================================
// 读写 DB
// ============================================================================

fn db_item(function: u8, db: u16, start: u32, len: u16) -> Vec<u8> {
    let bit_addr = start * 8;
    let mut params = vec![
        function,
        0x01, // 条目数
        0x12, // 变量规格
        0x0A, // 后续长度
        0x10, // S7ANY
        TRANSPORT_BYTE,
    ];
    params.extend_from_slice(&len.to_be_bytes());
    params.extend_from_slice(&db.to_be_bytes());
    params.push(AREA_DB);
    params.extend_from_slice(&bit_addr.to_be_bytes()[1..]);
    params
}

/// Read Var 请求（单条目，DB 区，字节传输）
pub fn read_request(pdu_ref: u16, db: u16, start: u32, len: u16) -> Vec<u8> {
    job_frame(pdu_ref, &db_item(FUNC_READ_VAR, db, start, len), &[])
}

/// Write Var 请求
pub fn write_request(pdu_ref: u16, db: u16, start: u32, data: &[u8]) -> Vec<u8> {
    let params = db_item(FUNC_WRITE_VAR, db, start, data.len() as u16);
    let mut item = Vec::with_capacity(4 + data.len());
    item.push(0x00);
    item.push(DATA_TRANSPORT_BYTES);
    item.extend_from_slice(&((data.len() * 8) as u16).to_be_bytes());
    item.extend_from_slice(data);
    job_frame(pdu_ref, &params, &item)
}

/// 解析 Read Var 应答，返回读取到的字节
pub fn parse_read_response(frame: &[u8], expected_len: usize) -> Result<Vec<u8>, ProtocolError> {
    let (param_len, data_len) = parse_ack_header(frame)?;
    let data_offset = ACK_PARAM_OFFSET + param_len;
    if param_len < 2 || frame[ACK_PARAM_OFFSET] != FUNC_READ_VAR {
        return Err(ProtocolError::UnexpectedInstruction(
            frame.get(ACK_PARAM_OFFSET).copied().unwrap_or(0),
        ));
    }
    if data_len < 1 {
        return Err(ProtocolError::InvalidLength {
            expected: 4 + expected_len,
            actual: data_len,
        });
    }
    let item = &frame[data_offset..data_offset + data_len];
    if item[0] != ITEM_SUCCESS {
        return Err(ProtocolError::S7Item(item[0]));
    }
    if item.len() < 4 {
        return Err(ProtocolError::InvalidLength {
            expected: 4 + expected_len,
            actual: item.len(),
        });
    }

    // 传输尺寸 0x04 时长度以 bit 计，0x09 (octet string) 以字节计
    let raw_len = u16::from_be_bytes([item[2], item[3]]) as usize;
    let byte_len = if item[1] == DATA_TRANSPORT_BYTES {
        raw_len / 8
    } else {
        raw_len
    };
    if byte_len != expected_len || item.len() < 4 + byte_len {
        return Err(ProtocolError::InvalidLength {
            expected: expected_len,
            actual: byte_len.min(item.len().saturating_sub(4)),
        });
    }
    Ok(item[4..4 + byte_len].to_vec())
}

/// 解析 Write Var 应答
pub fn parse_write_response(frame: &[u8]) -> Result<(), ProtocolError> {
    let (param_len, data_len) = parse_ack_header(frame)?;
    if param_len < 2 || frame[ACK_PARAM_OFFSET] != FUNC_WRITE_VAR {
        return Err(ProtocolError::UnexpectedInstruction(
            frame.get(ACK_PARAM_OFFSET).copied().unwrap_or(0),
        ));
    }
    if data_len < 1 {
        return Err(ProtocolError::InvalidLength {
            expected: 1,
            actual: 0,
        });
    }
    let code = frame[ACK_PARAM_OFFSET + param_len];
    if code != ITEM_SUCCESS {
        return Err(ProtocolError::S7Item(code));
    }
    Ok(())
}

// ============================================================================
// 应答构建（模拟 PLC 与测试使用）
// ============================================================================

fn ack_frame(pdu_ref: u16, params: &[u8], data: &[u8], class: u8, code: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(COTP_DT_LEN + S7_ACK_HEADER_LEN + params.len() + data.len());
    payload.extend_from_slice(&[0x02, 0xF0, 0x80]);
    payload.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_ACK_DATA, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_ref.to_be_bytes());
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.push(class);
    payload.push(code);
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt_wrap(&payload)
}

/// COTP 连接确认
pub fn connection_confirm() -> Vec<u8> {
    tpkt_wrap(&[
        0x11, COTP_CC, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01, 0x00,
        0xC2, 0x02, 0x01, 0x01,
    ])
}

/// Setup Communication 应答
pub fn setup_response(pdu_size: u16) -> Vec<u8> {
    let mut params = vec![FUNC_SETUP_COMM, 0x00, 0x00, 0x01, 0x00, 0x01];
    params.extend_from_slice(&pdu_size.to_be_bytes());
    ack_frame(0, &params, &[], 0, 0)
}

/// Read Var 应答
pub fn read_response(pdu_ref: u16, return_code: u8, data: &[u8]) -> Vec<u8> {
    let mut item = vec![return_code, DATA_TRANSPORT_BYTES];
    item.extend_from_slice(&((data.len() * 8) as u16).to_be_bytes());
    item.extend_from_slice(data);
    ack_frame(pdu_ref, &[FUNC_READ_VAR, 0x01], &item, 0, 0)
}

/// Write Var 应答
pub fn write_response(pdu_ref: u16, return_code: u8) -> Vec<u8> {
    ack_frame(pdu_ref, &[FUNC_WRITE_VAR, 0x01], &[return_code], 0, 0)
}

/// 头部错误应答（例如 PLC 拒绝访问）
pub fn error_response(pdu_ref: u16, class: u8, code: u8) -> Vec<u8> {
    ack_frame(pdu_ref, &[], &[], class, code)
}

/// 解析 Job 请求的 PDU 引用与功能码（模拟 PLC 使用）
pub fn parse_job(frame: &[u8]) -> Result<(u16, u8), ProtocolError> {
    let offset = TPKT_HEADER_LEN + COTP_DT_LEN;
    if frame.len() < offset + S7_JOB_HEADER_LEN + 1 {
        return Err(ProtocolError::InvalidLength {
            expected: offset + S7_JOB_HEADER_LEN + 1,
            actual: frame.len(),
        });
    }
    if frame[offset] != S7_PROTOCOL_ID || frame[offset + 1] != ROSCTR_JOB {
        return Err(ProtocolError::InvalidHeader);
    }
    let pdu_ref = u16::from_be_bytes([frame[offset + 4], frame[offset + 5]]);
    Ok((pdu_ref, frame[offset + S7_JOB_HEADER_LEN]))
}
