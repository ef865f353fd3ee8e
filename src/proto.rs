use thiserror::Error;

/// 读卡器/面板链路上的一帧：消息类型、标志位与负载。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

/// 线路格式：`AA 55 | ver | len(LE u16) | type | flags | payload | sum(LE u16)`，
/// `len` 覆盖 type + flags + payload，校验和覆盖 ver 到 payload 末尾。
pub const FRAME_HEADER: [u8; 2] = [0xAA, 0x55];
pub const FRAME_VERSION: u8 = 0x01;

const VERSION_AT: usize = 2;
const LEN_AT: usize = 3;
const BODY_AT: usize = 5;
const CHECKSUM_LEN: usize = 2;

/// 固定开销：header + version + len + checksum。
pub const FRAME_OVERHEAD: usize = BODY_AT + CHECKSUM_LEN;

/// 读卡器 -> 控制器。
pub const MSG_CARD_DETECTED: u8 = 0x01;
pub const MSG_READER_FAULT: u8 = 0x05;
/// 控制器 -> 显示面板。
pub const MSG_PANEL_TEXT: u8 = 0x10;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short")]
    TooShort,
    #[error("bad frame header")]
    BadHeader,
    #[error("unsupported frame version")]
    BadVersion,
    #[error("frame length mismatch")]
    BadLength,
    #[error("frame checksum mismatch")]
    BadChecksum,
    #[error("unexpected message type 0x{0:02X}")]
    UnexpectedType(u8),
    #[error("malformed payload")]
    BadPayload,
}

impl Frame {
    pub fn new(msg_type: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            flags: 0,
            payload,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let body_len = (2 + frame.payload.len()) as u16;
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + body_len as usize);
    out.extend(FRAME_HEADER);
    out.push(FRAME_VERSION);
    out.extend(body_len.to_le_bytes());
    out.extend([frame.msg_type, frame.flags]);
    out.extend(&frame.payload);
    let sum = checksum16(&out[VERSION_AT..]);
    out.extend(sum.to_le_bytes());
    out
}

/// 解析一帧；多余的尾部字节忽略。
pub fn decode_frame(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < FRAME_OVERHEAD + 2 {
        return Err(FrameError::TooShort);
    }
    if !data.starts_with(&FRAME_HEADER) {
        return Err(FrameError::BadHeader);
    }
    if data[VERSION_AT] != FRAME_VERSION {
        return Err(FrameError::BadVersion);
    }
    let body_len = u16::from_le_bytes([data[LEN_AT], data[LEN_AT + 1]]) as usize;
    let body_end = BODY_AT + body_len;
    if body_len < 2 || data.len() < body_end + CHECKSUM_LEN {
        return Err(FrameError::BadLength);
    }
    let sent = u16::from_le_bytes([data[body_end], data[body_end + 1]]);
    if sent != checksum16(&data[VERSION_AT..body_end]) {
        return Err(FrameError::BadChecksum);
    }
    let body = &data[BODY_AT..body_end];
    Ok(Frame {
        msg_type: body[0],
        flags: body[1],
        payload: body[2..].to_vec(),
    })
}

fn checksum16(data: &[u8]) -> u16 {
    data.iter()
        .map(|&byte| u16::from(byte))
        .fold(0, u16::wrapping_add)
}
