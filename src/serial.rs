use crate::display::TextFrame;
use crate::proto::{Frame, FrameError, MSG_CARD_DETECTED, MSG_PANEL_TEXT, MSG_READER_FAULT};

/// 读卡器上报的刷卡事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardDetected {
    pub card_id: String,
    pub reader_id: u16,
}

impl CardDetected {
    /// 编码为串口协议帧。
    pub fn to_frame(&self) -> Frame {
        let mut out = Vec::new();
        write_string(&mut out, &self.card_id);
        out.extend_from_slice(&self.reader_id.to_le_bytes());
        Frame::new(MSG_CARD_DETECTED, out)
    }
}

/// 读卡器上行消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderMessage {
    Card(CardDetected),
    Fault { code: u8 },
}

/// 从帧中解析读卡器消息。
pub fn reader_message_from_frame(frame: &Frame) -> Result<ReaderMessage, FrameError> {
    match frame.msg_type {
        MSG_CARD_DETECTED => {
            let mut cursor = 0;
            let card_id = read_string(&frame.payload, &mut cursor).ok_or(FrameError::BadPayload)?;
            let reader_id = read_u16(&frame.payload, &mut cursor).ok_or(FrameError::BadPayload)?;
            if card_id.trim().is_empty() {
                return Err(FrameError::BadPayload);
            }
            Ok(ReaderMessage::Card(CardDetected { card_id, reader_id }))
        }
        MSG_READER_FAULT => {
            let code = *frame.payload.first().ok_or(FrameError::BadPayload)?;
            Ok(ReaderMessage::Fault { code })
        }
        other => Err(FrameError::UnexpectedType(other)),
    }
}

/// 显示面板整帧文本（u8 行数 + 每行 u8 长度前缀字符串）。
pub fn panel_text_frame(frame: &TextFrame) -> Frame {
    let count = frame.lines.len().min(u8::MAX as usize);
    let mut out = vec![count as u8];
    for line in frame.lines.iter().take(count) {
        write_string(&mut out, line);
    }
    Frame::new(MSG_PANEL_TEXT, out)
}

/// 解码面板文本帧（面板固件与测试使用）。
pub fn decode_panel_text(frame: &Frame) -> Result<TextFrame, FrameError> {
    if frame.msg_type != MSG_PANEL_TEXT {
        return Err(FrameError::UnexpectedType(frame.msg_type));
    }
    let count = *frame.payload.first().ok_or(FrameError::BadPayload)? as usize;
    let mut cursor = 1;
    let mut lines = Vec::with_capacity(count);
    for _ in 0..count {
        lines.push(read_string(&frame.payload, &mut cursor).ok_or(FrameError::BadPayload)?);
    }
    Ok(TextFrame { lines })
}

/// 写入字符串（u8 长度前缀，按字符边界截断）。
fn write_string(out: &mut Vec<u8>, value: &str) {
    let mut end = value.len().min(u8::MAX as usize);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    out.push(end as u8);
    out.extend_from_slice(&value.as_bytes()[..end]);
}

/// 读取字符串（u8 长度前缀）。
fn read_string(data: &[u8], cursor: &mut usize) -> Option<String> {
    let len = *data.get(*cursor)? as usize;
    *cursor += 1;
    let bytes = data.get(*cursor..*cursor + len)?;
    *cursor += len;
    Some(String::from_utf8_lossy(bytes).to_string())
}

/// 读取 u16（小端）。
fn read_u16(data: &[u8], cursor: &mut usize) -> Option<u16> {
    let bytes = data.get(*cursor..*cursor + 2)?;
    *cursor += 2;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
