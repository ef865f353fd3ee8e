use std::sync::mpsc::Sender;

use crate::display::TextFrame;
use crate::error::{HardwareError, ReaderError};
use crate::hal::{Clock, DisplaySurface};
use crate::model::{CardIdentifier, CardRead};
use crate::proto::{
    decode_frame, encode_frame, Frame, FrameError, FRAME_HEADER, FRAME_OVERHEAD, FRAME_VERSION,
};
use crate::reader::ReaderEvent;
use crate::serial::{panel_text_frame, reader_message_from_frame, ReaderMessage};

// 帧长度上限，防止噪声长度字段占住缓冲。
const MAX_FRAME_LEN: usize = 512;

/// 帧读取器：逐字节组装完整帧。
pub struct FrameReader {
    buffer: Vec<u8>,
    expected_len: Option<usize>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            expected_len: None,
        }
    }

    /// 推入一个字节，若解析完成则返回帧或错误。
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        self.buffer.push(byte);
        match self.buffer.len() {
            1 | 2 if byte != FRAME_HEADER[self.buffer.len() - 1] => {
                // 失步：丢弃并重新寻找帧头；当前字节可能就是新帧头的首字节
                self.reset();
                if byte == FRAME_HEADER[0] {
                    self.buffer.push(byte);
                }
                return None;
            }
            3 if byte != FRAME_VERSION => {
                self.reset();
                return Some(Err(FrameError::BadVersion));
            }
            5 => {
                let len = u16::from_le_bytes([self.buffer[3], self.buffer[4]]) as usize;
                let total = FRAME_OVERHEAD + len;
                if len < 2 || total > MAX_FRAME_LEN {
                    self.reset();
                    return Some(Err(FrameError::BadLength));
                }
                self.expected_len = Some(total);
            }
            _ => {}
        }

        if self.expected_len == Some(self.buffer.len()) {
            let frame = decode_frame(&self.buffer);
            self.reset();
            return Some(frame);
        }
        None
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = None;
    }
}

/// 读卡器字节流解码：帧 -> 读卡事件。
pub struct ReaderCodec {
    reader: FrameReader,
}

impl Default for ReaderCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderCodec {
    pub fn new() -> Self {
        Self {
            reader: FrameReader::new(),
        }
    }

    /// 推入一个字节；完整帧转换为读卡事件并打上时间戳。
    pub fn push_byte(&mut self, byte: u8, clock: &dyn Clock) -> Option<ReaderEvent> {
        let frame = match self.reader.push(byte)? {
            Ok(frame) => frame,
            Err(err) => return Some(ReaderEvent::Fault(ReaderError::Frame(err))),
        };
        let event = match reader_message_from_frame(&frame) {
            Ok(ReaderMessage::Card(card)) => ReaderEvent::Card(CardRead {
                id: CardIdentifier::new(card.card_id),
                seen_at: clock.now(),
            }),
            Ok(ReaderMessage::Fault { code }) => {
                ReaderEvent::Fault(ReaderError::Fault(format!("reader reported fault 0x{:02X}", code)))
            }
            Err(err) => ReaderEvent::Fault(ReaderError::Frame(err)),
        };
        Some(event)
    }
}

/// 逐字节喂给解码器，解析出的事件发送到通道；通道关闭时返回 false。
pub fn push_bytes_to_channel(
    codec: &mut ReaderCodec,
    bytes: &[u8],
    clock: &dyn Clock,
    event_tx: &Sender<ReaderEvent>,
) -> bool {
    for &byte in bytes {
        if let Some(event) = codec.push_byte(byte, clock) {
            if event_tx.send(event).is_err() {
                return false;
            }
        }
    }
    true
}

/// 串口面板：整帧文本交给串口发送线程。
pub struct PanelLink {
    frame_tx: Sender<TextFrame>,
}

impl PanelLink {
    pub fn new(frame_tx: Sender<TextFrame>) -> Self {
        Self { frame_tx }
    }
}

impl DisplaySurface for PanelLink {
    fn draw(&mut self, frame: &TextFrame) -> Result<(), HardwareError> {
        self.frame_tx
            .send(frame.clone())
            .map_err(|_| HardwareError::Display("panel link closed".to_string()))
    }
}

/// 面板文本帧的线路字节。
pub fn panel_bytes(frame: &TextFrame) -> Vec<u8> {
    encode_frame(&panel_text_frame(frame))
}
