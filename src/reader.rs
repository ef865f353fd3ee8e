use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::error::ReaderError;
use crate::hal::CardReader;
use crate::model::CardRead;

/// 读卡线程推送的事件。
#[derive(Debug)]
pub enum ReaderEvent {
    Card(CardRead),
    Fault(ReaderError),
}

/// 基于通道的读卡器：物理读卡在独立线程阻塞，控制器在此等待。
/// 控制器忙于重连时到达的卡片保留在通道中，不会丢失。
pub struct ChannelCardReader {
    event_rx: Receiver<ReaderEvent>,
}

impl ChannelCardReader {
    /// 创建读卡器及其发送端（交给读卡线程）。
    pub fn channel() -> (Sender<ReaderEvent>, Self) {
        let (event_tx, event_rx) = mpsc::channel();
        (event_tx, Self { event_rx })
    }
}

impl CardReader for ChannelCardReader {
    fn read_card(&mut self) -> Result<CardRead, ReaderError> {
        match self.event_rx.recv() {
            Ok(ReaderEvent::Card(read)) => Ok(read),
            Ok(ReaderEvent::Fault(err)) => Err(err),
            // 所有发送端已退出：读卡链路关闭
            Err(_) => Err(ReaderError::Closed),
        }
    }
}

/// 跨重启共享的读卡句柄：读卡线程与通道不随控制器重建。
#[derive(Clone)]
pub struct SharedCardReader {
    inner: Arc<Mutex<ChannelCardReader>>,
}

impl SharedCardReader {
    pub fn new(reader: ChannelCardReader) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }
}

impl CardReader for SharedCardReader {
    fn read_card(&mut self) -> Result<CardRead, ReaderError> {
        let mut reader = self.inner.lock().map_err(|_| ReaderError::Closed)?;
        reader.read_card()
    }
}
