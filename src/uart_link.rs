use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use esp_idf_hal::delay;
use esp_idf_hal::uart::{UartRxDriver, UartTxDriver};

use tapgate::display::TextFrame;
use tapgate::hal::Clock;
use tapgate::reader::ReaderEvent;
use tapgate::serial_io::{panel_bytes, push_bytes_to_channel, ReaderCodec};

const RX_CHUNK: usize = 128;

/// 串口收发线程句柄。
pub struct UartTasks {
    pub reader: JoinHandle<()>,
    pub panel: JoinHandle<()>,
}

/// 启动串口收发线程：RX 解析读卡帧进入读卡通道，TX 把面板整帧文本写出。
pub fn spawn_uart_tasks(
    rx: UartRxDriver<'static>,
    tx: UartTxDriver<'static>,
    clock: Arc<dyn Clock>,
    event_tx: Sender<ReaderEvent>,
    panel_rx: Receiver<TextFrame>,
) -> UartTasks {
    UartTasks {
        reader: thread::spawn(move || reader_rx_loop(rx, clock, event_tx)),
        panel: thread::spawn(move || panel_tx_loop(tx, panel_rx)),
    }
}

/// 读卡线程：控制器侧接收端全部释放后退出。
fn reader_rx_loop(rx: UartRxDriver<'static>, clock: Arc<dyn Clock>, event_tx: Sender<ReaderEvent>) {
    let mut codec = ReaderCodec::new();
    let mut chunk = [0u8; RX_CHUNK];
    loop {
        let count = match rx.read(&mut chunk, delay::BLOCK) {
            Ok(count) => count,
            Err(err) => {
                log::warn!("Reader UART read failed: {:?}", err);
                continue;
            }
        };
        if count == 0 {
            continue;
        }
        let bytes = &chunk[..count];
        log::debug!("reader <- {}", hex(bytes));
        if !push_bytes_to_channel(&mut codec, bytes, clock.as_ref(), &event_tx) {
            log::info!("Card channel closed, reader UART task exiting");
            return;
        }
    }
}

/// 面板线程：一次写一整帧，写完再取下一帧。
fn panel_tx_loop(mut tx: UartTxDriver<'static>, panel_rx: Receiver<TextFrame>) {
    for frame in panel_rx.iter() {
        let bytes = panel_bytes(&frame);
        log::debug!("panel -> {}", hex(&bytes));
        if let Err(err) = tx.write(&bytes) {
            log::warn!("Panel UART write failed: {:?}", err);
            continue;
        }
        if let Err(err) = tx.wait_done(delay::BLOCK) {
            log::warn!("Panel UART flush failed: {:?}", err);
        }
    }
    log::info!("Panel channel closed, panel UART task exiting");
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
