//! 主机台架：标准输入模拟读卡，日志模拟显示屏、状态灯与继电器/蜂鸣器引脚。

use std::io::{self, BufRead, Read as _};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smart_leds::RGB8;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tapgate::directory::{HttpReply, HttpTransport};
use tapgate::display::TextFrame;
use tapgate::error::{DirectoryError, HardwareError};
use tapgate::hal::{Clock, DisplaySurface, OutputLine, StatusLamp};
use tapgate::model::{CardIdentifier, CardRead};
use tapgate::reader::{ChannelCardReader, ReaderEvent};

/// 安装日志订阅者（`RUST_LOG`，默认 info），`log` 记录一并输出。
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 标准输入读卡线程：每行一个卡号，`#` 开头为注释，EOF 关闭读卡链路。
pub fn spawn_stdin_reader(clock: Arc<dyn Clock>) -> ChannelCardReader {
    let (event_tx, reader) = ChannelCardReader::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("stdin read failed: {}", err);
                    break;
                }
            };
            let card_id = line.trim();
            if card_id.is_empty() || card_id.starts_with('#') {
                continue;
            }
            let event = ReaderEvent::Card(CardRead {
                id: CardIdentifier::from(card_id),
                seen_at: clock.now(),
            });
            if event_tx.send(event).is_err() {
                break;
            }
        }
        log::info!("stdin closed, card reader stopped");
    });
    reader
}

/// 以日志输出代替显示屏。
pub struct LogDisplay;

impl DisplaySurface for LogDisplay {
    fn draw(&mut self, frame: &TextFrame) -> Result<(), HardwareError> {
        log::info!("[display] {}", frame.lines.join(" | "));
        Ok(())
    }
}

pub struct LogLamp;

impl StatusLamp for LogLamp {
    fn set_color(&mut self, color: RGB8) -> Result<(), HardwareError> {
        log::info!("[lamp] #{:02X}{:02X}{:02X}", color.r, color.g, color.b);
        Ok(())
    }
}

/// 记录电平变化的虚拟引脚。
pub struct LogLine {
    name: &'static str,
    level: Option<bool>,
}

impl LogLine {
    pub fn new(name: &'static str) -> Self {
        Self { name, level: None }
    }

    fn set(&mut self, high: bool) -> Result<(), HardwareError> {
        if self.level != Some(high) {
            log::debug!("[gpio] {} -> {}", self.name, if high { "HIGH" } else { "LOW" });
            self.level = Some(high);
        }
        Ok(())
    }
}

impl OutputLine for LogLine {
    fn set_high(&mut self) -> Result<(), HardwareError> {
        self.set(true)
    }

    fn set_low(&mut self) -> Result<(), HardwareError> {
        self.set(false)
    }
}

/// 基于 `ureq` 的传输；每次请求新建 agent，不复用连接。
pub struct UreqTransport {
    timeout: Duration,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HttpTransport for UreqTransport {
    fn post_json(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpReply, DirectoryError> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let mut request = agent.post(url);
        for (name, value) in headers {
            // ureq 自行计算长度
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            request = request.set(name, value);
        }
        let response = match request.send_bytes(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(DirectoryError::Transport(err.to_string())),
        };
        let status = response.status();
        let mut reply = Vec::new();
        response.into_reader().read_to_end(&mut reply)?;
        Ok(HttpReply {
            status,
            body: reply,
        })
    }
}
