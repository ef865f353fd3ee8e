//! 硬件能力接口：控制器只通过这些 trait 访问外设，便于测试时替换为模拟硬件。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use smart_leds::RGB8;

use crate::display::TextFrame;
use crate::error::{DirectoryError, HardwareError, LinkError, ProbeError, ReaderError};
use crate::model::{AuthorizationRecord, CardIdentifier, CardRead};

/// 单个数字输出引脚（写入幂等）。
pub trait OutputLine: Send {
    fn set_high(&mut self) -> Result<(), HardwareError>;
    fn set_low(&mut self) -> Result<(), HardwareError>;
}

/// 读卡器：阻塞直到有卡或链路关闭。
pub trait CardReader: Send {
    fn read_card(&mut self) -> Result<CardRead, ReaderError>;
}

/// 显示面：整帧重绘。
pub trait DisplaySurface: Send {
    fn draw(&mut self, frame: &TextFrame) -> Result<(), HardwareError>;
}

/// 状态灯（单颗 RGB）。
pub trait StatusLamp: Send {
    fn set_color(&mut self, color: RGB8) -> Result<(), HardwareError>;
}

/// 可达性探测（有超时，探测后立即释放连接）。
pub trait Probe: Send {
    fn probe(&mut self, timeout: Duration) -> Result<(), ProbeError>;
}

/// 平台网络重连机制。
pub trait NetworkLink: Send {
    fn reconnect(&mut self) -> Result<(), LinkError>;
}

/// 授权目录后端；每次查询独立建立连接。
pub trait DirectoryBackend: Send {
    fn find_principal(
        &mut self,
        id: &CardIdentifier,
    ) -> Result<Option<AuthorizationRecord>, DirectoryError>;
}

/// 单调时钟 + 延时。
pub trait Clock: Send + Sync {
    /// 自时钟起点以来的时间。
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// 基于 `Instant` 与线程休眠的系统时钟。
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 关机信号（可跨线程克隆）。
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// 长等待切片，保证关机请求能及时打断。
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// 分片休眠；若期间收到关机信号返回 false。
pub fn sleep_unless_shutdown(clock: &dyn Clock, total: Duration, shutdown: &ShutdownSignal) -> bool {
    let deadline = clock.now() + total;
    loop {
        if shutdown.is_triggered() {
            return false;
        }
        let now = clock.now();
        if now >= deadline {
            return true;
        }
        clock.sleep((deadline - now).min(SLEEP_SLICE));
    }
}
