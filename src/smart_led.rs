use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::rmt::{config::TransmitConfig, FixedLengthSignal, PinState, Pulse, TxRmtDriver};
use esp_idf_hal::sys::EspError;
use esp_idf_hal::{peripheral::Peripheral, rmt::RmtChannel};
use smart_leds::{SmartLedsWrite, RGB8};

use tapgate::error::HardwareError;
use tapgate::hal::StatusLamp;
use tapgate::status_led::{apply_brightness, grb_bits, BRIGHTNESS_SCALE};

// WS2812 位时序（高电平, 低电平），单位 ns。
const BIT_ZERO_NS: (u64, u64) = (350, 800);
const BIT_ONE_NS: (u64, u64) = (700, 600);
const BITS_PER_LED: usize = 24;

type BitPulses = (Pulse, Pulse);

/// 单颗 WS2812 状态灯（RMT 发送），位时序在初始化时按计数时钟换算一次。
pub struct StatusLed<'d> {
    tx: TxRmtDriver<'d>,
    zero: BitPulses,
    one: BitPulses,
}

impl<'d> StatusLed<'d> {
    pub fn new<C, P, Ch, Pin>(channel: C, pin: P) -> Result<Self, EspError>
    where
        C: Peripheral<P = Ch> + 'd,
        P: Peripheral<P = Pin> + 'd,
        Ch: RmtChannel,
        Pin: OutputPin,
    {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config)?;
        let ticks_hz = tx.counter_clock()?;
        let pulses = |(high_ns, low_ns): (u64, u64)| -> Result<BitPulses, EspError> {
            Ok((
                Pulse::new_with_duration(ticks_hz, PinState::High, &Duration::from_nanos(high_ns))?,
                Pulse::new_with_duration(ticks_hz, PinState::Low, &Duration::from_nanos(low_ns))?,
            ))
        };
        let zero = pulses(BIT_ZERO_NS)?;
        let one = pulses(BIT_ONE_NS)?;
        Ok(Self { tx, zero, one })
    }

    /// 高位先发。
    fn encode(&self, color: RGB8) -> Result<FixedLengthSignal<BITS_PER_LED>, EspError> {
        let word = grb_bits(apply_brightness(color, BRIGHTNESS_SCALE));
        let mut signal = FixedLengthSignal::<BITS_PER_LED>::new();
        for slot in 0..BITS_PER_LED {
            let mask = 1u32 << (BITS_PER_LED - 1 - slot);
            let pulses = if word & mask != 0 { &self.one } else { &self.zero };
            signal.set(slot, pulses)?;
        }
        Ok(signal)
    }
}

impl SmartLedsWrite for StatusLed<'_> {
    type Color = RGB8;
    type Error = EspError;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        // 只有一颗灯：取第一个颜色，缺省熄灭
        let color = iterator
            .into_iter()
            .next()
            .map(Into::into)
            .unwrap_or_default();
        let signal = self.encode(color)?;
        self.tx.start_blocking(&signal)
    }
}

/// 状态灯句柄：颜色经通道交给灯任务线程，控制器重启时可重复克隆。
#[derive(Clone)]
pub struct LampLink {
    color_tx: Sender<RGB8>,
}

impl StatusLamp for LampLink {
    fn set_color(&mut self, color: RGB8) -> Result<(), HardwareError> {
        self.color_tx
            .send(color)
            .map_err(|_| HardwareError::Lamp("lamp task stopped".to_string()))
    }
}

fn run_lamp(mut led: StatusLed<'_>, colors: Receiver<RGB8>) {
    let mut shown: Option<RGB8> = None;
    for color in std::iter::once(RGB8::default()).chain(colors.iter()) {
        if shown == Some(color) {
            continue;
        }
        match led.write([color]) {
            Ok(()) => shown = Some(color),
            Err(err) => log::warn!("Status LED update failed: {:?}", err),
        }
    }
    log::info!("Status lamp channel closed");
}

/// 启动灯任务（持有 RMT 驱动），返回可克隆的句柄。初始化失败时句柄照常返回，写入报错。
pub fn spawn_lamp_task<C, P, Ch, Pin>(channel: C, pin: P) -> LampLink
where
    C: Peripheral<P = Ch> + Send + 'static,
    P: Peripheral<P = Pin> + Send + 'static,
    Ch: RmtChannel + Send + 'static,
    Pin: OutputPin + Send + 'static,
{
    let (color_tx, color_rx) = mpsc::channel::<RGB8>();
    thread::spawn(move || match StatusLed::new(channel, pin) {
        Ok(led) => run_lamp(led, color_rx),
        Err(err) => log::warn!("Status LED init failed: {:?}", err),
    });
    LampLink { color_tx }
}
