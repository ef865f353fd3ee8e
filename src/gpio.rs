use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;

use tapgate::error::HardwareError;
use tapgate::hal::OutputLine;

/// 推挽输出引脚（继电器 / 蜂鸣器）。
pub struct GpioLine {
    name: &'static str,
    driver: PinDriver<'static, AnyOutputPin, Output>,
}

impl GpioLine {
    /// 重新占用引脚。调用前上一轮的驱动必须已释放。
    pub fn claim(name: &'static str, pin: &mut AnyOutputPin) -> Result<Self, HardwareError> {
        // 上一轮控制器已 drop，同一时刻只有一个驱动持有该引脚
        let pin = unsafe { pin.clone_unchecked() };
        let driver = PinDriver::output(pin).map_err(|err| HardwareError::Output {
            line: name,
            reason: err.to_string(),
        })?;
        Ok(Self { name, driver })
    }

    fn fail(&self, err: esp_idf_hal::sys::EspError) -> HardwareError {
        HardwareError::Output {
            line: self.name,
            reason: err.to_string(),
        }
    }
}

impl OutputLine for GpioLine {
    fn set_high(&mut self) -> Result<(), HardwareError> {
        self.driver.set_high().map_err(|err| self.fail(err))
    }

    fn set_low(&mut self) -> Result<(), HardwareError> {
        self.driver.set_low().map_err(|err| self.fail(err))
    }
}
