use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::error::HardwareError;
use crate::hal::{Clock, OutputLine};
use crate::model::{ActuatorState, Polarity};
use crate::settings::ActuatorSettings;

// 脉冲周期下限，避免 0 周期空转。
const MIN_PULSE: Duration = Duration::from_millis(1);

/// 继电器 + 蜂鸣器执行器；激活窗口互斥且有时限，返回前必定断电。
pub struct ActuatorController {
    relay: Box<dyn OutputLine>,
    buzzer: Box<dyn OutputLine>,
    polarities: ActuatorSettings,
    clock: Arc<dyn Clock>,
    state: ActuatorState,
}

impl ActuatorController {
    /// 创建执行器并立即将两路输出置为非激活电平。
    pub fn new(
        relay: Box<dyn OutputLine>,
        buzzer: Box<dyn OutputLine>,
        polarities: ActuatorSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HardwareError> {
        let mut actuator = Self {
            relay,
            buzzer,
            polarities,
            clock,
            state: ActuatorState::Idle,
        };
        actuator.de_energize()?;
        Ok(actuator)
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// 开门：继电器吸合 `hold`，期间蜂鸣器按 `pulse` 间隔鸣响。
    pub fn grant(&mut self, label: &str, hold: Duration, pulse: Duration) -> Result<(), HardwareError> {
        self.ensure_idle()?;
        let until = self.clock.now() + hold;
        self.state = ActuatorState::Granting { until };
        log::info!("Relay ON for {} ({} ms)", label, hold.as_millis());

        let mut window = ActivationWindow::open(self);
        let body = window.pulse_with_relay(until, pulse.max(MIN_PULSE));
        let cleanup = window.close();
        log::info!("Relay OFF");
        body.and(cleanup)
    }

    /// 拒绝：蜂鸣器持续 `alert`，继电器保持断开。
    pub fn deny(&mut self, alert: Duration) -> Result<(), HardwareError> {
        self.ensure_idle()?;
        let until = self.clock.now() + alert;
        self.state = ActuatorState::Denying { until };
        log::info!("Buzzer ON ({} ms)", alert.as_millis());

        let mut window = ActivationWindow::open(self);
        let body = window.hold_buzzer(until);
        let cleanup = window.close();
        log::info!("Buzzer OFF");
        body.and(cleanup)
    }

    /// 两路输出均置为非激活电平（幂等）。即使一路失败也会尝试另一路。
    pub fn de_energize(&mut self) -> Result<(), HardwareError> {
        let relay = drive(self.relay.as_mut(), self.polarities.relay, false);
        let buzzer = drive(self.buzzer.as_mut(), self.polarities.buzzer, false);
        self.state = ActuatorState::Idle;
        relay.and(buzzer)
    }

    fn ensure_idle(&mut self) -> Result<(), HardwareError> {
        if self.state.is_idle() {
            return Ok(());
        }
        log::warn!("Actuator not idle ({:?}), forcing de-energize", self.state);
        self.de_energize()
    }

    fn set_relay(&mut self, active: bool) -> Result<(), HardwareError> {
        drive(self.relay.as_mut(), self.polarities.relay, active)
    }

    fn set_buzzer(&mut self, active: bool) -> Result<(), HardwareError> {
        drive(self.buzzer.as_mut(), self.polarities.buzzer, active)
    }

    /// 休眠到 `until` 或至多 `step`；到期返回 false。
    fn wait_step(&self, until: Duration, step: Duration) -> bool {
        let now = self.clock.now();
        if now >= until {
            return false;
        }
        self.clock.sleep((until - now).min(step));
        true
    }
}

impl Drop for ActuatorController {
    fn drop(&mut self) {
        if let Err(err) = self.de_energize() {
            log::error!("Actuator de-energize on teardown failed: {}", err);
        }
    }
}

fn drive(line: &mut dyn OutputLine, polarity: Polarity, active: bool) -> Result<(), HardwareError> {
    let high = match polarity {
        Polarity::ActiveHigh => active,
        Polarity::ActiveLow => !active,
    };
    if high {
        line.set_high()
    } else {
        line.set_low()
    }
}

/// 激活窗口：离开作用域（含提前返回与 panic）时一定断电。
struct ActivationWindow<'a> {
    actuator: &'a mut ActuatorController,
    closed: bool,
}

impl<'a> ActivationWindow<'a> {
    fn open(actuator: &'a mut ActuatorController) -> Self {
        Self {
            actuator,
            closed: false,
        }
    }

    fn pulse_with_relay(&mut self, until: Duration, pulse: Duration) -> Result<(), HardwareError> {
        self.set_relay(true)?;
        loop {
            self.set_buzzer(true)?;
            if !self.wait_step(until, pulse) {
                break;
            }
            self.set_buzzer(false)?;
            if !self.wait_step(until, pulse) {
                break;
            }
        }
        Ok(())
    }

    fn hold_buzzer(&mut self, until: Duration) -> Result<(), HardwareError> {
        self.set_buzzer(true)?;
        while self.wait_step(until, Duration::MAX) {}
        Ok(())
    }

    fn close(mut self) -> Result<(), HardwareError> {
        self.closed = true;
        self.actuator.de_energize()
    }
}

impl Deref for ActivationWindow<'_> {
    type Target = ActuatorController;

    fn deref(&self) -> &Self::Target {
        self.actuator
    }
}

impl DerefMut for ActivationWindow<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.actuator
    }
}

impl Drop for ActivationWindow<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.actuator.de_energize() {
            log::error!("Actuator cleanup failed: {}", err);
        }
    }
}
