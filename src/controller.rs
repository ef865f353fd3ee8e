//! 门禁状态机：`Idle -> AwaitingCard -> Authenticating -> {Granting | Denying} -> Idle`。
//!
//! 每次 [`AccessController::run_cycle`] 处理且只处理一张卡。无论结果如何，返回前
//! 执行器一定回到断电的 Idle 状态；循环内的故障在边界被吸收，不会带入下一张卡。

use std::sync::Arc;
use std::time::Duration;

use crate::actuator::ActuatorController;
use crate::connectivity::{ConnectivityMonitor, ConnectivityPolicy, Readiness};
use crate::directory::{DirectoryClient, LookupResult};
use crate::display::{messages, FeedbackPresenter};
use crate::error::{ControllerError, ReaderError};
use crate::hal::{
    CardReader, Clock, DirectoryBackend, DisplaySurface, NetworkLink, Probe, ShutdownSignal,
    StatusLamp,
};
use crate::model::{CardIdentifier, CardRead, ControllerPhase, CycleOutcome, StatusIndicator};
use crate::settings::{ControllerSettings, TimingSettings};

/// 平台外设集合（由 ESP32 启动代码或主机台架构造）。
pub struct Devices {
    /// 已断电的执行器。
    pub actuator: ActuatorController,
    pub surface: Box<dyn DisplaySurface>,
    pub lamp: Option<Box<dyn StatusLamp>>,
    pub network_probe: Box<dyn Probe>,
    pub directory_probe: Box<dyn Probe>,
    pub link: Box<dyn NetworkLink>,
    pub directory: Box<dyn DirectoryBackend>,
    pub reader: Box<dyn CardReader>,
}

/// 控制器依赖的全部部件（启动时构造一次）。
pub struct ControllerParts {
    pub actuator: ActuatorController,
    pub presenter: FeedbackPresenter,
    pub monitor: ConnectivityMonitor,
    pub directory: DirectoryClient,
    pub reader: Box<dyn CardReader>,
    pub clock: Arc<dyn Clock>,
    pub timing: TimingSettings,
}

impl ControllerParts {
    /// 按配置把外设组装为控制器部件。
    pub fn assemble(
        settings: &ControllerSettings,
        devices: Devices,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let mut presenter = FeedbackPresenter::new(devices.surface, settings.display);
        if let Some(lamp) = devices.lamp {
            presenter = presenter.with_lamp(lamp);
        }
        let monitor = ConnectivityMonitor::new(
            devices.network_probe,
            devices.directory_probe,
            devices.link,
            clock.clone(),
            shutdown,
            ConnectivityPolicy::from_settings(settings),
        );
        Self {
            actuator: devices.actuator,
            presenter,
            monitor,
            directory: DirectoryClient::new(devices.directory),
            reader: devices.reader,
            clock,
            timing: settings.timing.clone(),
        }
    }
}

/// 上一次完成动作的卡片（重复读屏蔽用）。
struct LastActuation {
    id: CardIdentifier,
    finished_at: Duration,
}

pub struct AccessController {
    actuator: ActuatorController,
    presenter: FeedbackPresenter,
    monitor: ConnectivityMonitor,
    directory: DirectoryClient,
    reader: Box<dyn CardReader>,
    clock: Arc<dyn Clock>,
    timing: TimingSettings,
    phase: ControllerPhase,
    last_actuation: Option<LastActuation>,
}

impl AccessController {
    pub fn new(parts: ControllerParts) -> Self {
        Self {
            actuator: parts.actuator,
            presenter: parts.presenter,
            monitor: parts.monitor,
            directory: parts.directory,
            reader: parts.reader,
            clock: parts.clock,
            timing: parts.timing,
            phase: ControllerPhase::Idle,
            last_actuation: None,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn actuator(&self) -> &ActuatorController {
        &self.actuator
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// 执行一次完整循环；返回前执行器必定断电并回到 Idle。
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
        self.enter(ControllerPhase::Idle);
        let result = self.cycle();
        let cleanup = self.actuator.de_energize();
        self.enter(ControllerPhase::Idle);
        match (result, cleanup) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                log::error!("Actuator cleanup failed after cycle error: {}", cleanup_err);
                Err(err)
            }
        }
    }

    /// 故障后的恢复提示与退避。
    pub fn recover_from_fault(&mut self) {
        self.presenter.show_message(messages::SYSTEM_FAULT);
        self.presenter.signal(StatusIndicator::Fault);
        self.clock.sleep(self.timing.fault_backoff());
    }

    /// 退出前的本地拆除：断电并显示最终提示。
    pub fn teardown(&mut self, message: (&str, &str), indicator: StatusIndicator) {
        if let Err(err) = self.actuator.de_energize() {
            log::error!("Actuator de-energize during teardown failed: {}", err);
        }
        self.enter(ControllerPhase::Idle);
        self.presenter.show_message(message);
        self.presenter.signal(indicator);
    }

    fn cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
        if self.monitor.ensure_online(&mut self.presenter)? == Readiness::DirectoryGaveUp {
            self.presenter.show_message(messages::SERVER_ERROR);
            return Ok(CycleOutcome::ConnectivityFailed);
        }

        self.enter(ControllerPhase::AwaitingCard);
        self.presenter.show_message(messages::READY);
        self.presenter.signal(StatusIndicator::Ready);
        let read = match self.await_card() {
            Ok(read) => read,
            Err(ReaderError::Frame(err)) => {
                log::warn!("Card read failed: {}", err);
                self.presenter.show_message(messages::READ_ERROR);
                self.presenter.signal(StatusIndicator::Fault);
                return Ok(CycleOutcome::ReadFailed);
            }
            Err(err) => return Err(err.into()),
        };
        log::info!("Card read: {}", read.id);

        self.enter(ControllerPhase::Authenticating);
        // 等卡期间目录可能已断开：查询前再次探测
        if !self.monitor.is_directory_reachable() {
            log::warn!("Dropping read of card {}: directory unreachable", read.id);
            self.presenter.show_message(messages::SERVER_ERROR);
            self.presenter.signal(StatusIndicator::Offline);
            return Ok(CycleOutcome::ConnectivityFailed);
        }

        let outcome = match self.directory.lookup(&read.id) {
            LookupResult::Authorized(record) => {
                let label = record.label().to_string();
                self.enter(ControllerPhase::Granting);
                self.presenter.show(&messages::welcome(&label), "");
                self.presenter.signal(StatusIndicator::Granted);
                self.actuator
                    .grant(&label, self.timing.hold(), self.timing.pulse())?;
                CycleOutcome::Granted(label)
            }
            LookupResult::NotFound => {
                self.enter(ControllerPhase::Denying);
                self.presenter.show_message(messages::DENIED);
                self.presenter.signal(StatusIndicator::Denied);
                log::info!("Access denied for card {}", read.id);
                self.actuator.deny(self.timing.alert())?;
                CycleOutcome::Denied
            }
            LookupResult::TransientError(_) => {
                // 目录不可用绝不等同于未授权
                self.presenter.show_message(messages::SERVER_ERROR);
                self.presenter.signal(StatusIndicator::Offline);
                return Ok(CycleOutcome::LookupFailed);
            }
        };

        self.last_actuation = Some(LastActuation {
            id: read.id,
            finished_at: self.clock.now(),
        });
        Ok(outcome)
    }

    /// 阻塞读卡，跳过过期读卡以及动作期间或刚结束时同一张卡的重复读取。
    fn await_card(&mut self) -> Result<CardRead, ReaderError> {
        loop {
            let read = self.reader.read_card()?;
            let age = self.clock.now().saturating_sub(read.seen_at);
            if age > self.timing.max_read_age() {
                log::warn!(
                    "Discarding stale read of card {} ({} s old)",
                    read.id,
                    age.as_secs()
                );
                continue;
            }
            if self.is_repeat(&read) {
                log::debug!("Ignoring repeated read of card {}", read.id);
                continue;
            }
            return Ok(read);
        }
    }

    fn is_repeat(&self, read: &CardRead) -> bool {
        let Some(last) = self.last_actuation.as_ref() else {
            return false;
        };
        last.id == read.id && read.seen_at <= last.finished_at + self.timing.repeat_guard()
    }

    fn enter(&mut self, phase: ControllerPhase) {
        if self.phase != phase {
            log::debug!("Controller {} -> {}", self.phase.as_str(), phase.as_str());
            self.phase = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CycleFault, FatalError, HardwareError};
    use crate::model::Polarity;
    use crate::proto::FrameError;
    use crate::testing::{Rig, BUZZER, RELAY};

    #[test]
    fn authorized_card_opens_the_door_for_hold_duration() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.reader.card("12345", Duration::ZERO);
        let mut controller = rig.controller();

        let outcome = controller.run_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Granted("Alice".to_string()));
        assert_eq!(rig.display.last().unwrap().lines, vec!["Welcome, Alice"]);
        assert_eq!(
            rig.pins.active_spans(RELAY, Polarity::ActiveLow),
            vec![(Duration::ZERO, Duration::from_secs(5))]
        );
        assert_eq!(rig.pins.level(RELAY), Some(true));
        assert_eq!(rig.pins.level(BUZZER), Some(false));
        assert!(controller.actuator().state().is_idle());
        assert_eq!(controller.phase(), ControllerPhase::Idle);
    }

    #[test]
    fn unknown_card_sounds_alert_and_keeps_relay_closed() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.reader.card("99999", Duration::ZERO);
        let mut controller = rig.controller();

        assert_eq!(controller.run_cycle().unwrap(), CycleOutcome::Denied);
        assert_eq!(
            rig.display.last().unwrap().lines,
            vec!["Access Denied", "Unauthorized Card"]
        );
        assert!(rig.pins.active_spans(RELAY, Polarity::ActiveLow).is_empty());
        assert_eq!(
            rig.pins.active_spans(BUZZER, Polarity::ActiveHigh),
            vec![(Duration::ZERO, Duration::from_secs(2))]
        );
    }

    #[test]
    fn transient_lookup_error_is_never_a_denial() {
        let rig = Rig::new();
        rig.directory.insert("99999", "Ghost");
        rig.directory.fail_next(1);
        rig.reader.card("99999", Duration::ZERO);
        let mut controller = rig.controller();

        assert_eq!(controller.run_cycle().unwrap(), CycleOutcome::LookupFailed);
        assert_eq!(rig.display.last().unwrap().lines, vec!["Server Error", "Retrying..."]);
        // 执行器未动作
        assert!(rig.pins.active_spans(RELAY, Polarity::ActiveLow).is_empty());
        assert!(rig.pins.active_spans(BUZZER, Polarity::ActiveHigh).is_empty());
        assert_eq!(rig.clock.now(), Duration::ZERO);
    }

    #[test]
    fn directory_lost_during_card_wait_drops_read_without_lookup() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        // 前置检查通过，查询前探测失败
        rig.directory_probe.push(&[true, false]);
        rig.reader.card("12345", Duration::ZERO);
        let mut controller = rig.controller();

        assert_eq!(controller.run_cycle().unwrap(), CycleOutcome::ConnectivityFailed);
        assert_eq!(rig.directory.calls(), 0);
        assert_eq!(rig.display.last().unwrap().lines, vec!["Server Error", "Retrying..."]);
        assert!(rig.pins.active_spans(RELAY, Polarity::ActiveLow).is_empty());
    }

    #[test]
    fn directory_outage_waits_then_serves_queued_card() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.directory_probe.push(&[false, false, false, true]);
        rig.reader.card("12345", Duration::ZERO);
        let mut controller = rig.controller();

        let outcome = controller.run_cycle().unwrap();
        assert_eq!(outcome, CycleOutcome::Granted("Alice".to_string()));
        // 三次重试间隔后开门
        assert_eq!(
            rig.pins.active_spans(RELAY, Polarity::ActiveLow),
            vec![(Duration::from_secs(15), Duration::from_secs(20))]
        );
        let shown: Vec<String> = rig.display.frames().iter().map(|f| f.text()).collect();
        assert_eq!(shown[0], "Server Not Connected Reconnecting...");
        assert!(shown.contains(&"System Ready Waiting for Card".to_string()));
    }

    #[test]
    fn read_queued_before_long_outage_never_opens_the_door() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.directory.insert("777", "Bob");
        // 约一小时的目录中断期间排队的旧读卡
        rig.directory_probe.push(&[false; 721]);
        rig.reader.card("12345", Duration::ZERO);
        rig.reader.card("777", Duration::from_secs(3600));
        let mut controller = rig.controller();

        assert_eq!(
            controller.run_cycle().unwrap(),
            CycleOutcome::Granted("Bob".to_string())
        );
        assert_eq!(
            rig.pins.active_spans(RELAY, Polarity::ActiveLow),
            vec![(Duration::from_secs(3605), Duration::from_secs(3610))]
        );
        assert_eq!(rig.directory.calls(), 1);
        assert_eq!(rig.reader.remaining(), 0);
    }

    #[test]
    fn stale_read_alone_leaves_the_relay_untouched() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.reader.card("12345", Duration::ZERO);
        rig.clock.advance(Duration::from_secs(31));
        let mut controller = rig.controller();

        // 过期读卡被丢弃后读卡链路关闭
        assert!(matches!(controller.run_cycle(), Err(ControllerError::Shutdown)));
        assert!(rig.pins.active_spans(RELAY, Polarity::ActiveLow).is_empty());
        assert_eq!(rig.directory.calls(), 0);
    }

    #[test]
    fn network_loss_is_fatal_and_leaves_outputs_de_energized() {
        let rig = Rig::new();
        rig.network_probe.push(&[false, false]);
        rig.link.set_succeed(false);
        rig.reader.card("12345", Duration::ZERO);
        let mut controller = rig.controller();

        let err = controller.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Fatal(FatalError::NetworkUnreachable { .. })
        ));
        assert_eq!(rig.pins.level(RELAY), Some(true));
        assert_eq!(rig.pins.level(BUZZER), Some(false));
        // 卡片未被消费
        assert_eq!(rig.reader.remaining(), 1);
    }

    #[test]
    fn corrupt_frame_is_a_read_failure() {
        let rig = Rig::new();
        rig.reader.frame_error(FrameError::BadChecksum);
        let mut controller = rig.controller();
        assert_eq!(controller.run_cycle().unwrap(), CycleOutcome::ReadFailed);
        assert_eq!(rig.display.last().unwrap().lines, vec!["Read Error", "Try Again"]);
    }

    #[test]
    fn reader_driver_fault_surfaces_as_cycle_fault() {
        let rig = Rig::new();
        rig.reader.fault("spi timeout");
        let mut controller = rig.controller();
        let err = controller.run_cycle().unwrap_err();
        assert!(matches!(err, ControllerError::Fault(CycleFault::Reader(_))));
        assert_eq!(controller.phase(), ControllerPhase::Idle);
    }

    #[test]
    fn closed_reader_means_shutdown() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        assert!(matches!(controller.run_cycle(), Err(ControllerError::Shutdown)));
    }

    #[test]
    fn relay_fault_mid_grant_is_contained_and_de_energized() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.reader.card("12345", Duration::ZERO);
        let mut controller = rig.controller();
        // 继电器仅允许一次写入（吸合），之后写入失败
        rig.relay_fault.fail_after(1);

        let err = controller.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Fault(CycleFault::Actuator(HardwareError::Output { line: RELAY, .. }))
        ));
        assert!(controller.actuator().state().is_idle());
        assert_eq!(rig.pins.level(BUZZER), Some(false));
    }

    #[test]
    fn card_resting_on_reader_does_not_retrigger() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.reader.card("12345", Duration::ZERO);
        // 开门期间与刚结束时的重复读取
        rig.reader.card("12345", Duration::from_secs(3));
        rig.reader.card("12345", Duration::from_secs(6));
        rig.reader.card("12345", Duration::from_secs(30));
        let mut controller = rig.controller();

        assert!(matches!(controller.run_cycle().unwrap(), CycleOutcome::Granted(_)));
        rig.clock.advance(Duration::from_secs(25));
        assert!(matches!(controller.run_cycle().unwrap(), CycleOutcome::Granted(_)));
        assert_eq!(rig.pins.active_spans(RELAY, Polarity::ActiveLow).len(), 2);
        assert_eq!(rig.directory.calls(), 2);
        assert_eq!(rig.reader.remaining(), 0);
    }

    #[test]
    fn different_card_right_after_grant_is_served() {
        let rig = Rig::new();
        rig.directory.insert("12345", "Alice");
        rig.directory.insert("777", "Bob");
        rig.reader.card("12345", Duration::ZERO);
        rig.reader.card("777", Duration::from_secs(1));
        let mut controller = rig.controller();
        assert!(matches!(controller.run_cycle().unwrap(), CycleOutcome::Granted(_)));
        assert_eq!(
            controller.run_cycle().unwrap(),
            CycleOutcome::Granted("Bob".to_string())
        );
    }

    #[test]
    fn every_lookup_result_fires_exactly_one_path() {
        let cases: [(Option<&str>, bool); 3] = [(Some("Alice"), false), (None, false), (None, true)];
        for (principal, transient) in cases {
            let rig = Rig::new();
            if let Some(name) = principal {
                rig.directory.insert("42", name);
            }
            if transient {
                rig.directory.fail_next(1);
            }
            rig.reader.card("42", Duration::ZERO);
            let mut controller = rig.controller();
            let outcome = controller.run_cycle().unwrap();

            let relay = rig.pins.active_spans(RELAY, Polarity::ActiveLow).len();
            let buzzer = rig.pins.active_spans(BUZZER, Polarity::ActiveHigh).len();
            match outcome {
                CycleOutcome::Granted(_) => assert!(relay == 1 && buzzer > 0),
                CycleOutcome::Denied => assert!(relay == 0 && buzzer == 1),
                CycleOutcome::LookupFailed => assert!(relay == 0 && buzzer == 0),
                other => panic!("unexpected outcome {:?}", other),
            }
            assert_eq!(rig.pins.level(RELAY), Some(true));
            assert_eq!(rig.pins.level(BUZZER), Some(false));
        }
    }
}
