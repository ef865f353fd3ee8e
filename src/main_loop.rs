use crate::controller::AccessController;
use crate::display::messages;
use crate::error::{ControllerError, FatalError};
use crate::hal::ShutdownSignal;
use crate::model::{CycleOutcome, StatusIndicator};

/// 主循环正常退出的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// 收到关机信号或读卡链路关闭。
    Shutdown,
}

/// 各类结果计数，退出时输出到日志。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub granted: u64,
    pub denied: u64,
    pub read_failed: u64,
    pub lookup_failed: u64,
    pub connectivity_failed: u64,
    pub faults: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        let counter = match outcome {
            CycleOutcome::Granted(_) => &mut self.granted,
            CycleOutcome::Denied => &mut self.denied,
            CycleOutcome::ReadFailed => &mut self.read_failed,
            CycleOutcome::LookupFailed => &mut self.lookup_failed,
            CycleOutcome::ConnectivityFailed => &mut self.connectivity_failed,
        };
        *counter += 1;
    }

    fn log_summary(&self) {
        log::info!(
            "Loop summary: cycles={} granted={} denied={} read_failed={} lookup_failed={} connectivity_failed={} faults={}",
            self.cycles,
            self.granted,
            self.denied,
            self.read_failed,
            self.lookup_failed,
            self.connectivity_failed,
            self.faults
        );
    }
}

/// 单步执行结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(LoopExit),
}

/// 无限驱动控制器：吸收单次循环故障，致命错误交给监督者。
pub struct MainLoop {
    controller: AccessController,
    shutdown: ShutdownSignal,
    stats: LoopStats,
}

impl MainLoop {
    pub fn new(controller: AccessController, shutdown: ShutdownSignal) -> Self {
        Self {
            controller,
            shutdown,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn controller(&self) -> &AccessController {
        &self.controller
    }

    /// 执行一次循环并分类处理结果。
    pub fn step(&mut self) -> Result<Step, FatalError> {
        if self.shutdown.is_triggered() {
            return Ok(Step::Stop(self.stop()));
        }
        match self.controller.run_cycle() {
            Ok(outcome) => {
                log::info!("Cycle outcome: {}", outcome.as_str());
                self.stats.record(&outcome);
                Ok(Step::Continue)
            }
            Err(ControllerError::Fault(fault)) => {
                log::warn!("Cycle fault absorbed: {}", fault);
                self.stats.faults += 1;
                self.controller.recover_from_fault();
                Ok(Step::Continue)
            }
            Err(ControllerError::Shutdown) => Ok(Step::Stop(self.stop())),
            Err(ControllerError::Fatal(err)) => {
                let monitor = self.controller.monitor();
                log::error!(
                    "Fatal error (network {}, directory {}), handing over to supervisor: {}",
                    monitor.network_state().as_str(),
                    monitor.directory_state().as_str(),
                    err
                );
                self.controller
                    .teardown(messages::WIFI_ERROR, StatusIndicator::Fault);
                self.stats.log_summary();
                Err(err)
            }
        }
    }

    /// 运行直到关机（Ok）或致命错误（Err）。
    pub fn run(&mut self) -> Result<LoopExit, FatalError> {
        log::info!("Access controller loop started");
        loop {
            if let Step::Stop(exit) = self.step()? {
                return Ok(exit);
            }
        }
    }

    fn stop(&mut self) -> LoopExit {
        log::info!("Shutting down access controller loop");
        self.controller
            .teardown(messages::SHUTDOWN, StatusIndicator::Off);
        self.stats.log_summary();
        LoopExit::Shutdown
    }
}
