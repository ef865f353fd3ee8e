//! 模拟硬件：带时间戳的引脚记录、手动时钟、脚本化探测/读卡/目录、显示捕获。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use smart_leds::RGB8;

use crate::actuator::ActuatorController;
use crate::controller::{AccessController, ControllerParts, Devices};
use crate::display::TextFrame;
use crate::error::{DirectoryError, HardwareError, LinkError, ProbeError, ReaderError};
use crate::hal::{
    CardReader, Clock, DirectoryBackend, DisplaySurface, NetworkLink, OutputLine, Probe,
    ShutdownSignal, StatusLamp,
};
use crate::main_loop::MainLoop;
use crate::model::{AuthorizationRecord, CardIdentifier, CardRead, Polarity};
use crate::proto::FrameError;
use crate::settings::ControllerSettings;

pub const RELAY: &str = "relay";
pub const BUZZER: &str = "buzzer";

/// 手动推进的时钟；`sleep` 直接推进时间。
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Clone, Debug)]
struct PinEvent {
    line: &'static str,
    at: Duration,
    high: bool,
}

/// 所有引脚写入的时间线。
#[derive(Clone, Default)]
pub struct PinLog {
    events: Arc<Mutex<Vec<PinEvent>>>,
}

impl PinLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, line: &'static str, at: Duration, high: bool) {
        self.events.lock().unwrap().push(PinEvent { line, at, high });
    }

    /// 最后一次写入的电平（true = 高）。
    pub fn level(&self, line: &str) -> Option<bool> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|event| event.line == line)
            .map(|event| event.high)
    }

    /// 已结束的激活区间 (开始, 结束)；仍处于激活的区间不计入。
    pub fn active_spans(&self, line: &str, polarity: Polarity) -> Vec<(Duration, Duration)> {
        let mut spans = Vec::new();
        let mut started: Option<Duration> = None;
        for event in self.events.lock().unwrap().iter().filter(|e| e.line == line) {
            let active = match polarity {
                Polarity::ActiveHigh => event.high,
                Polarity::ActiveLow => !event.high,
            };
            match (active, started) {
                (true, None) => started = Some(event.at),
                (false, Some(start)) => {
                    spans.push((start, event.at));
                    started = None;
                }
                _ => {}
            }
        }
        spans
    }
}

/// 引脚故障开关：允许 n 次成功写入后开始失败。
#[derive(Clone, Default)]
pub struct FaultSwitch {
    remaining: Arc<Mutex<Option<u32>>>,
}

impl FaultSwitch {
    pub fn fail_after(&self, writes: u32) {
        *self.remaining.lock().unwrap() = Some(writes);
    }

    fn allow_write(&self) -> bool {
        let mut remaining = self.remaining.lock().unwrap();
        match remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }
}

/// 写入记录到 [`PinLog`] 的输出引脚。
pub struct RecordingLine {
    name: &'static str,
    clock: ManualClock,
    log: PinLog,
    fault: FaultSwitch,
}

impl RecordingLine {
    pub fn new(name: &'static str, clock: &ManualClock, log: &PinLog) -> Self {
        Self {
            name,
            clock: clock.clone(),
            log: log.clone(),
            fault: FaultSwitch::default(),
        }
    }

    pub fn with_fault_switch(mut self, fault: FaultSwitch) -> Self {
        self.fault = fault;
        self
    }

    pub fn fault_switch(&self) -> FaultSwitch {
        self.fault.clone()
    }

    fn write(&mut self, high: bool) -> Result<(), HardwareError> {
        if !self.fault.allow_write() {
            return Err(HardwareError::Output {
                line: self.name,
                reason: "simulated driver fault".to_string(),
            });
        }
        self.log.record(self.name, self.clock.now(), high);
        Ok(())
    }
}

impl OutputLine for RecordingLine {
    fn set_high(&mut self) -> Result<(), HardwareError> {
        self.write(true)
    }

    fn set_low(&mut self) -> Result<(), HardwareError> {
        self.write(false)
    }
}

/// 捕获每一帧显示内容。
#[derive(Clone, Default)]
pub struct CapturedDisplay {
    frames: Arc<Mutex<Vec<TextFrame>>>,
    failing: Arc<AtomicBool>,
}

impl CapturedDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<TextFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<TextFrame> {
        self.frames.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl DisplaySurface for CapturedDisplay {
    fn draw(&mut self, frame: &TextFrame) -> Result<(), HardwareError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Display("panel not responding".to_string()));
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CapturedLamp {
    colors: Arc<Mutex<Vec<RGB8>>>,
    failing: Arc<AtomicBool>,
}

impl CapturedLamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn colors(&self) -> Vec<RGB8> {
        self.colors.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StatusLamp for CapturedLamp {
    fn set_color(&mut self, color: RGB8) -> Result<(), HardwareError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Lamp("lamp not responding".to_string()));
        }
        self.colors.lock().unwrap().push(color);
        Ok(())
    }
}

struct ProbeScript {
    queue: VecDeque<bool>,
    fallback: bool,
    calls: usize,
}

/// 按脚本返回结果的探测；脚本耗尽后返回 fallback。
#[derive(Clone)]
pub struct ScriptedProbe {
    script: Arc<Mutex<ProbeScript>>,
}

impl ScriptedProbe {
    pub fn new(fallback: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(ProbeScript {
                queue: VecDeque::new(),
                fallback,
                calls: 0,
            })),
        }
    }

    pub fn push(&self, results: &[bool]) {
        self.script.lock().unwrap().queue.extend(results.iter().copied());
    }

    pub fn set_fallback(&self, reachable: bool) {
        self.script.lock().unwrap().fallback = reachable;
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls
    }
}

impl Probe for ScriptedProbe {
    fn probe(&mut self, _timeout: Duration) -> Result<(), ProbeError> {
        let mut script = self.script.lock().unwrap();
        script.calls += 1;
        let reachable = match script.queue.pop_front() {
            Some(result) => result,
            None => script.fallback,
        };
        if reachable {
            Ok(())
        } else {
            Err(ProbeError::Other("simulated unreachable".to_string()))
        }
    }
}

#[derive(Clone)]
pub struct ScriptedLink {
    succeed: Arc<AtomicBool>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedLink {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: Arc::new(AtomicBool::new(succeed)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl NetworkLink for ScriptedLink {
    fn reconnect(&mut self) -> Result<(), LinkError> {
        *self.calls.lock().unwrap() += 1;
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LinkError::Radio("simulated association failure".to_string()))
        }
    }
}

/// 预先排队的读卡事件；队列为空视为读卡链路关闭。
#[derive(Clone, Default)]
pub struct ScriptedReader {
    queue: Arc<Mutex<VecDeque<Result<CardRead, ReaderError>>>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card(&self, id: &str, seen_at: Duration) {
        self.queue.lock().unwrap().push_back(Ok(CardRead {
            id: CardIdentifier::from(id),
            seen_at,
        }));
    }

    pub fn frame_error(&self, err: FrameError) {
        self.queue.lock().unwrap().push_back(Err(ReaderError::Frame(err)));
    }

    pub fn fault(&self, reason: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(ReaderError::Fault(reason.to_string())));
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl CardReader for ScriptedReader {
    fn read_card(&mut self) -> Result<CardRead, ReaderError> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ReaderError::Closed))
    }
}

#[derive(Default)]
struct DirectoryState {
    records: HashMap<String, String>,
    failures: u32,
    calls: usize,
}

/// 内存授权表，可注入暂时性故障。
#[derive(Clone, Default)]
pub struct ScriptedDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, principal: &str) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(id.to_string(), principal.to_string());
    }

    /// 接下来 n 次查询返回传输错误。
    pub fn fail_next(&self, lookups: u32) {
        self.state.lock().unwrap().failures = lookups;
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl DirectoryBackend for ScriptedDirectory {
    fn find_principal(
        &mut self,
        id: &CardIdentifier,
    ) -> Result<Option<AuthorizationRecord>, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(DirectoryError::Transport("connection refused".to_string()));
        }
        Ok(state
            .records
            .get(id.as_str())
            .map(|principal| AuthorizationRecord::new(id.clone(), principal)))
    }
}

/// 完整的模拟门禁装置；多次调用 `controller()` 共享同一组模拟硬件（相当于重启）。
pub struct Rig {
    pub settings: ControllerSettings,
    pub clock: ManualClock,
    pub pins: PinLog,
    pub relay_fault: FaultSwitch,
    pub display: CapturedDisplay,
    pub lamp: CapturedLamp,
    pub network_probe: ScriptedProbe,
    pub directory_probe: ScriptedProbe,
    pub link: ScriptedLink,
    pub reader: ScriptedReader,
    pub directory: ScriptedDirectory,
    pub shutdown: ShutdownSignal,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            settings: ControllerSettings::default(),
            clock: ManualClock::new(),
            pins: PinLog::new(),
            relay_fault: FaultSwitch::default(),
            display: CapturedDisplay::new(),
            lamp: CapturedLamp::new(),
            network_probe: ScriptedProbe::new(true),
            directory_probe: ScriptedProbe::new(true),
            link: ScriptedLink::new(true),
            reader: ScriptedReader::new(),
            directory: ScriptedDirectory::new(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn controller(&self) -> AccessController {
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        let relay = RecordingLine::new(RELAY, &self.clock, &self.pins)
            .with_fault_switch(self.relay_fault.clone());
        let buzzer = RecordingLine::new(BUZZER, &self.clock, &self.pins);
        let actuator = ActuatorController::new(
            Box::new(relay),
            Box::new(buzzer),
            self.settings.actuator,
            clock.clone(),
        )
        .expect("rig actuator");
        let devices = Devices {
            actuator,
            surface: Box::new(self.display.clone()),
            lamp: Some(Box::new(self.lamp.clone())),
            network_probe: Box::new(self.network_probe.clone()),
            directory_probe: Box::new(self.directory_probe.clone()),
            link: Box::new(self.link.clone()),
            directory: Box::new(self.directory.clone()),
            reader: Box::new(self.reader.clone()),
        };
        AccessController::new(ControllerParts::assemble(
            &self.settings,
            devices,
            clock,
            self.shutdown.clone(),
        ))
    }

    pub fn main_loop(&self) -> MainLoop {
        MainLoop::new(self.controller(), self.shutdown.clone())
    }
}
