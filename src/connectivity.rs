use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::display::{messages, FeedbackPresenter};
use crate::error::{ControllerError, FatalError, LinkError, ProbeError};
use crate::hal::{sleep_unless_shutdown, Clock, NetworkLink, Probe, ShutdownSignal};
use crate::model::{ConnectivityState, StatusIndicator};
use crate::settings::ControllerSettings;

/// TCP 连接探测：连接成功即释放。
pub struct TcpProbe {
    target: String,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Probe for TcpProbe {
    fn probe(&mut self, timeout: Duration) -> Result<(), ProbeError> {
        let addr = self
            .target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ProbeError::Unresolved(self.target.clone()))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        drop(stream);
        Ok(())
    }
}

/// 本地文件探测（主机台架的授权表）。
pub struct PathProbe {
    path: PathBuf,
}

impl PathProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Probe for PathProbe {
    fn probe(&mut self, _timeout: Duration) -> Result<(), ProbeError> {
        let meta = std::fs::metadata(&self.path)?;
        if meta.is_file() {
            Ok(())
        } else {
            Err(ProbeError::Other(format!("{} is not a file", self.path.display())))
        }
    }
}

/// 通过外部命令重连（如 `wpa_cli -i wlan0 reconnect`）。
pub struct CommandLink {
    program: String,
    args: Vec<String>,
}

impl CommandLink {
    /// 由命令行向量构造；空向量返回 None。
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl NetworkLink for CommandLink {
    fn reconnect(&mut self) -> Result<(), LinkError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(LinkError::Command(format!("{} exited with {}", self.program, status)))
        }
    }
}

/// 连通性探测参数。
#[derive(Clone, Debug)]
pub struct ConnectivityPolicy {
    pub network_timeout: Duration,
    pub network_settle: Duration,
    pub directory_timeout: Duration,
    pub retry_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl ConnectivityPolicy {
    pub fn from_settings(settings: &ControllerSettings) -> Self {
        Self {
            network_timeout: Duration::from_millis(settings.network.probe_timeout_ms),
            network_settle: Duration::from_millis(settings.network.settle_ms),
            directory_timeout: Duration::from_millis(settings.directory.probe_timeout_ms),
            retry_delay: Duration::from_millis(settings.directory.retry_delay_ms),
            max_attempts: settings.directory.max_attempts,
        }
    }
}

/// 目录重连结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectoryWait {
    Reachable,
    Exhausted,
    Shutdown,
}

/// 前置条件检查结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Online,
    DirectoryGaveUp,
}

/// 网络与目录服务的可达性监控。
pub struct ConnectivityMonitor {
    network_probe: Box<dyn Probe>,
    directory_probe: Box<dyn Probe>,
    link: Box<dyn NetworkLink>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    policy: ConnectivityPolicy,
    network: ConnectivityState,
    directory: ConnectivityState,
}

impl ConnectivityMonitor {
    pub fn new(
        network_probe: Box<dyn Probe>,
        directory_probe: Box<dyn Probe>,
        link: Box<dyn NetworkLink>,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
        policy: ConnectivityPolicy,
    ) -> Self {
        Self {
            network_probe,
            directory_probe,
            link,
            clock,
            shutdown,
            policy,
            network: ConnectivityState::Offline,
            directory: ConnectivityState::Offline,
        }
    }

    pub fn network_state(&self) -> ConnectivityState {
        self.network
    }

    pub fn directory_state(&self) -> ConnectivityState {
        self.directory
    }

    /// 单次网络探测（约 1s 超时），从不返回错误。
    pub fn is_network_reachable(&mut self) -> bool {
        let reachable = match self.network_probe.probe(self.policy.network_timeout) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Network probe failed: {}", err);
                false
            }
        };
        self.set_network(online_or_offline(reachable));
        reachable
    }

    /// 连接目录服务后立即释放（约 5s 超时）。
    pub fn is_directory_reachable(&mut self) -> bool {
        let reachable = match self.directory_probe.probe(self.policy.directory_timeout) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Directory probe failed: {}", err);
                false
            }
        };
        self.set_directory(online_or_offline(reachable));
        reachable
    }

    /// 触发平台重连并等待稳定期；尽力而为。
    pub fn reconnect_network(&mut self, presenter: &mut FeedbackPresenter) {
        self.set_network(ConnectivityState::Reconnecting);
        presenter.show_message(messages::WIFI_RECONNECTING);
        presenter.signal(StatusIndicator::Offline);
        log::info!("Reconnecting network...");
        if let Err(err) = self.link.reconnect() {
            log::warn!("Network reconnect failed: {}", err);
        }
        self.clock.sleep(self.policy.network_settle);
    }

    /// 固定间隔重试直到目录可达；`max_attempts` 为 None 时无限重试，可被关机打断。
    pub fn reconnect_directory(
        &mut self,
        presenter: &mut FeedbackPresenter,
        retry_delay: Duration,
        max_attempts: Option<u32>,
    ) -> DirectoryWait {
        self.set_directory(ConnectivityState::Reconnecting);
        presenter.show_message(messages::SERVER_RECONNECTING);
        presenter.signal(StatusIndicator::Offline);
        let mut attempts: u32 = 0;
        loop {
            if max_attempts.map_or(false, |max| attempts >= max) {
                log::warn!("Directory still unreachable after {} attempt(s)", attempts);
                self.set_directory(ConnectivityState::Offline);
                return DirectoryWait::Exhausted;
            }
            log::info!("Reconnecting to the directory (attempt {})...", attempts + 1);
            if !sleep_unless_shutdown(self.clock.as_ref(), retry_delay, &self.shutdown) {
                return DirectoryWait::Shutdown;
            }
            attempts += 1;
            if self.is_directory_reachable() {
                log::info!("Directory reachable after {} attempt(s)", attempts);
                return DirectoryWait::Reachable;
            }
            self.set_directory(ConnectivityState::Reconnecting);
        }
    }

    /// 循环前置条件：网络一次重连仍失败为致命；目录不可达则按固定间隔重试。
    pub fn ensure_online(
        &mut self,
        presenter: &mut FeedbackPresenter,
    ) -> Result<Readiness, ControllerError> {
        if !self.is_network_reachable() {
            self.reconnect_network(presenter);
            if !self.is_network_reachable() {
                presenter.show_message(messages::WIFI_ERROR);
                presenter.signal(StatusIndicator::Fault);
                return Err(FatalError::NetworkUnreachable { attempts: 1 }.into());
            }
            log::info!("Network restored");
        }

        if !self.is_directory_reachable() {
            let retry_delay = self.policy.retry_delay;
            let max_attempts = self.policy.max_attempts;
            match self.reconnect_directory(presenter, retry_delay, max_attempts) {
                DirectoryWait::Reachable => {}
                DirectoryWait::Exhausted => return Ok(Readiness::DirectoryGaveUp),
                DirectoryWait::Shutdown => return Err(ControllerError::Shutdown),
            }
        }
        Ok(Readiness::Online)
    }

    fn set_network(&mut self, state: ConnectivityState) {
        if self.network != state {
            log::info!("Network {} -> {}", self.network.as_str(), state.as_str());
            self.network = state;
        }
    }

    fn set_directory(&mut self, state: ConnectivityState) {
        if self.directory != state {
            log::info!("Directory {} -> {}", self.directory.as_str(), state.as_str());
            self.directory = state;
        }
    }
}

fn online_or_offline(reachable: bool) -> ConnectivityState {
    if reachable {
        ConnectivityState::Online
    } else {
        ConnectivityState::Offline
    }
}
