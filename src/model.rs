use std::fmt;
use std::time::Duration;

/// 卡片标识（读卡器给出的不透明令牌）。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CardIdentifier(String);

impl CardIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 一次读卡结果：卡号 + 读卡器看到卡片的单调时间。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardRead {
    pub id: CardIdentifier,
    pub seen_at: Duration,
}

/// 目录服务中的授权记录（只读）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRecord {
    pub id: CardIdentifier,
    pub principal: String,
}

impl AuthorizationRecord {
    /// 构造记录，姓名去除首尾空白。
    pub fn new(id: CardIdentifier, principal: &str) -> Self {
        Self {
            id,
            principal: principal.trim().to_string(),
        }
    }

    /// 显示用名称；姓名为空时回退到卡号。
    pub fn label(&self) -> &str {
        if self.principal.is_empty() {
            self.id.as_str()
        } else {
            &self.principal
        }
    }
}

/// 单个资源（网络/目录服务）的连通状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
    Reconnecting,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
            ConnectivityState::Reconnecting => "reconnecting",
        }
    }
}

/// 执行器状态；Granting/Denying 互斥且有截止时间。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorState {
    Idle,
    Granting { until: Duration },
    Denying { until: Duration },
}

impl ActuatorState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ActuatorState::Idle)
    }
}

/// 输出引脚极性（有效电平）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

/// 状态机所处阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    AwaitingCard,
    Authenticating,
    Granting,
    Denying,
}

impl ControllerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerPhase::Idle => "idle",
            ControllerPhase::AwaitingCard => "awaiting_card",
            ControllerPhase::Authenticating => "authenticating",
            ControllerPhase::Granting => "granting",
            ControllerPhase::Denying => "denying",
        }
    }
}

/// 单次循环的结果（仅用于日志与显示）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Granted(String),
    Denied,
    ReadFailed,
    LookupFailed,
    ConnectivityFailed,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Granted(_) => "granted",
            CycleOutcome::Denied => "denied",
            CycleOutcome::ReadFailed => "read_failed",
            CycleOutcome::LookupFailed => "lookup_failed",
            CycleOutcome::ConnectivityFailed => "connectivity_failed",
        }
    }
}

/// 状态灯指示（连通性与刷卡结果）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusIndicator {
    Off,
    Ready,
    Granted,
    Denied,
    Offline,
    Fault,
}
