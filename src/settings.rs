use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::display::DisplayGeometry;
use crate::error::SettingsError;
use crate::model::Polarity;

// 编译期注入（build.rs 从 .env 读取），缺省时使用内置默认值。
const DIRECTORY_BASE_URL: Option<&str> = option_env!("DIRECTORY_BASE_URL");
const DIRECTORY_TOKEN: Option<&str> = option_env!("DIRECTORY_TOKEN");
const NETWORK_PROBE_ADDR: Option<&str> = option_env!("NETWORK_PROBE_ADDR");

/// 控制器运行参数（全部可外部配置）。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub device_id: String,
    pub network: NetworkSettings,
    pub directory: DirectorySettings,
    pub timing: TimingSettings,
    pub actuator: ActuatorSettings,
    pub display: DisplayGeometry,
    pub restart: RestartPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            device_id: "tapgate".to_string(),
            network: NetworkSettings::default(),
            directory: DirectorySettings::default(),
            timing: TimingSettings::default(),
            actuator: ActuatorSettings::default(),
            display: DisplayGeometry::default(),
            restart: RestartPolicy::default(),
        }
    }
}

/// 网络可达性探测与重连。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub probe_addr: String,
    pub probe_timeout_ms: u64,
    pub settle_ms: u64,
    /// 主机台架使用的重连命令。
    pub reconnect_command: Vec<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            probe_addr: NETWORK_PROBE_ADDR.unwrap_or("8.8.8.8:53").to_string(),
            probe_timeout_ms: 1000,
            settle_ms: 5000,
            reconnect_command: ["wpa_cli", "-i", "wlan0", "reconnect"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 授权目录服务。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub base_url: String,
    pub lookup_path: String,
    pub token: Option<String>,
    /// 未设置时从 base_url 推导 host:port。
    pub probe_addr: Option<String>,
    pub probe_timeout_ms: u64,
    pub retry_delay_ms: u64,
    /// None 表示无限重试。
    pub max_attempts: Option<u32>,
    /// 主机台架的本地授权表（JSON）。
    pub table_file: Option<String>,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_url: DIRECTORY_BASE_URL.unwrap_or("http://192.168.184.96:8080").to_string(),
            lookup_path: "/api/v1/access/lookup".to_string(),
            token: DIRECTORY_TOKEN.map(str::to_string),
            probe_addr: None,
            probe_timeout_ms: 5000,
            retry_delay_ms: 5000,
            max_attempts: None,
            table_file: None,
        }
    }
}

impl DirectorySettings {
    pub fn lookup_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.lookup_path)
    }

    /// 目录探测目标：显式配置优先，否则取 base_url 的 authority。
    pub fn probe_target(&self) -> Option<String> {
        self.probe_addr
            .clone()
            .or_else(|| authority_from_url(&self.base_url))
    }
}

/// 执行器时序。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub hold_ms: u64,
    pub pulse_ms: u64,
    pub alert_ms: u64,
    /// 同卡重复读取的屏蔽窗口。
    pub repeat_guard_ms: u64,
    /// 读卡最长有效期：等待连通期间排队的过期读卡不再开门。
    pub max_read_age_ms: u64,
    pub fault_backoff_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            hold_ms: 5000,
            pulse_ms: 200,
            alert_ms: 2000,
            repeat_guard_ms: 2000,
            max_read_age_ms: 30_000,
            fault_backoff_ms: 1000,
        }
    }
}

impl TimingSettings {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    pub fn alert(&self) -> Duration {
        Duration::from_millis(self.alert_ms)
    }

    pub fn repeat_guard(&self) -> Duration {
        Duration::from_millis(self.repeat_guard_ms)
    }

    pub fn max_read_age(&self) -> Duration {
        Duration::from_millis(self.max_read_age_ms)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }
}

/// 输出极性（继电器默认低电平有效）。
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    pub relay: Polarity,
    pub buzzer: Polarity,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            relay: Polarity::ActiveLow,
            buzzer: Polarity::ActiveHigh,
        }
    }
}

/// 致命错误后的重启策略。
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RestartPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl ControllerSettings {
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let checks: [(&'static str, bool); 9] = [
            ("timing.hold_ms", self.timing.hold_ms > 0),
            ("timing.max_read_age_ms", self.timing.max_read_age_ms > 0),
            ("timing.pulse_ms", self.timing.pulse_ms > 0),
            ("timing.alert_ms", self.timing.alert_ms > 0),
            ("directory.retry_delay_ms", self.directory.retry_delay_ms > 0),
            ("network.probe_timeout_ms", self.network.probe_timeout_ms > 0),
            ("directory.probe_timeout_ms", self.directory.probe_timeout_ms > 0),
            ("display.glyph_width_px", self.display.glyph_width_px > 0),
            ("display.line_height_px", self.display.line_height_px > 0),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if self.directory.max_attempts == Some(0) {
            return Err(SettingsError::Invalid {
                field: "directory.max_attempts",
                reason: "use null for unbounded retries",
            });
        }
        Ok(())
    }
}

/// 从 URL 中提取 host:port（缺省端口按协议推断）。
pub fn authority_from_url(url: &str) -> Option<String> {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", url),
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    if authority.is_empty() {
        return None;
    }
    let has_port = match authority.rfind(']') {
        Some(bracket) => authority[bracket..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        return Some(authority.to_string());
    }
    let port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
    Some(format!("{}:{}", authority, port))
}
