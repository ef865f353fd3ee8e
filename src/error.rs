use thiserror::Error;

use crate::proto::FrameError;

/// 引脚/外设写入失败（继电器卡死属安全隐患，不重试）。
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("output line {line} write failed: {reason}")]
    Output { line: &'static str, reason: String },

    #[error("display write failed: {0}")]
    Display(String),

    #[error("status lamp write failed: {0}")]
    Lamp(String),
}

/// 读卡错误。
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader frame rejected: {0}")]
    Frame(#[from] FrameError),

    #[error("reader fault: {0}")]
    Fault(String),

    #[error("reader link closed")]
    Closed,
}

/// 目录查询失败（连接/状态码/解析），与“未找到”严格区分。
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("malformed directory response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("directory rejected request: {0}")]
    Api(String),
}

/// 可达性探测失败。
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe target {0} did not resolve")]
    Unresolved(String),

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed: {0}")]
    Other(String),
}

/// 网络重连失败。
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("reconnect command failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("radio error: {0}")]
    Radio(String),
}

/// 配置解析/校验错误。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

/// 单次循环内可恢复的故障，在循环边界被吸收。
#[derive(Debug, Error)]
pub enum CycleFault {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Actuator(#[from] HardwareError),
}

/// 致命错误：需交给上层监督者重启。
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("network unreachable after {attempts} reconnect attempt(s)")]
    NetworkUnreachable { attempts: u32 },

    #[error("hardware boot failed: {0}")]
    Boot(#[from] BootError),
}

/// 硬件初始化失败。
#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("boot failed: {0}")]
    Other(String),
}

/// 控制器一次循环的错误分类（致命 / 可恢复 / 关机）。
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error(transparent)]
    Fault(#[from] CycleFault),

    #[error("shutdown requested")]
    Shutdown,
}

impl From<HardwareError> for ControllerError {
    fn from(err: HardwareError) -> Self {
        ControllerError::Fault(CycleFault::Actuator(err))
    }
}

impl From<ReaderError> for ControllerError {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Closed => ControllerError::Shutdown,
            other => ControllerError::Fault(CycleFault::Reader(other)),
        }
    }
}
