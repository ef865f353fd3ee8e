//! 重启监督：主循环返回致命错误后，释放全部硬件并重新初始化，次数有上限。

use crate::error::{BootError, FatalError};
use crate::hal::{sleep_unless_shutdown, Clock, ShutdownSignal};
use crate::main_loop::{LoopExit, MainLoop};
use crate::settings::RestartPolicy;

/// 监督结束的原因。
#[derive(Debug)]
pub enum SupervisorExit {
    Shutdown,
    /// 重启次数用尽；由平台执行最终兜底（芯片复位 / 进程退出码）。
    RestartsExhausted(FatalError),
}

/// 循环执行 `boot` + `run`。`boot` 收到本次启动序号（0 为首次启动），
/// 每次都必须重新构造硬件对象；上一轮的 [`MainLoop`] 在重启前已被释放（引脚断电）。
pub fn supervise<B>(
    policy: &RestartPolicy,
    clock: &dyn Clock,
    shutdown: &ShutdownSignal,
    mut boot: B,
) -> SupervisorExit
where
    B: FnMut(u32) -> Result<MainLoop, BootError>,
{
    let mut restarts: u32 = 0;
    loop {
        let result = match boot(restarts) {
            Ok(mut main_loop) => main_loop.run(),
            Err(err) => {
                log::error!("Boot #{} failed: {}", restarts, err);
                Err(FatalError::Boot(err))
            }
        };

        let fatal = match result {
            Ok(LoopExit::Shutdown) => return SupervisorExit::Shutdown,
            Err(fatal) => fatal,
        };
        if restarts >= policy.max_restarts {
            log::error!(
                "Giving up after {} restart(s), last error: {}",
                restarts,
                fatal
            );
            return SupervisorExit::RestartsExhausted(fatal);
        }
        restarts += 1;
        log::warn!(
            "Restarting controller ({}/{}) in {} ms: {}",
            restarts,
            policy.max_restarts,
            policy.backoff_ms,
            fatal
        );
        if !sleep_unless_shutdown(clock, policy.backoff(), shutdown) {
            return SupervisorExit::Shutdown;
        }
    }
}
