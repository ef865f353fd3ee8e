use serde::Deserialize;

use crate::hal::{DisplaySurface, StatusLamp};
use crate::model::StatusIndicator;
use crate::status_led::indicator_color;

/// 固定提示文案（主行, 副行）。
pub mod messages {
    pub const READY: (&str, &str) = ("System Ready", "Waiting for Card");
    pub const DENIED: (&str, &str) = ("Access Denied", "Unauthorized Card");
    pub const SERVER_ERROR: (&str, &str) = ("Server Error", "Retrying...");
    pub const SERVER_RECONNECTING: (&str, &str) = ("Server Not Connected", "Reconnecting...");
    pub const WIFI_RECONNECTING: (&str, &str) = ("Wi-Fi Disconnected", "Reconnecting...");
    pub const WIFI_ERROR: (&str, &str) = ("Wi-Fi Error", "Restarting...");
    pub const READ_ERROR: (&str, &str) = ("Read Error", "Try Again");
    pub const SYSTEM_FAULT: (&str, &str) = ("System Fault", "Please Wait");
    pub const SHUTDOWN: (&str, &str) = ("Out of Service", "");

    /// 授权通过的欢迎语。
    pub fn welcome(principal: &str) -> String {
        format!("Welcome, {}", principal)
    }
}

/// 显示面几何参数（默认 128x64 OLED，6px 字宽，16px 行高）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplayGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub glyph_width_px: u32,
    pub line_height_px: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width_px: 128,
            height_px: 64,
            glyph_width_px: 6,
            line_height_px: 16,
        }
    }
}

impl DisplayGeometry {
    /// 每行可容纳字符数（至少 1）。
    pub fn columns(&self) -> usize {
        (self.width_px / self.glyph_width_px.max(1)).max(1) as usize
    }

    /// 可显示行数。
    pub fn max_lines(&self) -> usize {
        (self.height_px / self.line_height_px.max(1)) as usize
    }
}

/// 一帧完整的显示内容。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextFrame {
    pub lines: Vec<String>,
}

impl TextFrame {
    /// 所有行以空格拼接（用于日志与断言）。
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// 按词换行；超长单词按列宽硬切。
pub fn wrap_text(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        // 超长单词先切出整行
        while word.len() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed <= columns {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// 渲染两行文案为新帧：各自换行，超出行数的底部内容静默丢弃。
pub fn render_frame(geometry: &DisplayGeometry, primary: &str, secondary: &str) -> TextFrame {
    let columns = geometry.columns();
    let mut lines = wrap_text(primary, columns);
    lines.extend(wrap_text(secondary, columns));
    lines.truncate(geometry.max_lines());
    TextFrame { lines }
}

/// 反馈呈现：显示屏 + 可选状态灯。
pub struct FeedbackPresenter {
    surface: Box<dyn DisplaySurface>,
    lamp: Option<Box<dyn StatusLamp>>,
    geometry: DisplayGeometry,
    indicator: StatusIndicator,
}

impl FeedbackPresenter {
    pub fn new(surface: Box<dyn DisplaySurface>, geometry: DisplayGeometry) -> Self {
        Self {
            surface,
            lamp: None,
            geometry,
            indicator: StatusIndicator::Off,
        }
    }

    pub fn with_lamp(mut self, lamp: Box<dyn StatusLamp>) -> Self {
        self.lamp = Some(lamp);
        self
    }

    /// 整帧重绘；显示错误只记录，不中断循环。
    pub fn show(&mut self, primary: &str, secondary: &str) {
        let frame = render_frame(&self.geometry, primary, secondary);
        log::debug!("Display: {}", frame.text());
        if let Err(err) = self.surface.draw(&frame) {
            log::warn!("Display update failed: {}", err);
        }
    }

    pub fn show_message(&mut self, message: (&str, &str)) {
        self.show(message.0, message.1);
    }

    /// 更新状态灯颜色。
    pub fn signal(&mut self, indicator: StatusIndicator) {
        if self.indicator == indicator {
            return;
        }
        if let Some(lamp) = self.lamp.as_mut() {
            if let Err(err) = lamp.set_color(indicator_color(indicator)) {
                // 保留旧指示，下次同样的指示会重试写入
                log::warn!("Status lamp update failed: {}", err);
                return;
            }
        }
        self.indicator = indicator;
    }
}
