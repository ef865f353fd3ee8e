use smart_leds::RGB8;

use crate::model::StatusIndicator;

// 亮度缩放（约 30%）。
pub const BRIGHTNESS_SCALE: u8 = 77;

/// 将状态指示映射到灯色。
pub fn indicator_color(indicator: StatusIndicator) -> RGB8 {
    match indicator {
        StatusIndicator::Off => RGB8::default(),
        StatusIndicator::Ready => RGB8 { r: 0, g: 0, b: 255 },
        StatusIndicator::Granted => RGB8 { r: 0, g: 255, b: 0 },
        StatusIndicator::Denied => RGB8 { r: 255, g: 0, b: 0 },
        StatusIndicator::Offline => RGB8 { r: 255, g: 255, b: 0 },
        StatusIndicator::Fault => RGB8 { r: 255, g: 0, b: 255 },
    }
}

/// 亮度缩放，降低刺眼程度。
pub fn apply_brightness(color: RGB8, scale: u8) -> RGB8 {
    let scale = scale as u16;
    let apply = |v: u8| ((v as u16 * scale) / 255) as u8;
    RGB8 {
        r: apply(color.r),
        g: apply(color.g),
        b: apply(color.b),
    }
}

/// WS2812 的 GRB 24bit 编码。
pub fn grb_bits(color: RGB8) -> u32 {
    ((color.g as u32) << 16) | ((color.r as u32) << 8) | color.b as u32
}
