//! FS2 两字节浮点
//!
//! ```text
//!   bit 15     符号
//!   bit 14..13 小数点位置 (除以 10^n)
//!   bit 12..0  幅值
//! ```
//! 特殊值: 0x1FFF +INF, 0x9FFF -INF, 0x9FFE NaN

use crate::constants::{FS2_MAX_MAGNITUDE, FS2_NAN, FS2_NEG_INF, FS2_POS_INF};

const SIGN_BIT: u16 = 0x8000;
const LOCATOR_SHIFT: u16 = 13;
const MANTISSA_MASK: u16 = 0x1FFF;
/// 小数点位置对应的除数
const DIVISORS: [f64; 4] = [1.0, 10.0, 100.0, 1000.0];

pub fn decode(raw: u16) -> f64 {
    match raw {
        FS2_POS_INF => return f64::INFINITY,
        FS2_NEG_INF => return f64::NEG_INFINITY,
        FS2_NAN | 0x1FFE => return f64::NAN,
        _ => {}
    }

    let locator = ((raw >> LOCATOR_SHIFT) & 0x03) as usize;
    let magnitude = f64::from(raw & MANTISSA_MASK) / DIVISORS[locator];
    if raw & SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// 编码，优先保留最多小数位；超出范围编码为 ±INF
pub fn encode(value: f64) -> u16 {
    if value.is_nan() {
        return FS2_NAN;
    }

    let negative = value < 0.0;
    let magnitude = value.abs();
    let sign = if negative { SIGN_BIT } else { 0 };

    if magnitude.is_finite() {
        for locator in (0..DIVISORS.len()).rev() {
            let scaled = (magnitude * DIVISORS[locator]).round();
            if scaled <= FS2_MAX_MAGNITUDE {
                return sign | ((locator as u16) << LOCATOR_SHIFT) | scaled as u16;
            }
        }
    }

    if negative {
        FS2_NEG_INF
    } else {
        FS2_POS_INF
    }
}
