use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::PlayerError;

/// 有理数时间基（例如 1/90000、1/1000、1001/24000）
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// 创建有理数
    ///
    /// # Panics
    ///
    /// 分母为 0 时 panic
    pub const fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "denominator cannot be zero");
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// 分子分母都为正才是合法的流时间基
    pub fn is_valid_time_base(self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl TryFrom<(i32, i32)> for Rational {
    type Error = PlayerError;

    fn try_from((num, den): (i32, i32)) -> Result<Self, Self::Error> {
        if den == 0 {
            return Err(PlayerError::ConfigError(format!("时间基分母为 0: {}/0", num)));
        }
        Ok(Self { num, den })
    }
}

/// 舍入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// 向零取整
    Zero,
    /// 远离零取整
    Inf,
    /// 向负无穷取整
    Down,
    /// 向正无穷取整
    Up,
    /// 四舍五入，半数远离零
    NearInf,
}

/// 时间戳换算的舍入参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescaleMode {
    pub rounding: Rounding,
    /// i64::MIN / i64::MAX 原样透传（未知时间戳哨兵值）
    pub pass_minmax: bool,
}

impl RescaleMode {
    /// pts/dts 使用的模式
    pub const TIMESTAMP: Self = Self {
        rounding: Rounding::NearInf,
        pass_minmax: true,
    };

    /// duration 使用的模式
    pub const DURATION: Self = Self {
        rounding: Rounding::NearInf,
        pass_minmax: false,
    };
}

/// 计算 a * b / c，按 `rounding` 舍入，结果饱和到 i64 范围
pub fn rescale_rnd(a: i64, b: i64, c: i64, mode: RescaleMode) -> i64 {
    if mode.pass_minmax && (a == i64::MIN || a == i64::MAX) {
        return a;
    }

    let (a, mut b, mut c) = (a as i128, b as i128, c as i128);
    if c < 0 {
        b = -b;
        c = -c;
    }

    let prod = a * b;
    if c == 0 {
        return saturate(if prod < 0 { i128::MIN } else { i128::MAX });
    }

    let q = prod / c;
    let r = prod % c;
    if r == 0 {
        return saturate(q);
    }

    let away = if prod < 0 { q - 1 } else { q + 1 };
    let rounded = match mode.rounding {
        Rounding::Zero => q,
        Rounding::Inf => away,
        Rounding::Down => {
            if prod < 0 {
                q - 1
            } else {
                q
            }
        }
        Rounding::Up => {
            if prod > 0 {
                q + 1
            } else {
                q
            }
        }
        Rounding::NearInf => {
            if 2 * r.abs() >= c {
                away
            } else {
                q
            }
        }
    };

    saturate(rounded)
}

/// 把 `value` 从时间基 `src` 换算到 `dst`
pub fn rescale_q_rnd(value: i64, src: Rational, dst: Rational, mode: RescaleMode) -> i64 {
    let b = src.num as i64 * dst.den as i64;
    let c = dst.num as i64 * src.den as i64;
    rescale_rnd(value, b, c, mode)
}

/// `Option` 版本：未知时间戳保持未知
pub fn rescale_ts(value: Option<i64>, src: Rational, dst: Rational) -> Option<i64> {
    value.map(|v| rescale_q_rnd(v, src, dst, RescaleMode::TIMESTAMP))
}

pub fn rescale_duration(value: i64, src: Rational, dst: Rational) -> i64 {
    rescale_q_rnd(value, src, dst, RescaleMode::DURATION)
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
