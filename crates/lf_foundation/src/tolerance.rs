// crates/lf_foundation/src/tolerance.rs

//! 数值容差常量
//!
//! 集中定义粒子追踪中反复出现的阈值，避免魔数散落在各模块。

/// 积分模型默认几何容差（单元定位、求交）
pub const DEFAULT_MODEL_TOLERANCE: f64 = 1e-8;

/// 参数坐标判定"在单元内"时允许的外溢量
pub const PARAMETRIC_TOLERANCE: f64 = 1e-6;

/// 判断一步是否停滞：三个坐标分量的差都在机器精度以内
#[inline]
pub fn is_stagnating(current: [f64; 3], next: [f64; 3]) -> bool {
    (0..3).all(|i| (next[i] - current[i]).abs() < f64::EPSILON)
}

/// 安全除法：分母接近零时返回 `fallback`
#[inline]
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() < f64::MIN_POSITIVE {
        fallback
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagnation() {
        assert!(is_stagnating([1.0, 2.0, 3.0], [1.0, 2.0, 3.0]));
        assert!(!is_stagnating([1.0, 2.0, 3.0], [1.0, 2.0, 3.0 + 1e-9]));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 0.0, -1.0), -1.0);
        assert_eq!(safe_div(1.0, 2.0, -1.0), 0.5);
    }
}
