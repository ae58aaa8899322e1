//! # 自适应 Simpson 积分
//!
//! 用于伪 Voigt 峰的解析积分。标准递归细分，区间估计误差低于
//! 容差的 15 倍即接受（Richardson 校正项）。
//!
//! ## 依赖关系
//! - 被 `xrd/experimental.rs` 使用

/// 自适应 Simpson 积分 ∫[a,b] f dx，绝对容差 tol
pub fn integrate(f: &impl Fn(f64) -> f64, a: f64, b: f64, tol: f64) -> f64 {
    let fa = f(a);
    let fb = f(b);
    let m = 0.5 * (a + b);
    let fm = f(m);
    let whole = simpson(a, b, fa, fm, fb);
    adaptive(f, a, b, fa, fm, fb, whole, tol, 48)
}

fn simpson(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn adaptive(
    f: &impl Fn(f64) -> f64,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tol: f64,
    depth: u32,
) -> f64 {
    let m = 0.5 * (a + b);
    let lm = 0.5 * (a + m);
    let rm = 0.5 * (m + b);
    let flm = f(lm);
    let frm = f(rm);
    let left = simpson(a, m, fa, flm, fm);
    let right = simpson(m, b, fm, frm, fb);
    let delta = left + right - whole;
    if depth == 0 || delta.abs() <= 15.0 * tol {
        left + right + delta / 15.0
    } else {
        adaptive(f, a, m, fa, flm, fm, left, tol / 2.0, depth - 1)
            + adaptive(f, m, b, fm, frm, fb, right, tol / 2.0, depth - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_integrate_sine() {
        let value = integrate(&|x: f64| x.sin(), 0.0, PI, 1e-10);
        assert!((value - 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_integrate_gaussian_area() {
        // 归一化 Gaussian 在 ±6σ 上的积分接近 1
        let sigma = 0.1_f64;
        let norm = 1.0 / (sigma * (2.0 * PI).sqrt());
        let f = |x: f64| norm * (-x * x / (2.0 * sigma * sigma)).exp();
        let value = integrate(&f, -0.6, 0.6, 1e-10);
        assert!((value - 1.0).abs() < 1e-6);
    }
}
