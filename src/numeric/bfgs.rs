//! # 箱式约束拟牛顿最小化
//!
//! BFGS 逆 Hessian 近似 + 梯度投影 + 可伸缩回溯线搜索。梯度用
//! 中心差分数值计算。初始与重置的逆 Hessian 采用 Shanno 标度
//! γ = sᵀy/yᵀy，参数量纲相差多个数量级时仍能取到有效步长。
//! 精修驱动器以此求解各阶段的 R 因子最小化问题。
//!
//! ## 依赖关系
//! - 被 `xrd/refine.rs` 使用
//! - 使用 `nalgebra` 的动态矩阵

use nalgebra::{DMatrix, DVector};

/// 最小化设置
#[derive(Debug, Clone)]
pub struct BfgsOptions {
    /// 目标函数改变量终止阈值
    pub objective_delta: f64,
    /// 最大迭代次数
    pub max_iterations: usize,
    /// 数值梯度步长（按 1 + |x| 缩放）
    pub gradient_step: f64,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        BfgsOptions {
            objective_delta: 1e-12,
            max_iterations: 100,
            gradient_step: 1e-6,
        }
    }
}

/// 在箱 [lower, upper] 内最小化 f，x 就地更新，返回最终函数值。
pub fn minimize_box_constrained(
    f: &mut impl FnMut(&[f64]) -> f64,
    x: &mut [f64],
    lower: &[f64],
    upper: &[f64],
    options: &BfgsOptions,
) -> f64 {
    let n = x.len();
    if n == 0 {
        return f(x);
    }
    clamp_into_box(x, lower, upper);

    let mut hessian_inv = DMatrix::<f64>::identity(n, n);
    let mut first_update = true;
    let mut fx = f(x);
    let mut grad = numerical_gradient(f, x, lower, upper, options.gradient_step);

    for _ in 0..options.max_iterations {
        let direction = -(&hessian_inv * &grad);

        // 线搜索（投影步）：首步可行则倍增扩张，否则回溯
        let mut trial_at = |alpha: f64, out: &mut [f64]| -> f64 {
            for i in 0..n {
                out[i] = (x[i] + alpha * direction[i]).clamp(lower[i], upper[i]);
            }
            f(out)
        };
        let mut alpha = 1.0;
        let mut x_new = vec![0.0; n];
        let mut fx_new = trial_at(alpha, &mut x_new);
        let mut improved = fx_new < fx;
        if improved {
            let mut probe = vec![0.0; n];
            for _ in 0..60 {
                let trial = trial_at(alpha * 2.0, &mut probe);
                if trial < fx_new {
                    alpha *= 2.0;
                    fx_new = trial;
                    x_new.copy_from_slice(&probe);
                } else {
                    break;
                }
            }
        } else {
            for _ in 0..80 {
                alpha *= 0.5;
                let trial = trial_at(alpha, &mut x_new);
                if trial < fx {
                    fx_new = trial;
                    improved = true;
                    break;
                }
            }
        }
        if !improved {
            break;
        }

        let grad_new = numerical_gradient(f, &x_new, lower, upper, options.gradient_step);

        // BFGS 更新；首次更新前按 Shanno 标度初始化逆 Hessian，
        // 曲率条件不满足时重置
        let s = DVector::from_iterator(n, x_new.iter().zip(x.iter()).map(|(a, b)| a - b));
        let y = &grad_new - &grad;
        let sy = s.dot(&y);
        let yy = y.dot(&y);
        if sy > 1e-12 {
            if first_update {
                let gamma = if yy > 0.0 { sy / yy } else { 1.0 };
                hessian_inv = DMatrix::identity(n, n) * gamma;
                first_update = false;
            }
            let rho = 1.0 / sy;
            let identity = DMatrix::<f64>::identity(n, n);
            let left = &identity - rho * (&s * y.transpose());
            let right = &identity - rho * (&y * s.transpose());
            hessian_inv = &left * hessian_inv * &right + rho * (&s * s.transpose());
        } else {
            let gamma = if yy > 0.0 && sy > 0.0 { sy / yy } else { 1.0 };
            hessian_inv = DMatrix::identity(n, n) * gamma;
            first_update = true;
        }

        let delta = fx - fx_new;
        x.copy_from_slice(&x_new);
        fx = fx_new;
        grad = grad_new;

        if delta < options.objective_delta {
            break;
        }
    }
    fx
}

/// 中心差分梯度；差分点同样被约束在箱内（边界处退化为单侧差分）
fn numerical_gradient(
    f: &mut impl FnMut(&[f64]) -> f64,
    x: &[f64],
    lower: &[f64],
    upper: &[f64],
    step: f64,
) -> DVector<f64> {
    let n = x.len();
    let mut grad = DVector::zeros(n);
    let mut probe = x.to_vec();
    for i in 0..n {
        let h = step * (1.0 + x[i].abs());
        let hi = (x[i] + h).min(upper[i]);
        let lo = (x[i] - h).max(lower[i]);
        if hi <= lo {
            grad[i] = 0.0;
            continue;
        }
        probe[i] = hi;
        let f_hi = f(&probe);
        probe[i] = lo;
        let f_lo = f(&probe);
        probe[i] = x[i];
        grad[i] = (f_hi - f_lo) / (hi - lo);
    }
    grad
}

fn clamp_into_box(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for i in 0..x.len() {
        x[i] = x[i].clamp(lower[i], upper[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimize_quadratic_unconstrained() {
        let mut f = |x: &[f64]| (x[0] - 2.0).powi(2) + 3.0 * (x[1] + 1.0).powi(2);
        let mut x = [0.0, 0.0];
        let value = minimize_box_constrained(
            &mut f,
            &mut x,
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &BfgsOptions::default(),
        );
        assert!((x[0] - 2.0).abs() < 1e-5);
        assert!((x[1] + 1.0).abs() < 1e-5);
        assert!(value < 1e-9);
    }

    #[test]
    fn test_minimum_on_boundary() {
        // 无约束最小值在 x = -3，箱将解压到下界 0
        let mut f = |x: &[f64]| (x[0] + 3.0).powi(2);
        let mut x = [5.0];
        minimize_box_constrained(&mut f, &mut x, &[0.0], &[10.0], &BfgsOptions::default());
        assert!(x[0].abs() < 1e-8);
    }

    #[test]
    fn test_rosenbrock_in_box() {
        let mut f = |x: &[f64]| {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            a * a + 100.0 * b * b
        };
        let mut x = [-1.2, 1.0];
        let options = BfgsOptions {
            max_iterations: 2000,
            ..Default::default()
        };
        minimize_box_constrained(&mut f, &mut x, &[-5.0, -5.0], &[5.0, 5.0], &options);
        assert!((x[0] - 1.0).abs() < 1e-3);
        assert!((x[1] - 1.0).abs() < 1e-3);
    }
}
