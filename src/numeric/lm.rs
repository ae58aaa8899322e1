//! # Levenberg–Marquardt 非线性最小二乘
//!
//! 以解析 Jacobian 拟合曲线模型（Gaussian、伪 Voigt 及其复合形式）。
//! 标准阻尼正规方程实现：(JᵀJ + λ·diag(JᵀJ))·δ = Jᵀr。
//!
//! ## 依赖关系
//! - 被 `xrd/experimental.rs` 的峰拟合调用
//! - 使用 `nalgebra` 求解正规方程

use nalgebra::{DMatrix, DVector};

/// 可拟合的曲线模型：参数个数、函数值与对参数的偏导
pub trait CurveModel {
    fn arity(&self) -> usize;
    fn value(&self, params: &[f64], x: f64) -> f64;
    fn gradient(&self, params: &[f64], x: f64, out: &mut [f64]);
}

/// LM 拟合。返回优化后的参数；数据不足或数值失败时返回初值。
pub fn fit(
    model: &impl CurveModel,
    points: &[(f64, f64)],
    initial: &[f64],
    tol: f64,
) -> Vec<f64> {
    let n = model.arity();
    assert_eq!(initial.len(), n);
    if points.len() < n {
        return initial.to_vec();
    }

    let mut params = initial.to_vec();
    let mut cost = residual_cost(model, points, &params);
    let mut lambda = 1e-3;
    let mut grad = vec![0.0; n];

    for _ in 0..200 {
        // 组装正规方程
        let mut jtj = DMatrix::<f64>::zeros(n, n);
        let mut jtr = DVector::<f64>::zeros(n);
        for &(x, y) in points {
            let r = y - model.value(&params, x);
            model.gradient(&params, x, &mut grad);
            for i in 0..n {
                jtr[i] += grad[i] * r;
                for j in 0..n {
                    jtj[(i, j)] += grad[i] * grad[j];
                }
            }
        }

        // 阻尼求解，失败或不降则放大 λ
        let mut accepted = false;
        for _ in 0..10 {
            let mut damped = jtj.clone();
            for i in 0..n {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let delta = match damped.lu().solve(&jtr) {
                Some(d) => d,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };
            let trial: Vec<f64> = params.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
            if trial.iter().any(|v| !v.is_finite()) {
                lambda *= 10.0;
                continue;
            }
            let trial_cost = residual_cost(model, points, &trial);
            if trial_cost.is_finite() && trial_cost < cost {
                let improvement = cost - trial_cost;
                params = trial;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                if improvement < tol * cost.max(tol) {
                    return params;
                }
                break;
            }
            lambda *= 10.0;
        }
        if !accepted {
            break;
        }
    }
    params
}

fn residual_cost(model: &impl CurveModel, points: &[(f64, f64)], params: &[f64]) -> f64 {
    points
        .iter()
        .map(|&(x, y)| {
            let r = y - model.value(params, x);
            r * r
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exponential;

    impl CurveModel for Exponential {
        fn arity(&self) -> usize {
            2
        }
        fn value(&self, p: &[f64], x: f64) -> f64 {
            p[0] * (-p[1] * x).exp()
        }
        fn gradient(&self, p: &[f64], x: f64, out: &mut [f64]) {
            let e = (-p[1] * x).exp();
            out[0] = e;
            out[1] = -p[0] * x * e;
        }
    }

    #[test]
    fn test_fit_exponential_decay() {
        let truth = [2.5, 0.7];
        let points: Vec<(f64, f64)> = (0..50)
            .map(|i| {
                let x = i as f64 * 0.1;
                (x, truth[0] * (-truth[1] * x).exp())
            })
            .collect();
        let fitted = fit(&Exponential, &points, &[1.0, 1.0], 1e-12);
        assert!((fitted[0] - truth[0]).abs() < 1e-6);
        assert!((fitted[1] - truth[1]).abs() < 1e-6);
    }

    #[test]
    fn test_fit_underdetermined_returns_initial() {
        let points = [(0.0, 1.0)];
        let fitted = fit(&Exponential, &points, &[1.0, 1.0], 1e-8);
        assert_eq!(fitted, vec![1.0, 1.0]);
    }
}
