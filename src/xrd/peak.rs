//! # 衍射峰实体
//!
//! 实测峰记录与计算反射记录。反射在晶格变化时重算峰位与 Lorentz
//! 因子，在原子参数变化时重算结构因子平方。
//!
//! ## 依赖关系
//! - 被 `xrd/pattern.rs`、`xrd/experimental.rs`、`xrd/rfactor.rs` 使用
//! - 使用 `xrd/scattering.rs` 的散射因子参数
//! - 使用 `models/` 的 Crystal 与 Symmetry

use crate::models::{Basis, Crystal, Symmetry};
use crate::xrd::scattering::ScatteringFactorParams;
use nalgebra::Vector3;
use std::f64::consts::PI;

/// 衍射强度计算方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadiationMethod {
    /// X 射线（含热振动因子）
    #[default]
    Xray,
    /// 简化计算：不含热振动因子
    Simple,
}

/// 实测衍射峰：峰位与积分强度，一经建立不再修改
#[derive(Debug, Clone)]
pub struct MeasuredPeak {
    pub two_theta_deg: f64,
    pub two_theta_rad: f64,
    pub intensity: f64,
    /// 参考图样中匹配峰的下标；None 表示未匹配
    pub pattern_index: Option<usize>,
}

impl MeasuredPeak {
    pub fn new(two_theta_deg: f64, intensity: f64) -> Self {
        MeasuredPeak {
            two_theta_deg,
            two_theta_rad: two_theta_deg.to_radians(),
            intensity,
            pattern_index: None,
        }
    }
}

/// 计算反射：一族对称等价 hkl 产生的一个衍射峰
#[derive(Debug, Clone)]
pub struct Reflection {
    /// 代表该峰的晶面指数（惯用胞）
    pub hkl: Vector3<f64>,
    /// 全部等价晶面指数
    pub equiv_hkl: Vec<Vector3<f64>>,
    /// 等价晶面对应的倒格矢
    pub recip_vectors: Vec<Vector3<f64>>,
    /// 多重性因子
    pub multiplicity: usize,
    pub two_theta_rad: f64,
    pub two_theta_deg: f64,
    /// Lorentz 极化因子
    pub lp_factor: f64,
    /// 积分强度（不含标度因子，输出时再乘）
    pub intensity: f64,
    /// 参考图样中匹配峰的下标
    pub pattern_index: Option<usize>,
}

impl Reflection {
    pub fn new(basis: &Basis, wavelength: f64, hkl: Vector3<f64>, equiv_hkl: Vec<Vector3<f64>>) -> Self {
        let mut reflection = Reflection {
            hkl,
            multiplicity: equiv_hkl.len(),
            equiv_hkl,
            recip_vectors: Vec::new(),
            two_theta_rad: 0.0,
            two_theta_deg: 0.0,
            lp_factor: 0.0,
            intensity: 0.0,
            pattern_index: None,
        };
        reflection.update_position(basis, wavelength);
        reflection
    }

    /// 给定基矢与晶面指数求衍射半角 θ（弧度）。
    /// 当 |B⁻¹·hkl|·λ/2 超出 [-1, 1] 时钳制到 ±π/2。
    pub fn diffraction_angle(basis: &Basis, hkl: &Vector3<f64>, wavelength: f64) -> f64 {
        let arg = (basis.inverse() * hkl).norm() * wavelength / 2.0;
        if (-1.0..=1.0).contains(&arg) {
            arg.asin()
        } else if arg < -1.0 {
            -PI / 2.0
        } else {
            PI / 2.0
        }
    }

    /// 晶格变化后更新峰位及全部派生量
    pub fn update_position(&mut self, basis: &Basis, wavelength: f64) {
        self.two_theta_rad = 2.0 * Self::diffraction_angle(basis, &self.hkl, wavelength);
        self.two_theta_deg = self.two_theta_rad.to_degrees();
        self.lp_factor = lp_factor(self.two_theta_rad / 2.0);
        self.recip_vectors.clear();
        self.recip_vectors.reserve(self.equiv_hkl.len());
        for hkl in &self.equiv_hkl {
            self.recip_vectors.push(basis.inverse() * hkl);
        }
    }

    /// 原子参数变化后更新积分强度：|F|²·LP·多重性·织构因子。
    /// 标度因子在输出时才乘入。
    #[allow(clippy::too_many_arguments)]
    pub fn update_intensity(
        &mut self,
        method: RadiationMethod,
        wavelength: f64,
        crystal: &Crystal,
        symmetry: &Symmetry,
        b_factors: &[f64],
        atf_params: &[ScatteringFactorParams],
        preferred_orientation: &Vector3<f64>,
        texturing_strength: f64,
    ) {
        self.intensity = structure_factor_squared(
            method,
            wavelength,
            crystal,
            symmetry,
            self.two_theta_rad / 2.0,
            &self.hkl,
            b_factors,
            atf_params,
        );
        self.intensity *= self.lp_factor;
        self.intensity *= self.multiplicity as f64;
        self.intensity *= texturing_factor(
            preferred_orientation,
            texturing_strength,
            &self.recip_vectors,
        );
    }

    /// 展示用的晶面指数：等价指数中取分量最小且尽量非负者
    pub fn representative_hkl(&self) -> Vector3<f64> {
        let mut chosen = self.equiv_hkl[0];
        for possible in self.equiv_hkl.iter().skip(1) {
            for d in 0..3 {
                if chosen[d] < 0.0 && possible[d] >= 0.0 {
                    chosen = *possible;
                    break;
                } else if chosen[d].abs() > possible[d].abs() {
                    chosen = *possible;
                    break;
                }
            }
        }
        chosen
    }

    pub fn as_measured(&self) -> MeasuredPeak {
        MeasuredPeak {
            two_theta_deg: self.two_theta_deg,
            two_theta_rad: self.two_theta_rad,
            intensity: self.intensity,
            pattern_index: self.pattern_index,
        }
    }
}

/// Lorentz 极化因子：(1 + cos²2θ) / (cosθ·sin²θ)
pub fn lp_factor(angle: f64) -> f64 {
    (1.0 + (2.0 * angle).cos().powi(2)) / (angle.cos() * angle.sin().powi(2))
}

/// 各向同性热振动因子：exp(−B·(sinθ/λ)²)
pub fn thermal_factor(angle: f64, wavelength: f64, b_factor: f64) -> f64 {
    (-b_factor * (angle.sin() / wavelength).powi(2)).exp()
}

/// March–Dollase 织构因子。
/// T = (1/N)·Σᵢ (τ²·cos²φᵢ + sin²φᵢ/τ)^(−3/2)，cosφᵢ 为织构方向与
/// 各等价倒格矢的夹角余弦。
pub fn texturing_factor(
    preferred_orientation: &Vector3<f64>,
    tau: f64,
    recip_vectors: &[Vector3<f64>],
) -> f64 {
    let pre_norm = preferred_orientation.norm();
    let mut output = 0.0;
    for r in recip_vectors {
        let mut cos_phi = preferred_orientation.dot(r) / pre_norm / r.norm();
        cos_phi *= cos_phi;
        output += (tau * tau * cos_phi + (1.0 - cos_phi) / tau).powf(-1.5);
    }
    output / recip_vectors.len() as f64
}

/// 全胞结构因子平方：对每个轨道与其全部等价原子求和后取模方。
/// `Simple` 方法下不乘热振动因子。
#[allow(clippy::too_many_arguments)]
pub fn structure_factor_squared(
    method: RadiationMethod,
    wavelength: f64,
    crystal: &Crystal,
    symmetry: &Symmetry,
    angle: f64,
    hkl: &Vector3<f64>,
    b_factors: &[f64],
    atf_params: &[ScatteringFactorParams],
) -> f64 {
    let s = angle.sin() / wavelength;
    let mut real = 0.0;
    let mut imag = 0.0;
    for (i, orbit) in symmetry.orbits().iter().enumerate() {
        let scattering = atf_params[i].calculate(s);
        let thermal = match method {
            RadiationMethod::Simple => 1.0,
            RadiationMethod::Xray => thermal_factor(angle, wavelength, b_factors[i]),
        };
        for &atom_index in &orbit.atoms {
            let atom = &crystal.atoms[atom_index];
            let dot = 2.0 * PI * hkl.dot(&atom.fractional());
            let pre = scattering * thermal * atom.occupancy;
            real += pre * dot.cos();
            imag += pre * dot.sin();
        }
    }
    real * real + imag * imag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lp_factor_value() {
        // θ = 30°: cos2θ = 0.5, cosθ = √3/2, sin²θ = 0.25
        let theta = 30.0_f64.to_radians();
        let expected = (1.0 + 0.25) / ((3.0_f64.sqrt() / 2.0) * 0.25);
        assert!((lp_factor(theta) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_thermal_factor_limits() {
        assert!((thermal_factor(0.0, 1.5418, 1.0) - 1.0).abs() < 1e-12);
        let theta = 45.0_f64.to_radians();
        assert!(thermal_factor(theta, 1.5418, 2.0) < thermal_factor(theta, 1.5418, 0.5));
    }

    #[test]
    fn test_texturing_factor_unity_without_texture() {
        // τ = 1 时 March–Dollase 函数恒等于 1
        let pref = Vector3::new(1.0, 0.0, 0.0);
        let recips = vec![
            Vector3::new(0.2, 0.0, 0.0),
            Vector3::new(0.0, 0.2, 0.0),
            Vector3::new(0.1, 0.1, 0.1),
        ];
        let t = texturing_factor(&pref, 1.0, &recips);
        assert!((t - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_representative_hkl_prefers_positive() {
        use crate::models::{Basis, Lattice};
        let basis = Basis::new(Lattice::from_parameters(4.0, 4.0, 4.0, 90.0, 90.0, 90.0)).unwrap();
        let equiv = vec![
            Vector3::new(-1.0, -1.0, -1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(-1.0, 1.0, 1.0),
        ];
        let reflection = Reflection::new(&basis, 1.5418, equiv[0], equiv);
        let rep = reflection.representative_hkl();
        assert!(rep[0] > 0.0 && rep[1] > 0.0 && rep[2] > 0.0);
    }
}
