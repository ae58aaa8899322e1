//! # 晶体结构数据模型
//!
//! 定义统一的晶体结构表示：晶格、基矢（含倒易/约化胞变换缓存）、原子与晶体。
//!
//! ## 依赖关系
//! - 被 `parsers/` 和 `xrd/` 使用
//! - 使用 `nalgebra` 进行 3×3 矩阵运算

use crate::error::{PowderError, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// 晶格参数表示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lattice {
    /// 晶格向量矩阵 (3x3)，行向量表示 a, b, c
    /// [[a1, a2, a3], [b1, b2, b3], [c1, c2, c3]]
    pub matrix: [[f64; 3]; 3],
}

impl Lattice {
    /// 从晶格参数 (a, b, c, alpha, beta, gamma) 创建晶格
    /// 角度单位：度
    pub fn from_parameters(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        let alpha_rad = alpha.to_radians();
        let beta_rad = beta.to_radians();
        let gamma_rad = gamma.to_radians();

        let cos_alpha = alpha_rad.cos();
        let cos_beta = beta_rad.cos();
        let cos_gamma = gamma_rad.cos();
        let sin_gamma = gamma_rad.sin();

        let a_vec = [a, 0.0, 0.0];
        let b_vec = [b * cos_gamma, b * sin_gamma, 0.0];

        let c1 = c * cos_beta;
        let c2 = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let c3 = (c * c - c1 * c1 - c2 * c2).sqrt();
        let c_vec = [c1, c2, c3];

        Lattice {
            matrix: [a_vec, b_vec, c_vec],
        }
    }

    /// 从晶格向量矩阵创建
    pub fn from_vectors(matrix: [[f64; 3]; 3]) -> Self {
        Lattice { matrix }
    }

    /// 获取晶格参数 (a, b, c, alpha, beta, gamma)
    pub fn parameters(&self) -> (f64, f64, f64, f64, f64, f64) {
        let a_vec = self.matrix[0];
        let b_vec = self.matrix[1];
        let c_vec = self.matrix[2];

        let a = (a_vec[0].powi(2) + a_vec[1].powi(2) + a_vec[2].powi(2)).sqrt();
        let b = (b_vec[0].powi(2) + b_vec[1].powi(2) + b_vec[2].powi(2)).sqrt();
        let c = (c_vec[0].powi(2) + c_vec[1].powi(2) + c_vec[2].powi(2)).sqrt();

        let dot_bc: f64 = b_vec.iter().zip(c_vec.iter()).map(|(x, y)| x * y).sum();
        let dot_ac: f64 = a_vec.iter().zip(c_vec.iter()).map(|(x, y)| x * y).sum();
        let dot_ab: f64 = a_vec.iter().zip(b_vec.iter()).map(|(x, y)| x * y).sum();

        let alpha = (dot_bc / (b * c)).acos().to_degrees();
        let beta = (dot_ac / (a * c)).acos().to_degrees();
        let gamma = (dot_ab / (a * b)).acos().to_degrees();

        (a, b, c, alpha, beta, gamma)
    }

    /// 计算晶格体积
    pub fn volume(&self) -> f64 {
        let a = self.matrix[0];
        let b = self.matrix[1];
        let c = self.matrix[2];

        a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
            + a[2] * (b[0] * c[1] - b[1] * c[0])
    }
}

/// 基矢对象：晶格矩阵及其派生量（逆矩阵、约化胞变换）的缓存。
///
/// 约化胞变换 `unit_to_reduced` / `unit_point_to_reduced` 由调用方提供；
/// 当输入晶格本身即为约化胞（常规惯用胞场合）时为单位矩阵。
#[derive(Debug, Clone)]
pub struct Basis {
    lattice: Lattice,
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
    unit_to_reduced: Matrix3<f64>,
    unit_point_to_reduced: Matrix3<f64>,
    reduced_inverse: Matrix3<f64>,
    lengths: [f64; 3],
    angles: [f64; 3],
}

impl Basis {
    /// 从晶格创建基矢对象（约化胞变换取单位矩阵）
    pub fn new(lattice: Lattice) -> Result<Self> {
        Self::with_reduced_transform(lattice, Matrix3::identity(), Matrix3::identity())
    }

    /// 从晶格与调用方提供的约化胞变换创建
    pub fn with_reduced_transform(
        lattice: Lattice,
        unit_to_reduced: Matrix3<f64>,
        unit_point_to_reduced: Matrix3<f64>,
    ) -> Result<Self> {
        let matrix = to_matrix3(&lattice.matrix);
        let inverse = matrix.try_inverse().ok_or(PowderError::SingularLattice)?;
        let reduced = unit_to_reduced * matrix;
        let reduced_inverse = reduced.try_inverse().ok_or(PowderError::SingularLattice)?;
        let (a, b, c, alpha, beta, gamma) = lattice.parameters();
        Ok(Basis {
            lattice,
            matrix,
            inverse,
            unit_to_reduced,
            unit_point_to_reduced,
            reduced_inverse,
            lengths: [a, b, c],
            angles: [alpha, beta, gamma],
        })
    }

    /// 替换晶格矩阵并重建所有派生量。原子的分数坐标保持不变。
    pub fn set(&mut self, matrix: Matrix3<f64>) -> Result<()> {
        let lattice = Lattice::from_vectors(from_matrix3(&matrix));
        *self = Self::with_reduced_transform(
            lattice,
            self.unit_to_reduced,
            self.unit_point_to_reduced,
        )?;
        Ok(())
    }

    /// 由长度与角度（度）构造晶格矩阵（行向量约定）
    pub fn vectors_from_parameters(lengths: [f64; 3], angles: [f64; 3]) -> Matrix3<f64> {
        let lattice = Lattice::from_parameters(
            lengths[0], lengths[1], lengths[2], angles[0], angles[1], angles[2],
        );
        to_matrix3(&lattice.matrix)
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    pub fn unit_to_reduced(&self) -> &Matrix3<f64> {
        &self.unit_to_reduced
    }

    pub fn unit_point_to_reduced(&self) -> &Matrix3<f64> {
        &self.unit_point_to_reduced
    }

    pub fn reduced_inverse(&self) -> &Matrix3<f64> {
        &self.reduced_inverse
    }

    pub fn lengths(&self) -> [f64; 3] {
        self.lengths
    }

    pub fn angles(&self) -> [f64; 3] {
        self.angles
    }

    pub fn volume(&self) -> f64 {
        self.lattice.volume()
    }
}

/// 将分数坐标折回 [0, 1)³
pub fn move_into_cell(p: &mut Vector3<f64>) {
    for i in 0..3 {
        p[i] -= p[i].floor();
        // 极接近 1 的值经 floor 舍入后可能仍为 1
        if p[i] >= 1.0 {
            p[i] -= 1.0;
        }
    }
}

fn to_matrix3(m: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    )
}

fn from_matrix3(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// 原子信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号
    pub element: String,

    /// 原子序数 Z
    pub number: u32,

    /// 分数坐标 [x, y, z]
    pub position: [f64; 3],

    /// 占据度（默认 1.0）
    pub occupancy: f64,
}

impl Atom {
    pub fn new(element: impl Into<String>, number: u32, position: [f64; 3]) -> Self {
        Atom {
            element: element.into(),
            number,
            position,
            occupancy: 1.0,
        }
    }

    pub fn with_occupancy(mut self, occupancy: f64) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn fractional(&self) -> Vector3<f64> {
        Vector3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn set_fractional(&mut self, p: Vector3<f64>) {
        self.position = [p[0], p[1], p[2]];
    }
}

/// 晶体结构
#[derive(Debug, Clone)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 基矢
    pub basis: Basis,

    /// 原子列表（分数坐标）
    pub atoms: Vec<Atom>,
}

impl Crystal {
    pub fn new(name: impl Into<String>, basis: Basis, atoms: Vec<Atom>) -> Self {
        Crystal {
            name: name.into(),
            basis,
            atoms,
        }
    }

    /// 计算化学式
    pub fn formula(&self) -> String {
        use std::collections::BTreeMap;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .map(|(el, count)| {
                if count == 1 {
                    el.to_string()
                } else {
                    format!("{}{}", el, count)
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_from_parameters_cubic() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        let (a, b, c, alpha, beta, gamma) = lattice.parameters();

        assert!((a - 5.0).abs() < 1e-6);
        assert!((b - 5.0).abs() < 1e-6);
        assert!((c - 5.0).abs() < 1e-6);
        assert!((alpha - 90.0).abs() < 1e-6);
        assert!((beta - 90.0).abs() < 1e-6);
        assert!((gamma - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_lattice_volume_cubic() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        let vol = lattice.volume().abs();

        // 5^3 = 125
        assert!((vol - 125.0).abs() < 1e-6);
    }

    #[test]
    fn test_lattice_hexagonal() {
        let lattice = Lattice::from_parameters(3.0, 3.0, 5.0, 90.0, 90.0, 120.0);
        let (a, b, c, _, _, gamma) = lattice.parameters();

        assert!((a - 3.0).abs() < 0.01);
        assert!((b - 3.0).abs() < 0.01);
        assert!((c - 5.0).abs() < 0.01);
        assert!((gamma - 120.0).abs() < 0.01);
    }

    #[test]
    fn test_basis_inverse() {
        let lattice = Lattice::from_parameters(4.0, 4.0, 4.0, 90.0, 90.0, 90.0);
        let basis = Basis::new(lattice).unwrap();
        let product = basis.matrix() * basis.inverse();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product[(i, j)] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_basis_singular_lattice_rejected() {
        let lattice = Lattice::from_vectors([[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(Basis::new(lattice).is_err());
    }

    #[test]
    fn test_basis_set_rebuilds_parameters() {
        let lattice = Lattice::from_parameters(4.0, 4.0, 4.0, 90.0, 90.0, 90.0);
        let mut basis = Basis::new(lattice).unwrap();
        let new = Basis::vectors_from_parameters([4.2, 4.2, 4.2], [90.0, 90.0, 90.0]);
        basis.set(new).unwrap();
        let lengths = basis.lengths();
        assert!((lengths[0] - 4.2).abs() < 1e-9);
        assert!((basis.volume().abs() - 4.2f64.powi(3)).abs() < 1e-6);
    }

    #[test]
    fn test_move_into_cell() {
        let mut p = Vector3::new(1.25, -0.25, 3.0);
        move_into_cell(&mut p);
        assert!((p[0] - 0.25).abs() < 1e-12);
        assert!((p[1] - 0.75).abs() < 1e-12);
        assert!(p[2].abs() < 1e-12);
    }

    #[test]
    fn test_crystal_formula() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        let basis = Basis::new(lattice).unwrap();
        let atoms = vec![
            Atom::new("Na", 11, [0.0, 0.0, 0.0]),
            Atom::new("Na", 11, [0.5, 0.5, 0.0]),
            Atom::new("Cl", 17, [0.5, 0.0, 0.0]),
            Atom::new("Cl", 17, [0.0, 0.5, 0.0]),
        ];
        let crystal = Crystal::new("NaCl", basis, atoms);

        let formula = crystal.formula();
        assert!(formula.contains("Cl"));
        assert!(formula.contains("Na"));
    }
}
