//! # 空间群对称性模型
//!
//! 提供衍射引擎消费的对称性描述：对称操作（旋转 + 平移列表）、
//! 原子轨道（等价原子集、生成元、特殊位置投影）以及基矢对称化。
//!
//! 旋转矩阵作用于分数坐标。轨道由调用方提供的操作集在结构上构造。
//!
//! ## 依赖关系
//! - 被 `xrd/pattern.rs` 和 `xrd/refine.rs` 使用
//! - 使用 `models/structure.rs` 的 Crystal
//! - 使用 `nalgebra` 进行矩阵运算

use crate::error::{PowderError, Result};
use crate::models::structure::{move_into_cell, Crystal};
use nalgebra::{Matrix3, Vector3};

/// 位置等价判断容差（分数坐标）
const POSITION_TOL: f64 = 1e-4;

/// 一个空间群对称操作：旋转部分与其全部平移部分（含心平移）
#[derive(Debug, Clone)]
pub struct SymmetryOperation {
    pub rotation: Matrix3<f64>,
    pub translations: Vec<Vector3<f64>>,
}

impl SymmetryOperation {
    pub fn new(rotation: Matrix3<f64>, translations: Vec<Vector3<f64>>) -> Self {
        SymmetryOperation {
            rotation,
            translations,
        }
    }

    pub fn identity() -> Self {
        SymmetryOperation {
            rotation: Matrix3::identity(),
            translations: vec![Vector3::zeros()],
        }
    }
}

/// 将轨道代表原子映射到某个等价原子的生成元
#[derive(Debug, Clone)]
pub struct Generator {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// 特殊位置投影：p ← R·(p − t) + t
#[derive(Debug, Clone)]
pub struct SpecialPosition {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl SpecialPosition {
    /// 将坐标投影到该位置的不变子空间
    pub fn project(&self, p: Vector3<f64>) -> Vector3<f64> {
        self.rotation * (p - self.translation) + self.translation
    }
}

/// 一组对称等价原子
#[derive(Debug, Clone)]
pub struct Orbit {
    /// 轨道内原子在 Crystal::atoms 中的下标，第一个为代表原子
    pub atoms: Vec<usize>,
    /// 与 atoms 一一对应的生成元（代表原子的生成元为恒等）
    pub generators: Vec<Generator>,
    /// 代表原子的特殊位置投影
    pub special_position: SpecialPosition,
}

/// 结构的对称性描述
#[derive(Debug, Clone)]
pub struct Symmetry {
    operations: Vec<SymmetryOperation>,
    orbits: Vec<Orbit>,
}

impl Symmetry {
    /// 平庸对称性（P1）：仅恒等操作，每个原子自成轨道
    pub fn p1(crystal: &Crystal) -> Self {
        let orbits = crystal
            .atoms
            .iter()
            .enumerate()
            .map(|(i, atom)| Orbit {
                atoms: vec![i],
                generators: vec![Generator {
                    rotation: Matrix3::identity(),
                    translation: Vector3::zeros(),
                }],
                special_position: SpecialPosition {
                    rotation: Matrix3::identity(),
                    translation: atom.fractional(),
                },
            })
            .collect();
        Symmetry {
            operations: vec![SymmetryOperation::identity()],
            orbits,
        }
    }

    /// 由给定操作集在结构上构造轨道。操作集应包含恒等操作。
    ///
    /// 每个尚未归属的原子作为新轨道的代表；对每个操作与平移生成像点，
    /// 与结构中同元素原子按容差匹配。首个将代表映射到某原子的 (R, t)
    /// 记为该原子的生成元。代表原子的位置对称群平均给出特殊位置投影。
    pub fn from_operations(crystal: &Crystal, operations: Vec<SymmetryOperation>) -> Result<Self> {
        let n = crystal.atoms.len();
        let mut assigned = vec![false; n];
        let mut orbits = Vec::new();

        for rep in 0..n {
            if assigned[rep] {
                continue;
            }
            let p0 = crystal.atoms[rep].fractional();
            let mut atoms = vec![rep];
            let mut generators = vec![Generator {
                rotation: Matrix3::identity(),
                translation: Vector3::zeros(),
            }];
            assigned[rep] = true;

            let mut site_rotations = Vec::new();
            for op in &operations {
                for t in &op.translations {
                    let mut q = op.rotation * p0 + t;
                    move_into_cell(&mut q);

                    if same_site(&q, &p0) {
                        site_rotations.push(op.rotation);
                    }

                    for (j, atom) in crystal.atoms.iter().enumerate() {
                        if assigned[j] || atom.element != crystal.atoms[rep].element {
                            continue;
                        }
                        if same_site(&q, &atom.fractional()) {
                            assigned[j] = true;
                            atoms.push(j);
                            generators.push(Generator {
                                rotation: op.rotation,
                                translation: *t,
                            });
                        }
                    }
                }
            }

            if site_rotations.is_empty() {
                return Err(PowderError::Other(format!(
                    "symmetry operations do not include the identity for atom {}",
                    rep
                )));
            }

            // 位置对称群的平均旋转给出到不变子空间的投影
            let mut avg = Matrix3::zeros();
            for r in &site_rotations {
                avg += r;
            }
            avg /= site_rotations.len() as f64;

            orbits.push(Orbit {
                atoms,
                generators,
                special_position: SpecialPosition {
                    rotation: avg,
                    translation: p0,
                },
            });
        }

        Ok(Symmetry { operations, orbits })
    }

    pub fn operations(&self) -> &[SymmetryOperation] {
        &self.operations
    }

    pub fn orbits(&self) -> &[Orbit] {
        &self.orbits
    }

    /// 对称操作沿旋转轴的本征平移分量：(1/n) Σ R^k·t，n 为旋转阶数
    pub fn intrinsic_translation(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Vector3<f64> {
        let mut sum = *translation;
        let mut power = *rotation;
        let mut order = 1;
        while !is_identity(&power) && order < 12 {
            sum += power * translation;
            power *= rotation;
            order += 1;
        }
        sum / order as f64
    }

    /// 将候选基矢矩阵投影到空间群约束上（度规张量对操作平均）
    pub fn refine_basis(&self, matrix: &Matrix3<f64>) -> Matrix3<f64> {
        let metric = matrix * matrix.transpose();
        let mut averaged = Matrix3::zeros();
        for op in &self.operations {
            averaged += op.rotation * metric * op.rotation.transpose();
        }
        averaged /= self.operations.len() as f64;

        let a = averaged[(0, 0)].sqrt();
        let b = averaged[(1, 1)].sqrt();
        let c = averaged[(2, 2)].sqrt();
        let alpha = (averaged[(1, 2)] / (b * c)).clamp(-1.0, 1.0).acos().to_degrees();
        let beta = (averaged[(0, 2)] / (a * c)).clamp(-1.0, 1.0).acos().to_degrees();
        let gamma = (averaged[(0, 1)] / (a * b)).clamp(-1.0, 1.0).acos().to_degrees();
        crate::models::structure::Basis::vectors_from_parameters([a, b, c], [alpha, beta, gamma])
    }
}

/// 分数坐标按最短像距离比较（跨胞边界折回）
fn same_site(p: &Vector3<f64>, q: &Vector3<f64>) -> bool {
    for i in 0..3 {
        let mut d = (p[i] - q[i]).abs();
        d -= d.round();
        if d.abs() > POSITION_TOL {
            return false;
        }
    }
    true
}

fn is_identity(m: &Matrix3<f64>) -> bool {
    let mut max = 0.0_f64;
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            max = max.max((m[(i, j)] - expected).abs());
        }
    }
    max < 1e-8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::structure::{Atom, Basis, Lattice};

    /// m-3m 点群的 48 个旋转：全部带符号置换矩阵
    pub fn cubic_point_group() -> Vec<SymmetryOperation> {
        let perms = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut ops = Vec::with_capacity(48);
        for perm in perms {
            for signs in 0..8 {
                let mut m = Matrix3::zeros();
                for (row, &col) in perm.iter().enumerate() {
                    let sign = if (signs >> row) & 1 == 1 { -1.0 } else { 1.0 };
                    m[(row, col)] = sign;
                }
                ops.push(SymmetryOperation::new(m, vec![Vector3::zeros()]));
            }
        }
        ops
    }

    fn fcc_aluminium() -> Crystal {
        let lattice = Lattice::from_parameters(4.0495, 4.0495, 4.0495, 90.0, 90.0, 90.0);
        let basis = Basis::new(lattice).unwrap();
        let atoms = vec![
            Atom::new("Al", 13, [0.0, 0.0, 0.0]),
            Atom::new("Al", 13, [0.5, 0.5, 0.0]),
            Atom::new("Al", 13, [0.5, 0.0, 0.5]),
            Atom::new("Al", 13, [0.0, 0.5, 0.5]),
        ];
        Crystal::new("Al", basis, atoms)
    }

    #[test]
    fn test_p1_orbits() {
        let crystal = fcc_aluminium();
        let sym = Symmetry::p1(&crystal);
        assert_eq!(sym.orbits().len(), 4);
        assert_eq!(sym.operations().len(), 1);
        for orbit in sym.orbits() {
            assert_eq!(orbit.atoms.len(), 1);
        }
    }

    #[test]
    fn test_orbit_construction_fcc() {
        let crystal = fcc_aluminium();
        let sym = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        // 点群操作下角原子自成轨道，三个面心原子互相置换
        assert_eq!(sym.orbits().len(), 2);
        assert_eq!(sym.orbits()[0].atoms.len(), 1);
        assert_eq!(sym.orbits()[1].atoms.len(), 3);
        assert_eq!(sym.orbits()[1].generators.len(), 3);
    }

    #[test]
    fn test_intrinsic_translation_screw() {
        // 2₁ 螺旋轴：R = diag(-1,-1,1)，t = (0,0,1/2)，本征平移为 t 本身
        let rotation = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0));
        let t = Vector3::new(0.25, 0.0, 0.5);
        let intrinsic = Symmetry::intrinsic_translation(&rotation, &t);
        assert!(intrinsic[0].abs() < 1e-12);
        assert!(intrinsic[1].abs() < 1e-12);
        assert!((intrinsic[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_refine_basis_projects_to_cubic() {
        let crystal = fcc_aluminium();
        let sym = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        // 轻微破坏立方对称的矩阵应被投影回立方
        let distorted = Basis::vectors_from_parameters([4.05, 4.06, 4.04], [90.2, 89.9, 90.1]);
        let refined = sym.refine_basis(&distorted);
        let lattice = Lattice::from_vectors([
            [refined[(0, 0)], refined[(0, 1)], refined[(0, 2)]],
            [refined[(1, 0)], refined[(1, 1)], refined[(1, 2)]],
            [refined[(2, 0)], refined[(2, 1)], refined[(2, 2)]],
        ]);
        let (a, b, c, alpha, beta, gamma) = lattice.parameters();
        assert!((a - b).abs() < 1e-9);
        assert!((b - c).abs() < 1e-9);
        assert!((alpha - 90.0).abs() < 1e-9);
        assert!((beta - 90.0).abs() < 1e-9);
        assert!((gamma - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_special_position_projection() {
        let crystal = fcc_aluminium();
        let sym = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        // 角原子 (0,0,0) 的位置对称群为全点群，投影应将任何扰动压回原点
        let sp = &sym.orbits()[0].special_position;
        let projected = sp.project(Vector3::new(0.003, -0.001, 0.002));
        assert!(projected.norm() < 1e-12);
    }
}
