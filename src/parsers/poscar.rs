//! # VASP POSCAR 格式解析器
//!
//! 解析 VASP POSCAR/CONTCAR 文件，作为衍射计算的结构输入。
//!
//! ## POSCAR 格式说明
//! ```text
//! Comment line (structure name)
//! 1.0                    # scaling factor
//! a1 a2 a3               # lattice vector a
//! b1 b2 b3               # lattice vector b
//! c1 c2 c3               # lattice vector c
//! Element1 Element2 ...  # element symbols (VASP 5+)
//! n1 n2 ...              # number of atoms per element
//! Selective dynamics     # optional
//! Direct/Cartesian       # coordinate type
//! x1 y1 z1               # atom positions
//! ...
//! ```
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/structure.rs`
//! - 使用 `xrd/scattering.rs` 将元素符号映射到原子序数

use crate::error::{PowderError, Result};
use crate::models::{Atom, Basis, Crystal, Lattice};
use crate::xrd::scattering;
use nalgebra::{Matrix3, Vector3};
use std::fs;
use std::path::Path;

/// 解析 POSCAR/CONTCAR 文件
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    let content = fs::read_to_string(path).map_err(|e| PowderError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_poscar_content(
        &content,
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown"),
    )
}

/// 从字符串内容解析 POSCAR 格式
pub fn parse_poscar_content(content: &str, default_name: &str) -> Result<Crystal> {
    let lines: Vec<&str> = content.lines().collect();

    let parse_error = |reason: &str| PowderError::ParseError {
        format: "poscar".to_string(),
        path: default_name.to_string(),
        reason: reason.to_string(),
    };

    if lines.len() < 8 {
        return Err(parse_error("File too short"));
    }

    // Line 0: 注释/名称
    let name = lines[0].trim();
    let name = if name.is_empty() { default_name } else { name };

    // Line 1: 比例因子
    let scale: f64 = lines[1].trim().parse().unwrap_or(1.0);

    // Lines 2-4: 晶格向量
    let mut matrix = [[0.0; 3]; 3];
    for (i, row) in matrix.iter_mut().enumerate() {
        let parts: Vec<f64> = lines[2 + i]
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 3 {
            return Err(parse_error(&format!("Invalid lattice vector at line {}", 3 + i)));
        }
        *row = [parts[0] * scale, parts[1] * scale, parts[2] * scale];
    }
    let lattice = Lattice::from_vectors(matrix);

    // Line 5: 元素符号行 (VASP 5+)；VASP 4 无此行，不支持
    let symbols: Vec<&str> = lines[5].split_whitespace().collect();
    if symbols.is_empty() || symbols[0].parse::<i32>().is_ok() {
        return Err(parse_error(
            "Element symbol line is required (VASP 5+ format)",
        ));
    }
    let counts: Vec<usize> = lines[6]
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect();
    if counts.len() != symbols.len() {
        return Err(parse_error("Element and count lines do not agree"));
    }

    // 可选的 Selective dynamics 行
    let mut coord_line = 7;
    if lines.len() > coord_line
        && lines[coord_line]
            .trim()
            .to_lowercase()
            .starts_with("selective")
    {
        coord_line += 1;
    }

    if lines.len() <= coord_line {
        return Err(parse_error("Missing coordinate type line"));
    }
    let coord_type = lines[coord_line].trim().to_lowercase();
    let is_cartesian = coord_type.starts_with('c') || coord_type.starts_with('k');

    // 原子位置
    let mut atoms = Vec::new();
    let mut line_index = coord_line + 1;
    for (symbol, &count) in symbols.iter().zip(counts.iter()) {
        let number = scattering::atomic_number(symbol)?;
        for _ in 0..count {
            if line_index >= lines.len() {
                return Err(parse_error("Fewer atom lines than declared counts"));
            }
            let parts: Vec<f64> = lines[line_index]
                .split_whitespace()
                .take(3)
                .filter_map(|s| s.parse().ok())
                .collect();
            if parts.len() < 3 {
                return Err(parse_error(&format!(
                    "Invalid atom position at line {}",
                    line_index + 1
                )));
            }
            let position = if is_cartesian {
                cart_to_frac([parts[0], parts[1], parts[2]], &lattice)?
            } else {
                [parts[0], parts[1], parts[2]]
            };
            atoms.push(Atom::new(symbol.to_string(), number, position));
            line_index += 1;
        }
    }

    let basis = Basis::new(lattice)?;
    Ok(Crystal::new(name, basis, atoms))
}

/// 笛卡尔坐标 → 分数坐标
fn cart_to_frac(cart: [f64; 3], lattice: &Lattice) -> Result<[f64; 3]> {
    let m = &lattice.matrix;
    let matrix = Matrix3::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    );
    let inverse = matrix
        .try_inverse()
        .ok_or(PowderError::SingularLattice)?;
    // 行向量约定：frac = cart · M⁻¹，等价于 (M⁻¹)ᵀ · cart
    let frac = inverse.transpose() * Vector3::new(cart[0], cart[1], cart[2]);
    Ok([frac[0], frac[1], frac[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALUMINIUM: &str = "\
fcc Al
1.0
4.0495 0.0 0.0
0.0 4.0495 0.0
0.0 0.0 4.0495
Al
4
Direct
0.0 0.0 0.0
0.5 0.5 0.0
0.5 0.0 0.5
0.0 0.5 0.5
";

    #[test]
    fn test_parse_direct_coordinates() {
        let crystal = parse_poscar_content(ALUMINIUM, "POSCAR").unwrap();
        assert_eq!(crystal.name, "fcc Al");
        assert_eq!(crystal.atoms.len(), 4);
        assert_eq!(crystal.atoms[0].number, 13);
        let (a, _, _, alpha, _, _) = crystal.basis.lattice().parameters();
        assert!((a - 4.0495).abs() < 1e-9);
        assert!((alpha - 90.0).abs() < 1e-9);
        assert!((crystal.atoms[1].position[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_cartesian_coordinates() {
        let text = "\
NaCl corner
1.0
5.64 0.0 0.0
0.0 5.64 0.0
0.0 0.0 5.64
Na Cl
1 1
Cartesian
0.0 0.0 0.0
2.82 2.82 2.82
";
        let crystal = parse_poscar_content(text, "POSCAR").unwrap();
        assert_eq!(crystal.atoms.len(), 2);
        assert!((crystal.atoms[1].position[0] - 0.5).abs() < 1e-9);
        assert_eq!(crystal.atoms[1].number, 17);
    }

    #[test]
    fn test_scaling_factor_applies() {
        let text = ALUMINIUM.replace("1.0\n", "2.0\n");
        let crystal = parse_poscar_content(&text, "POSCAR").unwrap();
        let (a, _, _, _, _, _) = crystal.basis.lattice().parameters();
        assert!((a - 8.099).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_element_is_error() {
        let text = ALUMINIUM.replace("Al\n", "Zz\n");
        assert!(parse_poscar_content(&text, "POSCAR").is_err());
    }

    #[test]
    fn test_short_file_is_error() {
        assert!(parse_poscar_content("too\nshort\n", "POSCAR").is_err());
    }
}
