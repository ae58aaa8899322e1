//! # 数据模型模块
//!
//! 晶体结构与对称性表示。
//!
//! ## 依赖关系
//! - 被 `parsers/` 和 `xrd/` 使用

pub mod structure;
pub mod symmetry;

pub use structure::{move_into_cell, Atom, Basis, Crystal, Lattice};
pub use symmetry::{Generator, Orbit, SpecialPosition, Symmetry, SymmetryOperation};
