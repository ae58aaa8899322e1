//! # 结构文件解析模块
//!
//! 读取晶体结构文件。目前支持 VASP POSCAR/CONTCAR。
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `models/structure.rs`

pub mod poscar;

use crate::error::Result;
use crate::models::Crystal;
use std::path::Path;

/// 根据文件名解析结构文件
pub fn parse_structure_file(path: &Path) -> Result<Crystal> {
    poscar::parse_poscar_file(path)
}
