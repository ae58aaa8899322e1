//! # qpowder - 粉末 X 射线衍射引擎
//!
//! 由晶体结构与空间群对称性计算粉末衍射图样、处理实验衍射数据、
//! 并以积分强度或全谱（Rietveld）方式精修结构模型。
//!
//! ## 模块结构
//! ```text
//! lib.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   ├── models/     (晶体结构与对称性)
//!   ├── xrd/        (衍射引擎：峰位、峰形、R 因子、精修)
//!   ├── parsers/    (结构文件解析)
//!   ├── numeric/    (BFGS、LM、数值积分)
//!   ├── batch.rs    (批量并行处理)
//!   ├── utils/      (输出工具)
//!   └── error.rs    (错误处理)
//! ```
//!
//! ## 基本用法
//! ```no_run
//! use qpowder::models::Symmetry;
//! use qpowder::parsers;
//! use qpowder::xrd::CalculatedPattern;
//!
//! let crystal = parsers::parse_structure_file(std::path::Path::new("POSCAR"))?;
//! let symmetry = Symmetry::p1(&crystal);
//! let mut pattern = CalculatedPattern::new();
//! pattern.calculate(&crystal, &symmetry, None, false, false)?;
//! for reflection in pattern.reflections() {
//!     println!("{:8.3} {:12.2}", reflection.two_theta_deg, reflection.intensity);
//! }
//! # Ok::<(), qpowder::error::PowderError>(())
//! ```

pub mod batch;
pub mod cli;
pub mod commands;
pub mod error;
pub mod models;
pub mod numeric;
pub mod parsers;
pub mod utils;
pub mod xrd;

pub use error::{PowderError, Result};
