//! # refine 子命令 CLI 定义
//!
//! 结构精修参数。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/refine.rs`

use clap::Args;
use std::path::PathBuf;

/// refine 子命令参数
#[derive(Args, Debug)]
pub struct RefineArgs {
    /// Structure file with the initial model (POSCAR)
    pub structure: PathBuf,

    /// Experimental reference pattern file
    pub pattern: PathBuf,

    /// Full-profile (Rietveld) refinement; default is integrated intensities
    #[arg(long, default_value_t = false)]
    pub rietveld: bool,

    /// Do not refine atomic positions
    #[arg(long, default_value_t = false)]
    pub skip_positions: bool,

    /// Do not refine isotropic thermal (B) factors
    #[arg(long, default_value_t = false)]
    pub skip_bfactors: bool,

    /// Maximum fractional change of lattice parameters (<= 0 keeps the lattice fixed)
    #[arg(long, default_value_t = 0.05)]
    pub max_lat_change: f64,

    /// Number of background parameters
    #[arg(long, default_value_t = 5)]
    pub num_background: usize,

    /// Use a plain polynomial background instead of Chebyshev
    #[arg(long, default_value_t = false)]
    pub polynomial_background: bool,

    /// Skip thermal factors in the structure factor (simple intensities)
    #[arg(long, default_value_t = false)]
    pub simple: bool,

    /// Write the refined calculated profile to this XY file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write an observed-vs-calculated comparison plot (PNG/SVG by extension)
    #[arg(long)]
    pub plot: Option<PathBuf>,
}
