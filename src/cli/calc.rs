//! # calc 子命令 CLI 定义
//!
//! 从结构文件计算粉末衍射图样的参数。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/calc.rs`

use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// 输出格式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// XY 数据文件（标准衍射数据交换格式）
    Xy,
    /// CSV 数据文件（2θ, intensity, hkl, multiplicity）
    Csv,
    /// PNG 图像
    Png,
    /// SVG 矢量图像
    Svg,
}

/// calc 子命令参数
#[derive(Args, Debug)]
pub struct CalcArgs {
    /// Input: structure file (POSCAR) or directory containing structure files
    pub input: PathBuf,

    /// Output: file path (single mode) or directory (batch mode)
    #[arg(short, long, default_value = "pattern.xy")]
    pub output: PathBuf,

    /// Output format (auto-detected from extension if not specified)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// X-ray wavelength: radiation source name (cu-ka, mo-ka, ...) or value in Å
    #[arg(short, long, default_value = "cu-ka")]
    pub wavelength: String,

    /// 2θ range in degrees (e.g., "10-100")
    #[arg(short, long, default_value = "10-100")]
    pub range: String,

    /// Step size for continuous output (degrees 2θ)
    #[arg(long, default_value_t = 0.02)]
    pub step: f64,

    /// Emit the continuous broadened profile instead of peak positions
    #[arg(long, default_value_t = false)]
    pub continuous: bool,

    /// Caglioti U broadening term
    #[arg(long, default_value_t = 0.0)]
    pub u: f64,

    /// Caglioti V broadening term
    #[arg(long, default_value_t = 0.0)]
    pub v: f64,

    /// Caglioti W broadening term
    #[arg(long, default_value_t = 0.3)]
    pub w: f64,

    /// Pseudo-Voigt mixing parameter η0
    #[arg(long, default_value_t = 0.5)]
    pub eta0: f64,

    /// Skip thermal factors (simple intensity calculation)
    #[arg(long, default_value_t = false)]
    pub simple: bool,

    /// Number of top peaks to list in the terminal table
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Figure width in pixels (PNG) or points (SVG)
    #[arg(long, default_value_t = 1200)]
    pub width: u32,

    /// Figure height in pixels (PNG) or points (SVG)
    #[arg(long, default_value_t = 800)]
    pub height: u32,

    /// Title for the plot (default: structure name)
    #[arg(long)]
    pub title: Option<String>,

    // ─────────────────────────────────────────────────────────────
    // 批量处理参数
    // ─────────────────────────────────────────────────────────────
    /// File patterns for batch mode (comma separated, e.g., "POSCAR*,*.vasp")
    #[arg(long, default_value = "POSCAR*,*.vasp,CONTCAR*")]
    pub pattern: String,

    /// Number of parallel jobs (0 = auto, batch mode only)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Recurse into subdirectories (batch mode)
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Overwrite existing output files
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}
