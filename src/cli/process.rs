//! # process 子命令 CLI 定义
//!
//! 实验衍射数据处理参数。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/process.rs`

use clap::Args;
use std::path::PathBuf;

/// process 子命令参数
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Input: experimental diffraction data file (2theta / intensity columns)
    pub input: PathBuf,

    /// Write extracted integrated peaks to this XY file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the wavelength from the data file (name or Å value)
    #[arg(short, long)]
    pub wavelength: Option<String>,
}
