//! # 命令执行逻辑
//!
//! 把 CLI 参数分发到各命令实现。
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 使用 `cli/` 的参数定义

pub mod calc;
pub mod process;
pub mod refine;

use crate::cli::Commands;
use crate::error::Result;

/// 执行选定的子命令
pub fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Calc(args) => calc::execute(args),
        Commands::Process(args) => process::execute(args),
        Commands::Refine(args) => refine::execute(args),
    }
}
