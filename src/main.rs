//! # qpowder 命令行入口
//!
//! ## 子命令
//! - `calc`    - 计算理论衍射图样（峰位或连续谱；支持批量目录）
//! - `process` - 实验谱处理：平滑、扣本底、定峰、拟合、积分
//! - `refine`  - 积分强度或全谱（Rietveld）结构精修

use clap::Parser;
use qpowder::cli::Cli;
use qpowder::{commands, utils};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
