//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `calc`: 从结构文件计算粉末衍射图样（支持批量目录）
//! - `process`: 处理实验衍射数据，提取积分峰
//! - `refine`: 对实验图样精修结构模型
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: calc, process, refine

pub mod calc;
pub mod process;
pub mod refine;

use clap::{Parser, Subcommand};

/// qpowder - 粉末 X 射线衍射引擎
#[derive(Parser)]
#[command(name = "qpowder")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Powder X-ray diffraction: pattern calculation, peak extraction and refinement", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Calculate a powder diffraction pattern from a structure file
    Calc(calc::CalcArgs),

    /// Process an experimental pattern and extract integrated peak intensities
    Process(process::ProcessArgs),

    /// Refine a structural model against an experimental pattern
    Refine(refine::RefineArgs),
}

/// 预定义辐射源波长 (Å)
pub fn get_predefined_wavelength(name: &str) -> Option<f64> {
    match name.to_lowercase().as_str() {
        "cu-ka" | "cuka" => Some(1.5418),
        "cu-ka1" | "cuka1" => Some(1.5406),
        "cu-ka2" | "cuka2" => Some(1.5444),
        "cu-kb1" | "cukb1" => Some(1.3922),
        "mo-ka" | "moka" => Some(0.7107),
        "mo-ka1" | "moka1" => Some(0.7093),
        "co-ka" | "coka" => Some(1.7903),
        "fe-ka" | "feka" => Some(1.9373),
        "cr-ka" | "crka" => Some(2.2910),
        "ag-ka" | "agka" => Some(0.5609),
        _ => None,
    }
}

/// 解析波长输入（辐射源名称或数值）
pub fn parse_wavelength(input: &str) -> Result<f64, String> {
    if let Some(wl) = get_predefined_wavelength(input) {
        return Ok(wl);
    }
    input.parse::<f64>().map_err(|_| {
        format!(
            "Invalid wavelength '{}'. Use a number (e.g., 1.5406) or a name: cu-ka, mo-ka, co-ka, fe-ka, cr-ka, ag-ka",
            input
        )
    })
}

/// 解析 2θ 范围（如 "10-100"）
pub fn parse_range(range: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid range format: {}", range));
    }
    let min: f64 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid range format: {}", range))?;
    let max: f64 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid range format: {}", range))?;
    if min < 0.0 || max <= min || max > 180.0 {
        return Err(format!("{} (must be 0 <= min < max <= 180)", range));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_wavelengths() {
        assert!((parse_wavelength("cu-ka").unwrap() - 1.5418).abs() < 1e-9);
        assert!((parse_wavelength("MoKa").unwrap() - 0.7107).abs() < 1e-9);
        assert!((parse_wavelength("0.7093").unwrap() - 0.7093).abs() < 1e-9);
        assert!(parse_wavelength("xx-ka").is_err());
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(parse_range("10-100").unwrap(), (10.0, 100.0));
        assert!(parse_range("100-10").is_err());
        assert!(parse_range("abc").is_err());
    }
}
