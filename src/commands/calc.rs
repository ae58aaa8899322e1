//! # calc 子命令实现
//!
//! 从结构文件计算粉末衍射图样。
//!
//! ## 功能
//! - 单文件与批量目录处理（rayon 并行）
//! - 峰位列表或连续展宽谱输出
//! - 输出 XY / CSV 数据或 PNG / SVG 图像
//!
//! ## 依赖关系
//! - 使用 `cli/calc.rs` 定义的 CalcArgs
//! - 使用 `batch.rs` 进行批量处理
//! - 使用 `xrd/` 模块进行计算
//! - 使用 `parsers/` 读取结构

use crate::batch::{self, ProcessResult};
use crate::cli::calc::{CalcArgs, OutputFormat};
use crate::cli::{parse_range, parse_wavelength};
use crate::error::{PowderError, Result};
use crate::models::{Crystal, Symmetry};
use crate::parsers;
use crate::utils::output;
use crate::xrd::peak::RadiationMethod;
use crate::xrd::{export, plot, CalculatedPattern};

use std::fs;
use std::path::{Path, PathBuf};

/// 执行 calc 命令
pub fn execute(args: CalcArgs) -> Result<()> {
    output::print_header("Powder Diffraction Pattern Calculation");

    if args.input.is_file() {
        execute_single(&args)
    } else if args.input.is_dir() {
        execute_batch(&args)
    } else {
        Err(PowderError::FileNotFound {
            path: args.input.display().to_string(),
        })
    }
}

fn execute_single(args: &CalcArgs) -> Result<()> {
    output::print_info(&format!("Single file mode: '{}'", args.input.display()));

    let crystal = parsers::parse_structure_file(&args.input)?;
    output::print_success(&format!(
        "Loaded structure: {} ({}, {} atoms)",
        crystal.name,
        crystal.formula(),
        crystal.atoms.len()
    ));

    let wavelength = parse_wavelength(&args.wavelength).map_err(PowderError::InvalidArgument)?;
    let (theta_min, theta_max) = parse_range(&args.range).map_err(PowderError::InvalidRange)?;
    output::print_info(&format!(
        "Wavelength {:.4} Å, 2θ range {:.1}° - {:.1}°",
        wavelength, theta_min, theta_max
    ));

    let pattern = calculate_pattern(&crystal, args, wavelength, theta_min, theta_max)?;
    output::print_success(&format!(
        "Generated {} reflections",
        pattern.reflections().len()
    ));

    write_output(&pattern, &crystal, args, &args.output)?;
    print_peak_table(&pattern, args.top_n);
    output::print_success(&format!("Pattern saved to '{}'", args.output.display()));
    Ok(())
}

fn execute_batch(args: &CalcArgs) -> Result<()> {
    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));

    let files = batch::collect_files(&args.input, &args.pattern, args.recursive);
    if files.is_empty() {
        output::print_warning(&format!(
            "No matching files found with pattern '{}'",
            args.pattern
        ));
        return Ok(());
    }
    output::print_info(&format!("Found {} structure files", files.len()));

    fs::create_dir_all(&args.output).map_err(|e| PowderError::FileWriteError {
        path: args.output.display().to_string(),
        source: e,
    })?;

    let wavelength = parse_wavelength(&args.wavelength).map_err(PowderError::InvalidArgument)?;
    let (theta_min, theta_max) = parse_range(&args.range).map_err(PowderError::InvalidRange)?;

    let summary = batch::run_parallel(files, args.jobs, |file| {
        process_batch_file(file, args, wavelength, theta_min, theta_max)
    });

    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {} success, {} skipped, {} failed",
        summary.success, summary.skipped, summary.failed
    ));
    if !summary.failures.is_empty() {
        output::print_warning("Failed files:");
        for (path, error) in summary.failures.iter().take(10) {
            output::print_error(&format!("  {}: {}", path, error));
        }
        if summary.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", summary.failures.len() - 10));
        }
    }
    Ok(())
}

fn process_batch_file(
    input: &PathBuf,
    args: &CalcArgs,
    wavelength: f64,
    theta_min: f64,
    theta_max: f64,
) -> ProcessResult {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = match output_format(args, &args.output) {
        OutputFormat::Xy => "xy",
        OutputFormat::Csv => "csv",
        OutputFormat::Png => "png",
        OutputFormat::Svg => "svg",
    };
    let output_file = args.output.join(format!("{}_pattern.{}", stem, extension));

    if output_file.exists() && !args.overwrite {
        return ProcessResult::Skipped(format!("Output exists, skipping: {}", output_file.display()));
    }

    let crystal = match parsers::parse_structure_file(input) {
        Ok(c) => c,
        Err(e) => return ProcessResult::Failed(input.display().to_string(), e.to_string()),
    };
    let pattern = match calculate_pattern(&crystal, args, wavelength, theta_min, theta_max) {
        Ok(p) => p,
        Err(e) => return ProcessResult::Failed(input.display().to_string(), e.to_string()),
    };
    match write_output(&pattern, &crystal, args, &output_file) {
        Ok(_) => ProcessResult::Success(format!("{} -> {}", input.display(), output_file.display())),
        Err(e) => ProcessResult::Failed(input.display().to_string(), e.to_string()),
    }
}

/// 以 P1 对称性（不做对称约化）计算衍射图样
fn calculate_pattern(
    crystal: &Crystal,
    args: &CalcArgs,
    wavelength: f64,
    theta_min: f64,
    theta_max: f64,
) -> Result<CalculatedPattern> {
    let symmetry = Symmetry::p1(crystal);
    let mut pattern = CalculatedPattern::new();
    pattern.set_wavelength(wavelength);
    pattern.set_range(theta_min, theta_max);
    pattern.set_resolution(args.step);
    pattern.set_peak_broadening(args.u, args.v, args.w);
    pattern.set_peak_shape(args.eta0, 0.0, 0.0);
    if args.simple {
        pattern.set_method(RadiationMethod::Simple);
    }
    pattern.calculate(crystal, &symmetry, None, false, false)?;
    Ok(pattern)
}

fn output_format(args: &CalcArgs, path: &Path) -> OutputFormat {
    args.format.unwrap_or_else(|| {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("csv") => OutputFormat::Csv,
            Some("png") => OutputFormat::Png,
            Some("svg") => OutputFormat::Svg,
            _ => OutputFormat::Xy,
        }
    })
}

fn write_output(
    pattern: &CalculatedPattern,
    crystal: &Crystal,
    args: &CalcArgs,
    output_path: &Path,
) -> Result<()> {
    let title = args.title.clone().unwrap_or_else(|| crystal.name.clone());
    let scale = pattern.optimal_scale();
    let wavelength = pattern.wavelength();
    let format = output_format(args, output_path);

    match format {
        OutputFormat::Xy => {
            if args.continuous {
                let angles = pattern.pattern_angles();
                let intensities = pattern.intensity_at(&angles);
                export::profile_to_xy(&angles, &intensities, wavelength, scale, &title, output_path)
            } else {
                export::peaks_to_xy(
                    &pattern.combined_peaks(),
                    wavelength,
                    scale,
                    &title,
                    output_path,
                )
            }
        }
        OutputFormat::Csv => {
            if args.continuous {
                let angles = pattern.pattern_angles();
                let intensities: Vec<f64> = pattern
                    .intensity_at(&angles)
                    .into_iter()
                    .map(|i| i * scale)
                    .collect();
                export::profile_to_csv(&angles, &intensities, output_path)
            } else {
                export::reflections_to_csv(pattern, output_path)
            }
        }
        OutputFormat::Png | OutputFormat::Svg => {
            let angles = pattern.pattern_angles();
            let data: Vec<(f64, f64)> = angles
                .iter()
                .zip(pattern.intensity_at(&angles))
                .map(|(&t, i)| (t, i * scale))
                .collect();
            plot::profile_plot(
                &data,
                output_path,
                &title,
                wavelength,
                args.width,
                args.height,
                format == OutputFormat::Svg,
            )
        }
    }
}

/// 打印最强峰表格
fn print_peak_table(pattern: &CalculatedPattern, count: usize) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct PeakRow {
        #[tabled(rename = "2θ (°)")]
        two_theta: String,
        #[tabled(rename = "I (scaled)")]
        intensity: String,
        #[tabled(rename = "(hkl)")]
        hkl: String,
        #[tabled(rename = "mult")]
        multiplicity: String,
    }

    let scale = pattern.optimal_scale();
    let mut reflections: Vec<_> = pattern.reflections().iter().collect();
    reflections.sort_by(|a, b| b.intensity.partial_cmp(&a.intensity).unwrap());

    let rows: Vec<PeakRow> = reflections
        .iter()
        .take(count)
        .map(|r| {
            let hkl = r.representative_hkl();
            PeakRow {
                two_theta: format!("{:.3}", r.two_theta_deg),
                intensity: format!("{:.1}", r.intensity * scale),
                hkl: format!("({:.0} {:.0} {:.0})", hkl[0], hkl[1], hkl[2]),
                multiplicity: r.multiplicity.to_string(),
            }
        })
        .collect();

    if !rows.is_empty() {
        output::print_header(&format!("Top {} Diffraction Peaks", rows.len()));
        let table = Table::new(&rows);
        println!("{}", table);
    }
}
