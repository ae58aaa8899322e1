//! # process 子命令实现
//!
//! 读入实验衍射数据，运行处理管线并报告积分峰。
//!
//! ## 依赖关系
//! - 使用 `cli/process.rs` 定义的 ProcessArgs
//! - 使用 `xrd/experimental.rs` 的处理管线

use crate::cli::parse_wavelength;
use crate::cli::process::ProcessArgs;
use crate::error::{PowderError, Result};
use crate::utils::output;
use crate::xrd::{export, DiffractionData, ExperimentalPattern};

/// 执行 process 命令
pub fn execute(args: ProcessArgs) -> Result<()> {
    output::print_header("Experimental Pattern Processing");
    output::print_info(&format!("Reading '{}'", args.input.display()));

    let mut pattern = ExperimentalPattern::from_file(&args.input)?;
    if let Some(wavelength) = &args.wavelength {
        let value = parse_wavelength(wavelength).map_err(PowderError::InvalidArgument)?;
        pattern.set_wavelength(value);
    }

    if pattern.has_continuous_data() {
        output::print_info(&format!(
            "Raw pattern with {} measurements, 2θ ∈ [{:.2}°, {:.2}°]",
            pattern.measurement_angles()?.len(),
            pattern.min_two_theta(),
            pattern.max_two_theta()
        ));
    } else {
        output::print_info("Pre-integrated pattern (peak list)");
    }

    let peaks = pattern.diffraction_peaks();
    if peaks.is_empty() {
        output::print_warning("No diffraction peaks could be extracted from this pattern");
        return Ok(());
    }
    output::print_success(&format!("Extracted {} peaks", peaks.len()));
    print_peak_table(peaks);

    if let Some(output_path) = &args.output {
        export::peaks_to_xy(peaks, pattern.wavelength(), 1.0, "processed", output_path)?;
        output::print_success(&format!("Peaks saved to '{}'", output_path.display()));
    }
    Ok(())
}

fn print_peak_table(peaks: &[crate::xrd::MeasuredPeak]) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct PeakRow {
        #[tabled(rename = "2θ (°)")]
        two_theta: String,
        #[tabled(rename = "Integrated I")]
        intensity: String,
    }

    let rows: Vec<PeakRow> = peaks
        .iter()
        .map(|p| PeakRow {
            two_theta: format!("{:.3}", p.two_theta_deg),
            intensity: format!("{:.2}", p.intensity),
        })
        .collect();
    println!("{}", Table::new(&rows));
}
