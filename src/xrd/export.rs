//! # 衍射数据导出
//!
//! 把峰位或连续谱写为 XY / CSV 文件。
//!
//! ## 支持格式
//! - XY: 标准衍射数据交换格式，带 `wavelength` 头行，可被
//!   `ExperimentalPattern::from_text` 原样读回
//! - CSV: 峰位完整数据（2θ, d, 强度, hkl, 多重性）或连续谱两列
//!
//! 峰位输出时丢弃标度后强度低于 1 的峰。
//!
//! ## 依赖关系
//! - 被 `commands/` 调用
//! - 使用 `csv` 库写入 CSV 文件
//! - 使用 `xrd/pattern.rs` 与 `xrd/peak.rs`

use crate::error::{PowderError, Result};
use crate::xrd::peak::MeasuredPeak;
use crate::xrd::pattern::CalculatedPattern;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn write_error(path: &Path, e: std::io::Error) -> PowderError {
    PowderError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    }
}

/// 峰位导出为 XY 格式：`wavelength` 头行 + (2θ, 强度·标度) 数据行
pub fn peaks_to_xy(
    peaks: &[MeasuredPeak],
    wavelength: f64,
    scale: f64,
    title: &str,
    output_path: &Path,
) -> Result<()> {
    let mut file = File::create(output_path).map_err(|e| write_error(output_path, e))?;

    writeln!(file, "# Diffraction pattern: {}", title).map_err(|e| write_error(output_path, e))?;
    writeln!(file, "# Columns: 2theta (degrees), integrated intensity")
        .map_err(|e| write_error(output_path, e))?;
    writeln!(file, "wavelength {:.6}", wavelength).map_err(|e| write_error(output_path, e))?;

    for peak in peaks {
        let intensity = peak.intensity * scale;
        if intensity < 1.0 {
            continue;
        }
        writeln!(file, "{:10.4} {:15.6}", peak.two_theta_deg, intensity)
            .map_err(|e| write_error(output_path, e))?;
    }
    Ok(())
}

/// 连续谱导出为 XY 格式
pub fn profile_to_xy(
    two_theta: &[f64],
    intensity: &[f64],
    wavelength: f64,
    scale: f64,
    title: &str,
    output_path: &Path,
) -> Result<()> {
    let mut file = File::create(output_path).map_err(|e| write_error(output_path, e))?;

    writeln!(file, "# Diffraction pattern: {} (continuous)", title)
        .map_err(|e| write_error(output_path, e))?;
    writeln!(file, "# Columns: 2theta (degrees), intensity")
        .map_err(|e| write_error(output_path, e))?;
    writeln!(file, "wavelength {:.6}", wavelength).map_err(|e| write_error(output_path, e))?;

    for (t, i) in two_theta.iter().zip(intensity) {
        writeln!(file, "{:10.4} {:15.6e}", t, i * scale).map_err(|e| write_error(output_path, e))?;
    }
    Ok(())
}

/// 计算图样的反射列表导出为 CSV（含 hkl 与多重性）
pub fn reflections_to_csv(pattern: &CalculatedPattern, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path).map_err(PowderError::CsvError)?;

    wtr.write_record(["2theta", "intensity", "h", "k", "l", "multiplicity"])
        .map_err(PowderError::CsvError)?;

    let scale = pattern.optimal_scale();
    for reflection in pattern.reflections() {
        let hkl = reflection.representative_hkl();
        wtr.write_record(&[
            format!("{:.4}", reflection.two_theta_deg),
            format!("{:.4}", reflection.intensity * scale),
            format!("{:.0}", hkl[0]),
            format!("{:.0}", hkl[1]),
            format!("{:.0}", hkl[2]),
            reflection.multiplicity.to_string(),
        ])
        .map_err(PowderError::CsvError)?;
    }

    wtr.flush().map_err(|e| write_error(output_path, e))?;
    Ok(())
}

/// 连续谱导出为 CSV
pub fn profile_to_csv(two_theta: &[f64], intensity: &[f64], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path).map_err(PowderError::CsvError)?;

    wtr.write_record(["2theta", "intensity"])
        .map_err(PowderError::CsvError)?;

    for (t, i) in two_theta.iter().zip(intensity) {
        wtr.write_record(&[format!("{:.4}", t), format!("{:.6}", i)])
            .map_err(PowderError::CsvError)?;
    }

    wtr.flush().map_err(|e| write_error(output_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::experimental::ExperimentalPattern;
    use crate::xrd::DiffractionData;

    #[test]
    fn test_xy_round_trip_preserves_fields() {
        let peaks = vec![
            MeasuredPeak::new(30.1234, 1000.0),
            MeasuredPeak::new(45.5, 450.25),
            MeasuredPeak::new(55.02, 760.5),
        ];
        let dir = std::env::temp_dir();
        let path = dir.join("qpowder_roundtrip_test.xy");
        peaks_to_xy(&peaks, 1.5418, 1.0, "test", &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(ExperimentalPattern::is_format(&content));
        let read_back = ExperimentalPattern::from_text(&content).unwrap();
        assert!((read_back.wavelength() - 1.5418).abs() < 1e-6);

        let recovered = read_back.diffraction_peaks();
        assert_eq!(recovered.len(), peaks.len());
        for (original, parsed) in peaks.iter().zip(recovered) {
            assert!((original.two_theta_deg - parsed.two_theta_deg).abs() < 1e-4);
            assert!((original.intensity - parsed.intensity).abs() < 1e-4);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_weak_scaled_peaks_are_dropped() {
        let peaks = vec![
            MeasuredPeak::new(30.0, 100.0),
            MeasuredPeak::new(45.0, 0.5),
        ];
        let dir = std::env::temp_dir();
        let path = dir.join("qpowder_weak_peak_test.xy");
        peaks_to_xy(&peaks, 1.5418, 1.0, "test", &path).unwrap();
        let read_back =
            ExperimentalPattern::from_text(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back.diffraction_peaks().len(), 1);
        std::fs::remove_file(&path).ok();
    }
}
