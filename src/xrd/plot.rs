//! # 衍射图样绘图
//!
//! 使用 `plotters` 库绘制计算谱，以及精修结果的
//! 观测-计算对照图（含残差曲线）。
//!
//! ## 依赖关系
//! - 被 `commands/` 调用
//! - 使用 `plotters` 渲染图表

use crate::error::{PowderError, Result};
use plotters::prelude::*;
use std::path::Path;

/// 绘制单条连续谱
pub fn profile_plot(
    data: &[(f64, f64)],
    output_path: &Path,
    title: &str,
    wavelength: f64,
    width: u32,
    height: u32,
    use_svg: bool,
) -> Result<()> {
    if use_svg {
        let root = SVGBackend::new(output_path, (width, height)).into_drawing_area();
        draw_profiles(&root, &[("calculated", data, BLUE)], None, title, wavelength)?;
        root.present()
            .map_err(|e| PowderError::Other(e.to_string()))?;
    } else {
        let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
        draw_profiles(&root, &[("calculated", data, BLUE)], None, title, wavelength)?;
        root.present()
            .map_err(|e| PowderError::Other(e.to_string()))?;
    }
    Ok(())
}

/// 绘制观测-计算对照图：上方两条曲线叠加，下方残差
#[allow(clippy::too_many_arguments)]
pub fn refinement_plot(
    observed: &[(f64, f64)],
    calculated: &[(f64, f64)],
    output_path: &Path,
    title: &str,
    wavelength: f64,
    width: u32,
    height: u32,
    use_svg: bool,
) -> Result<()> {
    let difference: Vec<(f64, f64)> = observed
        .iter()
        .zip(calculated)
        .map(|(&(x, o), &(_, c))| (x, o - c))
        .collect();
    let series = [
        ("observed", observed, RED),
        ("calculated", calculated, BLUE),
    ];
    if use_svg {
        let root = SVGBackend::new(output_path, (width, height)).into_drawing_area();
        draw_profiles(&root, &series, Some(&difference), title, wavelength)?;
        root.present()
            .map_err(|e| PowderError::Other(e.to_string()))?;
    } else {
        let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
        draw_profiles(&root, &series, Some(&difference), title, wavelength)?;
        root.present()
            .map_err(|e| PowderError::Other(e.to_string()))?;
    }
    Ok(())
}

fn draw_profiles<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    series: &[(&str, &[(f64, f64)], RGBColor)],
    difference: Option<&[(f64, f64)]>,
    title: &str,
    wavelength: f64,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)
        .map_err(|e| PowderError::Other(format!("{:?}", e)))?;

    let x_min = series
        .iter()
        .filter_map(|(_, d, _)| d.first().map(|p| p.0))
        .fold(f64::INFINITY, f64::min);
    let x_max = series
        .iter()
        .filter_map(|(_, d, _)| d.last().map(|p| p.0))
        .fold(f64::NEG_INFINITY, f64::max);
    let y_max = series
        .iter()
        .flat_map(|(_, d, _)| d.iter().map(|p| p.1))
        .fold(0.0_f64, f64::max);
    let y_min = difference
        .map(|d| d.iter().map(|p| p.1).fold(0.0_f64, f64::min))
        .unwrap_or(0.0);

    let caption = format!("{} (λ = {:.4} Å)", title, wavelength);
    let mut chart = ChartBuilder::on(root)
        .caption(caption, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(64)
        .build_cartesian_2d(x_min..x_max, (y_min * 1.1)..(y_max * 1.05))
        .map_err(|e| PowderError::Other(format!("{:?}", e)))?;

    chart
        .configure_mesh()
        .x_desc("2θ (degrees)")
        .y_desc("Intensity")
        .draw()
        .map_err(|e| PowderError::Other(format!("{:?}", e)))?;

    for (name, data, color) in series {
        chart
            .draw_series(LineSeries::new(data.iter().copied(), color))
            .map_err(|e| PowderError::Other(format!("{:?}", e)))?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], *color));
    }
    if let Some(difference) = difference {
        chart
            .draw_series(LineSeries::new(difference.iter().copied(), &BLACK.mix(0.6)))
            .map_err(|e| PowderError::Other(format!("{:?}", e)))?
            .label("difference")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], BLACK.mix(0.6)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| PowderError::Other(format!("{:?}", e)))?;

    Ok(())
}
