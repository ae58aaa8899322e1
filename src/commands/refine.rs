//! # refine 子命令实现
//!
//! 对实验参考图样精修结构模型，报告各阶段结果并输出精修后的
//! 计算谱与对照图。
//!
//! 从 POSCAR 读入的结构按 P1 对称性处理（不做对称约化）；
//! 空间群约束由库调用方通过 `models::Symmetry` 提供。
//!
//! ## 依赖关系
//! - 使用 `cli/refine.rs` 定义的 RefineArgs
//! - 使用 `xrd/refine.rs` 的精修驱动器
//! - 使用 `xrd/plot.rs` 绘制对照图

use crate::cli::refine::RefineArgs;
use crate::error::{PowderError, Result};
use crate::models::Symmetry;
use crate::parsers;
use crate::utils::output;
use crate::xrd::peak::RadiationMethod;
use crate::xrd::{export, plot, CalculatedPattern, DiffractionData, ExperimentalPattern};

/// 执行 refine 命令
pub fn execute(args: RefineArgs) -> Result<()> {
    output::print_header("Structure Refinement");

    let mut crystal = parsers::parse_structure_file(&args.structure)?;
    output::print_success(&format!(
        "Loaded structure: {} ({}, {} atoms)",
        crystal.name,
        crystal.formula(),
        crystal.atoms.len()
    ));

    let reference = ExperimentalPattern::from_file(&args.pattern)?;
    if reference.has_continuous_data() {
        output::print_info(&format!(
            "Reference: raw pattern, 2θ ∈ [{:.2}°, {:.2}°], λ = {:.4} Å",
            reference.min_two_theta(),
            reference.max_two_theta(),
            reference.wavelength()
        ));
    } else {
        output::print_info(&format!(
            "Reference: {} integrated peaks, λ = {:.4} Å",
            reference.diffraction_peaks().len(),
            reference.wavelength()
        ));
    }
    if args.rietveld && !reference.has_continuous_data() {
        return Err(PowderError::InvalidArgument(
            "Rietveld refinement requires a raw (continuous) reference pattern".into(),
        ));
    }

    let symmetry = Symmetry::p1(&crystal);
    let mut engine = CalculatedPattern::new();
    engine.set_max_lattice_change(args.max_lat_change);
    engine.set_num_background(args.num_background);
    engine.set_use_chebyshev(!args.polynomial_background);
    if args.simple {
        engine.set_method(RadiationMethod::Simple);
    }

    output::print_info(if args.rietveld {
        "Running staged full-profile (Rietveld) refinement"
    } else {
        "Running integrated-intensity refinement"
    });

    let r_factor = engine.refine(
        &mut crystal,
        &symmetry,
        &reference,
        args.rietveld,
        !args.skip_positions,
        !args.skip_bfactors,
    )?;
    output::print_stage("refinement finished", r_factor);

    // 精修结果汇报
    let lengths = crystal.basis.lengths();
    let angles = crystal.basis.angles();
    output::print_success(&format!(
        "Refined lattice: a = {:.5}, b = {:.5}, c = {:.5} Å; α = {:.3}°, β = {:.3}°, γ = {:.3}°",
        lengths[0], lengths[1], lengths[2], angles[0], angles[1], angles[2]
    ));
    for (i, b) in engine.b_factors().iter().enumerate() {
        output::print_info(&format!("Orbit {}: B = {:.4} Å²", i + 1, b));
    }
    output::print_info(&format!("Optimal scale: {:.6}", engine.optimal_scale()));

    // 精修后的计算谱
    if let Some(output_path) = &args.output {
        let angles = if reference.has_continuous_data() {
            reference.measurement_angles()?
        } else {
            engine.pattern_angles()
        };
        let intensities = engine.intensity_at(&angles);
        export::profile_to_xy(
            &angles,
            &intensities,
            engine.wavelength(),
            engine.optimal_scale(),
            &crystal.name,
            output_path,
        )?;
        output::print_success(&format!(
            "Refined profile saved to '{}'",
            output_path.display()
        ));
    }

    // 观测-计算对照图
    if let Some(plot_path) = &args.plot {
        if reference.has_continuous_data() {
            let angles = reference.measurement_angles()?;
            let observed: Vec<(f64, f64)> = angles
                .iter()
                .copied()
                .zip(reference.measured_intensities()?)
                .collect();
            let scale = engine.optimal_scale();
            let calculated: Vec<(f64, f64)> = angles
                .iter()
                .zip(engine.intensity_at(&angles))
                .map(|(&t, i)| (t, i * scale))
                .collect();
            let use_svg = plot_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("svg"))
                .unwrap_or(false);
            plot::refinement_plot(
                &observed,
                &calculated,
                plot_path,
                &crystal.name,
                engine.wavelength(),
                1200,
                800,
                use_svg,
            )?;
            output::print_success(&format!("Comparison plot saved to '{}'", plot_path.display()));
        } else {
            output::print_warning("Comparison plot requires a raw reference pattern, skipping");
        }
    }
    Ok(())
}
