//! # 精修驱动器
//!
//! 把可精修参数打包为有界参数向量，交给箱式约束 BFGS 最小化
//! R 因子。全谱（Rietveld）模式按阶段逐个启用参数组：每个新参数组
//! 先单独精修，再与此前全部参数组联合精修；积分强度模式只精修
//! 原子位置与 B 因子。
//!
//! 参数打包次序固定：SCALE | SPECDISP | BACKGROUND | BASIS |
//! UVFACTORS | WFACTOR | POSITIONS | BFACTORS | TEXTURE | ZEROSHIFT。
//!
//! ## 依赖关系
//! - 为 `xrd/pattern.rs` 的 CalculatedPattern 提供精修方法
//! - 使用 `numeric/bfgs.rs` 的最小化器
//! - 使用 `xrd/rfactor.rs` 的 R 因子作为目标函数

use crate::error::{PowderError, Result};
use crate::models::{move_into_cell, Basis, Crystal, Symmetry};
use crate::numeric::bfgs::{minimize_box_constrained, BfgsOptions};
use crate::xrd::pattern::CalculatedPattern;
use crate::xrd::rfactor::RMethod;
use crate::xrd::DiffractionData;
use nalgebra::Vector3;
use std::collections::BTreeSet;

const UNBOUNDED: f64 = 1e100;

/// 可精修的参数组。封闭集合：每个变体对应参数向量中的一段，
/// 携带自己的打包、边界与应用规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefinableParameter {
    /// 标度因子（仅全谱模式）
    Scale,
    /// 基矢（晶格长度与角度）
    Basis,
    /// 本底参数（仅全谱模式）
    Background,
    /// 试样偏离衍射仪轴（位移项 [4]）
    SpecimenDisplacement,
    /// 零点偏移（位移项 [5]）
    ZeroShift,
    /// 角度无关展宽项（W 与 η0）
    WFactor,
    /// 角度相关展宽项（U、V 与 η1、η2）
    UvFactors,
    /// 各向同性热振动因子
    BFactors,
    /// 择优取向
    Texture,
    /// 原子位置
    Positions,
}

/// 参数向量的固定打包次序
pub const PACK_ORDER: [RefinableParameter; 10] = [
    RefinableParameter::Scale,
    RefinableParameter::SpecimenDisplacement,
    RefinableParameter::Background,
    RefinableParameter::Basis,
    RefinableParameter::UvFactors,
    RefinableParameter::WFactor,
    RefinableParameter::Positions,
    RefinableParameter::BFactors,
    RefinableParameter::Texture,
    RefinableParameter::ZeroShift,
];

impl CalculatedPattern {
    fn will_refine(&self, parameter: RefinableParameter) -> bool {
        self.currently_refining.contains(&parameter)
    }

    /// 当前启用参数的取值，按固定次序打包
    pub(crate) fn pack_parameters(&self) -> Vec<f64> {
        let mut params = Vec::new();
        for kind in PACK_ORDER {
            if !self.will_refine(kind) {
                continue;
            }
            match kind {
                RefinableParameter::Scale => params.push(self.optimal_scale),
                RefinableParameter::SpecimenDisplacement => {
                    params.push(self.shift_parameters[4])
                }
                RefinableParameter::Background => {
                    params.extend_from_slice(&self.background_parameters)
                }
                RefinableParameter::Basis => {
                    let basis = &self.crystal.as_ref().unwrap().basis;
                    params.extend_from_slice(&basis.lengths());
                    params.extend_from_slice(&basis.angles());
                }
                RefinableParameter::UvFactors => {
                    params.extend_from_slice(&[self.u_factor, self.v_factor, self.eta1, self.eta2])
                }
                RefinableParameter::WFactor => {
                    params.extend_from_slice(&[self.w_factor, self.eta0])
                }
                RefinableParameter::Positions => {
                    let crystal = self.crystal.as_ref().unwrap();
                    for orbit in self.symmetry.as_ref().unwrap().orbits() {
                        let p = crystal.atoms[orbit.atoms[0]].fractional();
                        params.extend_from_slice(&[p[0], p[1], p[2]]);
                    }
                }
                RefinableParameter::BFactors => params.extend_from_slice(&self.b_factors),
                RefinableParameter::Texture => {
                    let p = self.preferred_orientation;
                    params.extend_from_slice(&[p[0], p[1], p[2]]);
                }
                RefinableParameter::ZeroShift => params.push(self.shift_parameters[5]),
            }
        }
        params
    }

    /// 各参数的下界，次序与 pack_parameters 相同
    pub(crate) fn lower_bounds(&self) -> Vec<f64> {
        self.bounds(false)
    }

    /// 各参数的上界，次序与 pack_parameters 相同
    pub(crate) fn upper_bounds(&self) -> Vec<f64> {
        self.bounds(true)
    }

    fn bounds(&self, upper: bool) -> Vec<f64> {
        let sign = if upper { 1.0 } else { -1.0 };
        let mut bounds = Vec::new();
        for kind in PACK_ORDER {
            if !self.will_refine(kind) {
                continue;
            }
            match kind {
                RefinableParameter::Scale => {
                    bounds.push(if upper { UNBOUNDED } else { 0.0 })
                }
                RefinableParameter::SpecimenDisplacement | RefinableParameter::ZeroShift => {
                    bounds.push(sign * 0.1)
                }
                RefinableParameter::Background => {
                    bounds.extend(std::iter::repeat(sign * UNBOUNDED).take(
                        self.background_parameters.len(),
                    ))
                }
                RefinableParameter::Basis => {
                    let factor = 1.0 + sign * self.max_lat_change;
                    for v in self.original_lengths {
                        bounds.push(v * factor);
                    }
                    for v in self.original_angles {
                        bounds.push(v * factor);
                    }
                }
                RefinableParameter::UvFactors => {
                    bounds.extend(std::iter::repeat(sign * UNBOUNDED).take(4))
                }
                RefinableParameter::WFactor => {
                    if upper {
                        bounds.extend_from_slice(&[20.0, 1.0]);
                    } else {
                        bounds.extend_from_slice(&[0.0, 0.0]);
                    }
                }
                RefinableParameter::Positions => {
                    let count = self.symmetry.as_ref().unwrap().orbits().len() * 3;
                    bounds.extend(std::iter::repeat(if upper { 2.0 } else { -1.0 }).take(count));
                }
                RefinableParameter::BFactors => {
                    let value = if upper { self.max_b_factor } else { self.min_b_factor };
                    bounds.extend(std::iter::repeat(value).take(self.b_factors.len()));
                }
                RefinableParameter::Texture => {
                    bounds.extend(std::iter::repeat(sign * 10.0).take(3))
                }
            }
        }
        bounds
    }

    /// 把参数向量写回模型。
    /// 基矢段重建晶格并投影到空间群约束，位置段做特殊位置投影、
    /// 折回晶胞并经生成元传播到轨道内全部原子。
    pub(crate) fn apply_parameters(&mut self, params: &[f64]) -> Result<()> {
        let mut position = 0;
        for kind in PACK_ORDER {
            if !self.will_refine(kind) {
                continue;
            }
            match kind {
                RefinableParameter::Scale => {
                    self.optimal_scale = params[position];
                    position += 1;
                }
                RefinableParameter::SpecimenDisplacement => {
                    self.shift_parameters[4] = params[position];
                    position += 1;
                }
                RefinableParameter::Background => {
                    for value in &mut self.background_parameters {
                        *value = params[position];
                        position += 1;
                    }
                }
                RefinableParameter::Basis => {
                    let mut cell = [0.0; 6];
                    cell.copy_from_slice(&params[position..position + 6]);
                    position += 6;
                    self.set_basis_from(cell)?;
                }
                RefinableParameter::UvFactors => {
                    self.u_factor = params[position];
                    self.v_factor = params[position + 1];
                    self.eta1 = params[position + 2];
                    self.eta2 = params[position + 3];
                    position += 4;
                }
                RefinableParameter::WFactor => {
                    self.w_factor = params[position];
                    self.eta0 = params[position + 1];
                    position += 2;
                }
                RefinableParameter::Positions => {
                    let count = self.symmetry.as_ref().unwrap().orbits().len() * 3;
                    let values = params[position..position + count].to_vec();
                    position += count;
                    self.set_positions(&values);
                }
                RefinableParameter::BFactors => {
                    for value in &mut self.b_factors {
                        *value = params[position];
                        position += 1;
                    }
                }
                RefinableParameter::Texture => {
                    self.preferred_orientation = Vector3::new(
                        params[position],
                        params[position + 1],
                        params[position + 2],
                    );
                    position += 3;
                }
                RefinableParameter::ZeroShift => {
                    self.shift_parameters[5] = params[position];
                    position += 1;
                }
            }
        }
        Ok(())
    }

    /// 由 (长度, 角度) 重建基矢，投影到空间群约束后写入结构，
    /// 并更新全部峰位
    fn set_basis_from(&mut self, cell: [f64; 6]) -> Result<()> {
        let matrix =
            Basis::vectors_from_parameters([cell[0], cell[1], cell[2]], [cell[3], cell[4], cell[5]]);
        let refined = self.symmetry.as_ref().unwrap().refine_basis(&matrix);

        let mut crystal = self.crystal.take().unwrap();
        crystal.basis.set(refined)?;
        for reflection in &mut self.reflections {
            reflection.update_position(&crystal.basis, self.wavelength);
        }
        self.crystal = Some(crystal);
        Ok(())
    }

    /// 写入轨道代表原子的新位置：先投影到特殊位置的不变子空间，
    /// 再经各生成元传播到轨道内每个原子并折回晶胞
    fn set_positions(&mut self, values: &[f64]) {
        let symmetry = self.symmetry.clone().unwrap();
        let mut crystal = self.crystal.take().unwrap();
        for (i, orbit) in symmetry.orbits().iter().enumerate() {
            let raw = Vector3::new(values[3 * i], values[3 * i + 1], values[3 * i + 2]);
            let projected = orbit.special_position.project(raw);
            for (generator, &atom_index) in orbit.generators.iter().zip(&orbit.atoms) {
                let mut p = generator.rotation * projected + generator.translation;
                move_into_cell(&mut p);
                crystal.atoms[atom_index].set_fractional(p);
            }
        }
        self.crystal = Some(crystal);
    }

    /// 对当前启用的参数组运行一次有界最小化。
    /// 目标函数：全谱模式用未归一化 Rietveld 残差，积分模式用
    /// 平方 R 因子；返回值为精修后的 Rp。
    pub(crate) fn run_refinement(
        &mut self,
        reference: &dyn DiffractionData,
        rietveld: bool,
    ) -> Result<f64> {
        let mut params = self.pack_parameters();
        let lower = self.lower_bounds();
        let upper = self.upper_bounds();
        let options = BfgsOptions {
            objective_delta: 1e-12,
            max_iterations: 30 * params.len().max(1),
            gradient_step: 1e-6,
        };

        {
            let mut objective = |x: &[f64]| -> f64 {
                if self.apply_parameters(x).is_err() {
                    return f64::INFINITY;
                }
                self.calculate_peak_intensities();
                let result = if rietveld {
                    self.rietveld_r_factor(reference, RMethod::Rietveld)
                } else {
                    self.integrated_r_factor(reference, RMethod::Squared)
                };
                result.unwrap_or(f64::INFINITY)
            };
            minimize_box_constrained(&mut objective, &mut params, &lower, &upper, &options);
        }

        self.apply_parameters(&params)?;
        self.calculate_peak_intensities();
        if rietveld {
            self.rietveld_r_factor(reference, RMethod::Abs)
        } else {
            self.integrated_r_factor(reference, RMethod::Abs)
        }
    }

    /// 全谱（Rietveld）分阶段精修。
    ///
    /// 依次启用：标度 → 试样位移 → 本底 → 基矢（允许时）→ 峰宽。
    /// 宽度阶段后 R 超过阈值判定发散，保留当前状态返回。之后按需
    /// 精修原子位置，再精修织构、B 因子、角度相关展宽与零点偏移。
    /// 每个新参数组先单独精修，再与此前全部参数组联合精修。
    pub fn rietveld_refinement(
        &mut self,
        reference: &dyn DiffractionData,
        to_refine: &BTreeSet<RefinableParameter>,
    ) -> Result<()> {
        if !self.structure_is_defined() {
            return Err(PowderError::StructureNotDefined);
        }

        self.currently_refining.clear();
        let mut refined_so_far: BTreeSet<RefinableParameter> = BTreeSet::new();

        // 初始强度与标度初值
        self.calculate_peak_intensities();
        let ref_angles = reference.measurement_angles()?;
        let ref_intensities = reference.measured_intensities()?;
        let this_intensities = self.intensity_at(&ref_angles);

        // 标度因子
        self.currently_refining.insert(RefinableParameter::Scale);
        refined_so_far.insert(RefinableParameter::Scale);
        let max_ref = ref_intensities.iter().fold(0.0_f64, |a, &b| a.max(b));
        let max_this = this_intensities.iter().fold(0.0_f64, |a, &b| a.max(b));
        if max_this > 0.0 {
            self.optimal_scale = max_ref / max_this;
        }
        let mut current_r = self.run_refinement(reference, true)?;
        log::info!("refined scale factor, current R = {current_r:.4}");

        // 试样位移
        self.currently_refining.clear();
        self.currently_refining
            .insert(RefinableParameter::SpecimenDisplacement);
        refined_so_far.insert(RefinableParameter::SpecimenDisplacement);
        self.run_refinement(reference, true)?;
        self.currently_refining.extend(refined_so_far.iter().copied());
        current_r = self.run_refinement(reference, true)?;
        log::info!("refined specimen displacement, current R = {current_r:.4}");

        // 本底
        self.currently_refining.clear();
        self.currently_refining.insert(RefinableParameter::Background);
        self.currently_refining.insert(RefinableParameter::Scale);
        refined_so_far.insert(RefinableParameter::Background);
        self.background_parameters =
            self.guess_background_parameters(&ref_angles, &ref_intensities);
        self.run_refinement(reference, true)?;
        self.currently_refining.extend(refined_so_far.iter().copied());
        current_r = self.run_refinement(reference, true)?;
        log::info!("refined background, current R = {current_r:.4}");

        // 晶格参数
        if self.max_lat_change > 0.0 {
            let previous = self.currently_refining.clone();
            self.currently_refining.clear();
            self.currently_refining.insert(RefinableParameter::Basis);
            refined_so_far.insert(RefinableParameter::Basis);
            current_r = self.run_refinement(reference, true)?;
            self.currently_refining.extend(previous);
            log::info!("refined lattice parameters, current R = {current_r:.4}");
        }

        // 角度无关峰宽
        self.w_factor = self.guess_peak_width(&ref_angles, &ref_intensities);
        self.currently_refining.insert(RefinableParameter::WFactor);
        refined_so_far.insert(RefinableParameter::WFactor);
        self.run_refinement(reference, true)?;
        self.currently_refining.extend(refined_so_far.iter().copied());
        current_r = self.run_refinement(reference, true)?;
        log::info!(
            "refined peak-broadening term to {:.4}, current R = {current_r:.4}",
            self.w_factor
        );

        // 发散保护
        if current_r > self.divergence_threshold {
            log::warn!("very poor pattern match (R = {current_r:.3}), not refining further");
            return Ok(());
        }

        // 原子位置
        if to_refine.contains(&RefinableParameter::Positions) {
            self.currently_refining.insert(RefinableParameter::Positions);
            current_r = self.run_refinement(reference, true)?;
            log::info!("refined atomic positions, current R = {current_r:.4}");
        }

        // 择优取向
        self.currently_refining.insert(RefinableParameter::Texture);
        current_r = self.run_refinement(reference, true)?;
        log::info!(
            "refined preferred orientation (magnitude {:.3}), current R = {current_r:.4}",
            self.preferred_orientation.norm()
        );

        // B 因子
        if to_refine.contains(&RefinableParameter::BFactors) {
            self.currently_refining.insert(RefinableParameter::BFactors);
            current_r = self.run_refinement(reference, true)?;
            log::info!("refined B factors, current R = {current_r:.4}");
        }

        // 角度相关展宽
        self.currently_refining.insert(RefinableParameter::UvFactors);
        current_r = self.run_refinement(reference, true)?;
        log::info!("refined all broadening factors, current R = {current_r:.4}");

        // 零点偏移
        self.currently_refining.insert(RefinableParameter::ZeroShift);
        current_r = self.run_refinement(reference, true)?;
        log::info!("refined zero shift, current R = {current_r:.4}");

        Ok(())
    }

    /// 积分强度模式精修：依次启用原子位置与 B 因子
    /// （调用前须已完成峰匹配）
    pub fn refine_parameters(
        &mut self,
        reference: &dyn DiffractionData,
        to_refine: &BTreeSet<RefinableParameter>,
    ) -> Result<()> {
        if !self.structure_is_defined() {
            return Err(PowderError::StructureNotDefined);
        }
        self.currently_refining.clear();

        if to_refine.contains(&RefinableParameter::Positions) {
            self.currently_refining.insert(RefinableParameter::Positions);
            let r = self.run_refinement(reference, false)?;
            log::info!("refined atomic positions, current R = {r:.3}");
        }

        if to_refine.contains(&RefinableParameter::BFactors) {
            self.currently_refining.insert(RefinableParameter::BFactors);
            let r = self.run_refinement(reference, false)?;
            log::info!("also refined isotropic thermal factors, current R = {r:.3}");
        }
        Ok(())
    }

    /// 对参考图样精修结构。精修后的坐标与基矢写回调用方的结构，
    /// 返回最终 Rp。
    pub fn refine(
        &mut self,
        crystal: &mut Crystal,
        symmetry: &Symmetry,
        reference: &dyn DiffractionData,
        rietveld: bool,
        fit_positions: bool,
        fit_bfactors: bool,
    ) -> Result<f64> {
        self.clear();
        self.define_reference_frame(reference)?;
        self.set_structure(crystal, symmetry)?;

        let mut to_refine = BTreeSet::new();
        if fit_positions {
            to_refine.insert(RefinableParameter::Positions);
        }
        if fit_bfactors {
            to_refine.insert(RefinableParameter::BFactors);
        }

        let r_factor = if rietveld {
            self.rietveld_refinement(reference, &to_refine)?;
            self.measurement_angles = reference.measurement_angles()?;
            self.rietveld_r_factor(reference, RMethod::Abs)?
        } else {
            self.match_peaks_to_reference(reference)?;
            self.refine_parameters(reference, &to_refine)?;
            self.integrated_r_factor(reference, RMethod::Abs)?
        };

        *crystal = self.crystal.clone().unwrap();
        Ok(r_factor)
    }

    /// 计算图样；给出参考时优化标度（以及按需的 B 因子）并返回
    /// R 因子，否则把最强反射标度到 1000。
    pub fn calculate(
        &mut self,
        crystal: &Crystal,
        symmetry: &Symmetry,
        reference: Option<&dyn DiffractionData>,
        rietveld: bool,
        fit_bfactors: bool,
    ) -> Result<f64> {
        if rietveld && reference.is_none() {
            return Err(PowderError::ReferenceNotDefined);
        }
        self.clear();
        self.set_structure(crystal, symmetry)?;

        match reference {
            Some(reference) => {
                self.define_reference_frame(reference)?;
                let mut to_refine = BTreeSet::new();
                if fit_bfactors {
                    to_refine.insert(RefinableParameter::BFactors);
                }
                if rietveld {
                    self.rietveld_refinement(reference, &to_refine)?;
                    self.measurement_angles = reference.measurement_angles()?;
                    self.rietveld_r_factor(reference, RMethod::Abs)
                } else {
                    self.match_peaks_to_reference(reference)?;
                    self.refine_parameters(reference, &to_refine)?;
                    self.integrated_r_factor(reference, RMethod::Abs)
                }
            }
            None => {
                self.compute()?;
                Ok(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::experimental::ExperimentalPattern;
    use crate::xrd::pattern::tests::{aluminium_pattern, cubic_point_group, fcc_crystal};
    use crate::xrd::rfactor::RMethod;

    #[test]
    fn test_pack_apply_round_trip() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        pattern.background_parameters = vec![1.0, 2.0, 3.0];
        pattern.currently_refining.extend([
            RefinableParameter::Scale,
            RefinableParameter::Background,
            RefinableParameter::WFactor,
            RefinableParameter::BFactors,
            RefinableParameter::ZeroShift,
        ]);

        let mut params = pattern.pack_parameters();
        let lower = pattern.lower_bounds();
        let upper = pattern.upper_bounds();
        assert_eq!(params.len(), lower.len());
        assert_eq!(params.len(), upper.len());
        // scale(1) + background(3) + wfactor(2) + bfactors(2) + zeroshift(1)
        assert_eq!(params.len(), 9);

        for (i, p) in params.iter_mut().enumerate() {
            *p += 0.01 * (i + 1) as f64;
        }
        let perturbed = params.clone();
        pattern.apply_parameters(&params).unwrap();
        assert_eq!(pattern.pack_parameters(), perturbed);
    }

    #[test]
    fn test_basis_parameters_respect_symmetry_projection() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        pattern.currently_refining.insert(RefinableParameter::Basis);
        // 立方对称下微破缺的六参数应被投影为等长直角晶格
        pattern
            .apply_parameters(&[4.06, 4.05, 4.04, 90.1, 89.9, 90.0])
            .unwrap();
        let basis = &pattern.crystal().unwrap().basis;
        let lengths = basis.lengths();
        assert!((lengths[0] - lengths[1]).abs() < 1e-9);
        assert!((lengths[1] - lengths[2]).abs() < 1e-9);
        let angles = basis.angles();
        for a in angles {
            assert!((a - 90.0).abs() < 1e-9);
        }
        // 峰位已随晶格同步更新
        for r in pattern.reflections() {
            let recomputed = 2.0
                * crate::xrd::peak::Reflection::diffraction_angle(
                    basis,
                    &r.hkl,
                    pattern.wavelength(),
                )
                .to_degrees();
            assert!((r.two_theta_deg - recomputed).abs() < 1e-9);
        }
    }

    #[test]
    fn test_positions_propagate_through_generators() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        pattern
            .currently_refining
            .insert(RefinableParameter::Positions);
        assert!(!pattern.reflections().is_empty());

        let params = pattern.pack_parameters();
        pattern.apply_parameters(&params).unwrap();
        // 原位写回不改变任何原子位置
        let crystal = pattern.crystal().unwrap();
        assert!((crystal.atoms[0].position[0]).abs() < 1e-9);
        assert!((crystal.atoms[1].position[0] - 0.5).abs() < 1e-9);
        assert!((crystal.atoms[3].position[2] - 0.5).abs() < 1e-9);
    }

    /// 由铝的理论图样（FWHM 1°）合成参考曲线
    fn synthetic_reference(scale: f64, angle_shift: f64) -> ExperimentalPattern {
        let mut truth = aluminium_pattern();
        truth.set_peak_broadening(0.0, 0.0, 1.0);
        truth.compute().unwrap();
        let step = 0.2;
        let count = ((100.0 - 10.0) / step) as usize + 1;
        let angles: Vec<f64> = (0..count).map(|i| 10.0 + i as f64 * step).collect();
        let shifted: Vec<f64> = angles.iter().map(|a| a + angle_shift).collect();
        let intensities: Vec<f64> = truth
            .generate_peak_signal(&shifted)
            .into_iter()
            .map(|v| v * scale)
            .collect();
        let mut reference = ExperimentalPattern::new();
        reference.set_wavelength(truth.wavelength());
        reference.set_points(angles, intensities);
        reference
    }

    #[test]
    fn test_rietveld_recovers_perturbed_lattice() {
        let reference = synthetic_reference(10.0, 0.0);

        // a 偏大 1% 的初始模型
        let mut crystal = fcc_crystal("Al", "Al", 13, 4.0495 * 1.01);
        let symmetry =
            crate::models::Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();

        let mut engine = CalculatedPattern::new();
        engine.set_max_lattice_change(0.05);
        engine
            .refine(&mut crystal, &symmetry, &reference, true, false, false)
            .unwrap();

        let a = crystal.basis.lengths()[0];
        assert!(
            (a - 4.0495).abs() < 2e-4,
            "recovered a = {a:.5}, expected 4.0495"
        );
        let r_wp = engine
            .rietveld_r_factor(&reference, RMethod::Squared)
            .unwrap();
        assert!(r_wp < 0.1, "Rwp = {r_wp:.4}");
    }

    #[test]
    fn test_divergence_guard_aborts_refinement() {
        // 参考峰整体错开半个峰间距，宽度阶段后必然发散
        let reference = synthetic_reference(10.0, 3.0);

        let mut crystal = fcc_crystal("Al", "Al", 13, 4.0495);
        let symmetry =
            crate::models::Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();

        let mut engine = CalculatedPattern::new();
        engine.set_max_lattice_change(0.0);
        let r = engine
            .refine(&mut crystal, &symmetry, &reference, true, true, true)
            .unwrap();

        assert!(r > 0.9, "expected divergence, R = {r:.3}");
        // 发散保护生效时 B 因子阶段从未运行
        for b in &engine.b_factors {
            assert!((b - 0.5).abs() < 1e-12);
        }
    }
}
