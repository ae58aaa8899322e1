//! # 计算衍射图样
//!
//! 由晶体结构与空间群对称性生成粉末衍射图样：
//! 1. 在约化倒易格点上枚举对称唯一的反射并赋予多重性
//! 2. 由结构因子、LP 因子与织构因子计算积分强度
//! 3. 以伪 Voigt 峰形（Caglioti 展宽 + 六项角位移）与本底多项式
//!    合成连续强度曲线
//!
//! 精修驱动逻辑见 `xrd/refine.rs`，R 因子见 `xrd/rfactor.rs`。
//!
//! ## 依赖关系
//! - 使用 `models/` 的 Crystal、Symmetry
//! - 使用 `xrd/peak.rs` 的 Reflection
//! - 使用 `xrd/scattering.rs` 的散射因子表
//! - 使用 `nalgebra`（SVD 最小二乘做本底初值）

use crate::error::{PowderError, Result};
use crate::models::{Crystal, Symmetry};
use crate::xrd::peak::{MeasuredPeak, RadiationMethod, Reflection};
use crate::xrd::refine::RefinableParameter;
use crate::xrd::scattering::{self, ScatteringFactorParams};
use crate::xrd::DiffractionData;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// hkl 等价性与字典序比较容差
const HKL_TOL: f64 = 1e-4;

/// 由结构计算的粉末衍射图样，持有精修所需的全部模型参数
#[derive(Debug, Clone)]
pub struct CalculatedPattern {
    // ── 图样总体描述 ──
    pub(crate) method: RadiationMethod,
    pub(crate) wavelength: f64,
    pub(crate) min_two_theta: f64,
    pub(crate) max_two_theta: f64,
    pub(crate) resolution: f64,

    // ── 结构模型 ──
    pub(crate) crystal: Option<Crystal>,
    pub(crate) symmetry: Option<Symmetry>,
    pub(crate) reflections: Vec<Reflection>,
    pub(crate) original_lengths: [f64; 3],
    pub(crate) original_angles: [f64; 3],
    pub(crate) b_factors: Vec<f64>,
    pub(crate) atf_params: Vec<ScatteringFactorParams>,

    // ── 仪器参数 ──
    /// Caglioti 展宽项：H² = W + tanθ·(V + U·tanθ)
    pub(crate) u_factor: f64,
    pub(crate) v_factor: f64,
    pub(crate) w_factor: f64,
    /// 伪 Voigt 混合参数 η = η0 + η1·2θ + η2·(2θ)²
    pub(crate) eta0: f64,
    pub(crate) eta1: f64,
    pub(crate) eta2: f64,
    /// 峰位移项（Pecharsky 的六项参数化；[4] 为试样位移，[5] 为零点）
    pub(crate) shift_parameters: [f64; 6],
    pub(crate) background_parameters: Vec<f64>,
    /// 择优取向倒格矢，模长即织构强度 τ
    pub(crate) preferred_orientation: Vector3<f64>,

    // ── 精修设置 ──
    pub(crate) max_lat_change: f64,
    pub(crate) min_b_factor: f64,
    pub(crate) max_b_factor: f64,
    pub(crate) use_chebyshev: bool,
    pub(crate) num_background: usize,
    pub(crate) background_poly_start: i32,
    /// 宽度阶段后 R 超过该值则中止精修
    pub(crate) divergence_threshold: f64,
    pub(crate) optimal_scale: f64,
    pub(crate) currently_refining: BTreeSet<RefinableParameter>,

    // ── 与参考图样匹配的状态 ──
    pub(crate) matching_peaks: Vec<Vec<usize>>,
    pub(crate) unmatched_peaks: Vec<usize>,
    pub(crate) measurement_angles: Vec<f64>,
}

impl Default for CalculatedPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculatedPattern {
    pub fn new() -> Self {
        CalculatedPattern {
            method: RadiationMethod::Xray,
            wavelength: 1.5418,
            min_two_theta: 10.0,
            max_two_theta: 100.0,
            resolution: 0.02,
            crystal: None,
            symmetry: None,
            reflections: Vec::new(),
            original_lengths: [0.0; 3],
            original_angles: [0.0; 3],
            b_factors: Vec::new(),
            atf_params: Vec::new(),
            u_factor: 0.0,
            v_factor: 0.0,
            w_factor: 0.3,
            eta0: 0.5,
            eta1: 0.0,
            eta2: 0.0,
            shift_parameters: [0.0; 6],
            background_parameters: Vec::new(),
            preferred_orientation: Vector3::new(1.0, 0.0, 0.0),
            max_lat_change: 0.05,
            min_b_factor: 0.1,
            max_b_factor: 4.0,
            use_chebyshev: true,
            num_background: 5,
            background_poly_start: -1,
            divergence_threshold: 0.9,
            optimal_scale: 1.0,
            currently_refining: BTreeSet::new(),
            matching_peaks: Vec::new(),
            unmatched_peaks: Vec::new(),
            measurement_angles: Vec::new(),
        }
    }

    /// 回到空图样状态，仪器参数恢复默认
    pub fn clear(&mut self) {
        self.crystal = None;
        self.symmetry = None;
        self.reflections.clear();
        self.u_factor = 0.0;
        self.v_factor = 0.0;
        self.w_factor = 0.3;
        self.eta0 = 0.5;
        self.eta1 = 0.0;
        self.eta2 = 0.0;
        self.shift_parameters = [0.0; 6];
        self.background_parameters.clear();
        self.preferred_orientation = Vector3::new(1.0, 0.0, 0.0);
        self.measurement_angles.clear();
        self.matching_peaks.clear();
        self.unmatched_peaks.clear();
        self.currently_refining.clear();
        self.optimal_scale = 1.0;
    }

    // ── 设置 ──

    pub fn set_method(&mut self, method: RadiationMethod) {
        self.method = method;
    }

    pub fn set_wavelength(&mut self, wavelength: f64) {
        self.wavelength = wavelength;
    }

    pub fn set_range(&mut self, min_two_theta: f64, max_two_theta: f64) {
        self.min_two_theta = min_two_theta;
        self.max_two_theta = max_two_theta;
    }

    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    /// 峰宽参数：H² = W + tanθ·(V + U·tanθ)
    pub fn set_peak_broadening(&mut self, u: f64, v: f64, w: f64) {
        self.u_factor = u;
        self.v_factor = v;
        self.w_factor = w;
    }

    /// 峰形混合参数：η = η0 + η1·2θ + η2·(2θ)²
    pub fn set_peak_shape(&mut self, eta0: f64, eta1: f64, eta2: f64) {
        self.eta0 = eta0;
        self.eta1 = eta1;
        self.eta2 = eta2;
    }

    pub fn set_num_background(&mut self, count: usize) {
        self.num_background = count;
    }

    pub fn set_use_chebyshev(&mut self, use_chebyshev: bool) {
        self.use_chebyshev = use_chebyshev;
    }

    /// 精修中允许的晶格参数最大相对变化（≤ 0 表示固定晶格）
    pub fn set_max_lattice_change(&mut self, change: f64) {
        self.max_lat_change = change;
    }

    pub fn set_b_factor_range(&mut self, min: f64, max: f64) {
        self.min_b_factor = min;
        self.max_b_factor = max;
    }

    pub fn set_optimal_scale(&mut self, scale: f64) {
        self.optimal_scale = scale;
    }

    pub fn optimal_scale(&self) -> f64 {
        self.optimal_scale
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    pub fn b_factors(&self) -> &[f64] {
        &self.b_factors
    }

    pub fn structure_is_defined(&self) -> bool {
        self.crystal.is_some() && self.symmetry.is_some()
    }

    pub fn crystal(&self) -> Option<&Crystal> {
        self.crystal.as_ref()
    }

    // ── 结构定义 ──

    /// 定义生成图样的结构与对称性：建立散射因子表、枚举峰位、
    /// 记录原始晶格参数并初始化 B 因子。
    pub fn set_structure(&mut self, crystal: &Crystal, symmetry: &Symmetry) -> Result<()> {
        self.crystal = Some(crystal.clone());
        self.symmetry = Some(symmetry.clone());

        self.set_atf_params()?;
        self.calculate_peak_locations()?;

        let basis = &self.crystal.as_ref().unwrap().basis;
        self.original_lengths = basis.lengths();
        self.original_angles = basis.angles();

        self.b_factors = vec![0.5; symmetry.orbits().len()];
        Ok(())
    }

    /// 采用参考图样的测量条件（波长与角度窗口）。
    /// 结构已定义时重新枚举峰位。
    pub fn define_reference_frame(&mut self, reference: &dyn DiffractionData) -> Result<()> {
        self.wavelength = reference.wavelength();
        self.min_two_theta = reference.min_two_theta();
        self.max_two_theta = reference.max_two_theta();
        if self.structure_is_defined() {
            self.calculate_peak_locations()?;
        }
        Ok(())
    }

    /// 为每个轨道的代表原子查询散射因子参数
    fn set_atf_params(&mut self) -> Result<()> {
        let crystal = self.crystal.as_ref().ok_or(PowderError::StructureNotDefined)?;
        let symmetry = self.symmetry.as_ref().ok_or(PowderError::StructureNotDefined)?;
        self.atf_params.clear();
        for orbit in symmetry.orbits() {
            let atom = &crystal.atoms[orbit.atoms[0]];
            self.atf_params.push(*scattering::form_factor(atom.number)?);
        }
        Ok(())
    }

    // ── 峰位枚举 ──

    /// 枚举角度窗口内全部对称唯一反射。
    ///
    /// 在约化胞倒易格点上以字典序最小代表作为唯一性判据；
    /// 多重性为轨道内不同像点的个数。系统消光仅做诊断记录，
    /// 不剔除反射（零结构因子自然压制）。
    pub fn calculate_peak_locations(&mut self) -> Result<()> {
        let crystal = self.crystal.as_ref().ok_or(PowderError::StructureNotDefined)?;
        let symmetry = self.symmetry.as_ref().ok_or(PowderError::StructureNotDefined)?;
        let basis = &crystal.basis;
        self.reflections.clear();

        // 每个约化倒易轴向的搜索范围
        let max_mag = 2.0 * (self.max_two_theta.to_radians() / 2.0).sin() / self.wavelength;
        let mut range = [0i64; 3];
        for i in 0..3 {
            let axis = Vector3::new(
                basis.reduced_inverse()[(0, i)],
                basis.reduced_inverse()[(1, i)],
                basis.reduced_inverse()[(2, i)],
            );
            range[i] = (max_mag / axis.norm()).ceil().abs() as i64;
        }

        // 约化胞倒易指数 → 惯用胞倒易指数
        let conv_hkl = basis.unit_point_to_reduced().transpose();

        // 把旋转操作共轭到约化胞倒易基：R' = (P·R·Q)ᵀ，并去掉恒等操作
        let p = basis.unit_to_reduced().transpose();
        let q = p
            .try_inverse()
            .ok_or(PowderError::SingularLattice)?;
        let mut rotations: Vec<Matrix3<f64>> = symmetry
            .operations()
            .iter()
            .map(|op| (p * op.rotation * q).transpose())
            .collect();
        if let Some(pos) = rotations.iter().position(is_identity) {
            rotations.remove(pos);
        }

        // 各操作的本征平移分量（系统消光诊断用）
        let intrinsic: Vec<Vec<Vector3<f64>>> = symmetry
            .operations()
            .iter()
            .map(|op| {
                op.translations
                    .iter()
                    .map(|t| Symmetry::intrinsic_translation(&op.rotation, t))
                    .collect()
            })
            .collect();

        for h in -range[0]..=range[0] {
            for k in -range[1]..=range[1] {
                for l in -range[2]..=range[2] {
                    let red_hkl = Vector3::new(h as f64, k as f64, l as f64);

                    // 生成轨道并判断 red_hkl 是否为字典序最小代表
                    let mut multiplicity = 1usize;
                    let mut equiv = vec![red_hkl];
                    for rotation in &rotations {
                        let mut sym_hkl = rotation * red_hkl;
                        for j in 0..3 {
                            sym_hkl[j] = sym_hkl[j].round();
                        }

                        if lex_smaller(&sym_hkl, &red_hkl) {
                            multiplicity = 0;
                            break;
                        }
                        if !equiv.iter().any(|e| hkl_equal(e, &sym_hkl)) {
                            multiplicity += 1;
                            equiv.push(sym_hkl);
                        }
                    }
                    if multiplicity == 0 {
                        continue;
                    }

                    // 转回惯用胞倒易指数
                    let hkl = conv_hkl * red_hkl;
                    let equiv_hkl: Vec<Vector3<f64>> =
                        equiv.iter().map(|e| conv_hkl * e).collect();

                    // 系统消光判断（仅诊断；反射保留，由零结构因子压制）
                    let mut absent = false;
                    for (op, translations) in symmetry.operations().iter().zip(&intrinsic) {
                        let rotated = op.rotation * hkl;
                        if !hkl_equal(&rotated, &hkl) {
                            continue;
                        }
                        for t in translations {
                            let product = t.dot(&hkl);
                            if (product.round() - product).abs() > HKL_TOL {
                                absent = true;
                                break;
                            }
                        }
                        if absent {
                            break;
                        }
                    }
                    if absent {
                        log::debug!(
                            "systematic absence at hkl = ({:.0} {:.0} {:.0})",
                            hkl[0],
                            hkl[1],
                            hkl[2]
                        );
                    }

                    let two_theta = 2.0
                        * Reflection::diffraction_angle(basis, &hkl, self.wavelength).to_degrees();
                    if two_theta < self.min_two_theta || two_theta > self.max_two_theta {
                        continue;
                    }

                    self.reflections
                        .push(Reflection::new(basis, self.wavelength, hkl, equiv_hkl));
                }
            }
        }

        self.reflections
            .sort_by(|a, b| a.two_theta_deg.partial_cmp(&b.two_theta_deg).unwrap());
        Ok(())
    }

    // ── 强度计算 ──

    /// 重算全部反射的积分强度；晶格正在精修时同步更新峰位
    pub fn calculate_peak_intensities(&mut self) {
        let crystal = match self.crystal.as_ref() {
            Some(c) => c,
            None => return,
        };
        let symmetry = self.symmetry.as_ref().unwrap();
        let tau = self.preferred_orientation.norm();
        let update_positions = self.currently_refining.contains(&RefinableParameter::Basis);
        for reflection in &mut self.reflections {
            if update_positions {
                reflection.update_position(&crystal.basis, self.wavelength);
            }
            reflection.update_intensity(
                self.method,
                self.wavelength,
                crystal,
                symmetry,
                &self.b_factors,
                &self.atf_params,
                &self.preferred_orientation,
                tau,
            );
        }
    }

    /// 计算图样并把标度设为使最强反射为 1000
    pub fn compute(&mut self) -> Result<()> {
        if !self.structure_is_defined() {
            return Err(PowderError::StructureNotDefined);
        }
        self.calculate_peak_intensities();
        let max = self
            .reflections
            .iter()
            .map(|r| r.intensity)
            .fold(0.0_f64, f64::max);
        if max > 0.0 {
            self.optimal_scale = 1000.0 / max;
        }
        Ok(())
    }

    // ── 连续曲线合成 ──

    /// 给定角度处的衍射强度：本底 + 峰信号（不含标度因子）
    pub fn intensity_at(&self, two_theta: &[f64]) -> Vec<f64> {
        let mut output = self.generate_background_signal(two_theta);
        let signal = self.generate_peak_signal(two_theta);
        for (o, s) in output.iter_mut().zip(signal) {
            *o += s;
        }
        output
    }

    /// 本底信号：Chebyshev 展开（约化变量）或以
    /// `background_poly_start` 起始幂次的多项式
    pub fn generate_background_signal(&self, two_theta: &[f64]) -> Vec<f64> {
        let mut output = vec![0.0; two_theta.len()];
        if self.background_parameters.is_empty() {
            return output;
        }

        let params = &self.background_parameters;
        let mut chebyshev = vec![0.0; params.len().max(2)];
        chebyshev[0] = 1.0;

        for (a, &t) in two_theta.iter().enumerate() {
            if self.use_chebyshev {
                output[a] += params[0];
                if params.len() == 1 {
                    continue;
                }
                let x = 2.0 * (t - self.min_two_theta) / (self.max_two_theta - self.min_two_theta)
                    - 1.0;
                chebyshev[1] = x;
                output[a] += params[1] * x;
                for i in 2..params.len() {
                    chebyshev[i] = 2.0 * x * chebyshev[i - 1] - chebyshev[i - 2];
                    output[a] += params[i] * chebyshev[i];
                }
            } else {
                let mut x = t.powi(self.background_poly_start);
                for &p in params {
                    output[a] += p * x;
                    x *= t;
                }
            }
        }
        output
    }

    /// 峰信号：每个反射以伪 Voigt 峰形在 ±6H 窗口内累加。
    /// H² 为负的峰跳过并告警。
    pub fn generate_peak_signal(&self, two_theta: &[f64]) -> Vec<f64> {
        let mut output = vec![0.0; two_theta.len()];
        let cg = 4.0 * 2.0_f64.ln();
        let g_norm = cg.sqrt() / PI.sqrt();

        for reflection in &self.reflections {
            let center_rad = reflection.two_theta_rad;
            let theta = center_rad / 2.0;

            let h2 = self.w_factor + theta.tan() * (self.v_factor + self.u_factor * theta.tan());
            if h2 < 0.0 {
                log::warn!(
                    "negative squared FWHM at 2θ = {:.3}, peak skipped",
                    reflection.two_theta_deg
                );
                continue;
            }
            let h = h2.sqrt();
            if h <= 0.0 {
                continue;
            }

            let center_deg = reflection.two_theta_deg;
            let eta = self.eta0 + center_deg * (self.eta1 + center_deg * self.eta2);

            // 计算峰位到观测峰位的位移
            let s = &self.shift_parameters;
            let shift = s[0] / center_rad.tan()
                + s[1] / center_rad.sin()
                + s[2] / theta.tan()
                + s[3] * center_rad.sin()
                + s[4] * center_rad.cos()
                + s[5];
            let center = center_deg + shift;

            let min_angle = center - 6.0 * h;
            let max_angle = center + 6.0 * h;
            if min_angle >= self.max_two_theta {
                continue;
            }

            let g_prefactor = g_norm / h;
            let l_prefactor = 2.0 / PI / h;
            let intensity = reflection.intensity;
            let start = two_theta.partition_point(|&t| t < min_angle);
            for a in start..two_theta.len() {
                if two_theta[a] >= max_angle {
                    break;
                }
                let x = ((two_theta[a] - center) / h).powi(2);
                let gaussian = g_prefactor * (-cg * x).exp();
                let lorentzian = l_prefactor / (1.0 + 4.0 * x);
                output[a] += intensity * (eta * gaussian + (1.0 - eta) * lorentzian);
            }
        }
        output
    }

    /// 参考图样的测量角；未设置时按分辨率在窗口内等距采样
    pub fn pattern_angles(&self) -> Vec<f64> {
        if self.measurement_angles.is_empty() {
            let count = ((self.max_two_theta - self.min_two_theta) / self.resolution) as usize + 1;
            (0..count)
                .map(|i| self.min_two_theta + i as f64 * self.resolution)
                .collect()
        } else {
            self.measurement_angles.clone()
        }
    }

    // ── 精修初值 ──

    /// 本底参数初值：对远离所有峰位的采样点做基函数最小二乘。
    /// 可用点不足 100·num_background 时返回零。
    pub fn guess_background_parameters(
        &self,
        two_theta: &[f64],
        reference_intensities: &[f64],
    ) -> Vec<f64> {
        let n = self.num_background;
        if self.reflections.is_empty() {
            return vec![0.0; n];
        }
        let pattern_width = self.reflections.last().unwrap().two_theta_deg
            - self.reflections.first().unwrap().two_theta_deg;
        let exclusion = pattern_width / 100.0;

        let mut fit_angles = Vec::with_capacity(two_theta.len());
        let mut fit_intensities = Vec::with_capacity(two_theta.len());
        for (&t, &i) in two_theta.iter().zip(reference_intensities) {
            let near_peak = self
                .reflections
                .iter()
                .any(|r| (t - r.two_theta_deg).abs() < exclusion);
            if !near_peak {
                fit_angles.push(t);
                fit_intensities.push(i);
            }
        }

        if fit_angles.len() < n * 100 {
            return vec![0.0; n];
        }

        // 基函数设计矩阵
        let mut design = DMatrix::<f64>::zeros(fit_angles.len(), n);
        for (row, &t) in fit_angles.iter().enumerate() {
            if self.use_chebyshev {
                design[(row, 0)] = 1.0;
                if n < 2 {
                    continue;
                }
                let x = 2.0 * (t - self.min_two_theta) / (self.max_two_theta - self.min_two_theta)
                    - 1.0;
                design[(row, 1)] = x;
                for col in 2..n {
                    design[(row, col)] =
                        2.0 * x * design[(row, col - 1)] - design[(row, col - 2)];
                }
            } else {
                let mut x = t.powi(self.background_poly_start);
                for col in 0..n {
                    design[(row, col)] = x;
                    x *= t;
                }
            }
        }
        let y = DVector::from_vec(fit_intensities);
        match design.svd(true, true).solve(&y, 1e-12) {
            Ok(solution) => solution.iter().map(|v| v / self.optimal_scale).collect(),
            Err(_) => vec![0.0; n],
        }
    }

    /// 峰宽参数初值：扫描参考曲线的半高穿越并取平均宽度，上限 1
    pub fn guess_peak_width(&self, two_theta: &[f64], reference_intensities: &[f64]) -> f64 {
        let half_max = reference_intensities.iter().fold(0.0_f64, |a, &b| a.max(b)) / 2.0;

        let mut pos = 0;
        while pos < reference_intensities.len() && reference_intensities[pos] > half_max {
            pos += 1;
        }

        let mut widths = Vec::new();
        let mut is_above = false;
        let mut start_angle = 0.0;
        while pos < two_theta.len() {
            if is_above {
                if reference_intensities[pos] < half_max {
                    is_above = false;
                    widths.push(two_theta[pos] - start_angle);
                }
            } else if reference_intensities[pos] > half_max {
                is_above = true;
                start_angle = two_theta[pos];
            }
            pos += 1;
        }

        if widths.is_empty() {
            return self.w_factor;
        }
        let mean = widths.iter().sum::<f64>() / widths.len() as f64;
        mean.min(1.0)
    }

    // ── 输出用合并峰 ──

    /// 合并后的峰列表：已匹配时按匹配下标合并并标度到最大 1000，
    /// 未匹配时合并 0.15° 内的相邻反射
    pub fn combined_peaks(&self) -> Vec<MeasuredPeak> {
        if self.reflections.is_empty() {
            return Vec::new();
        }
        let mut angles = vec![self.reflections[0].two_theta_deg];
        let mut intensities = vec![self.reflections[0].intensity];
        let scale;

        if !self.matching_peaks.is_empty() {
            let mut last_index = self.reflections[0].pattern_index;
            for r in self.reflections.iter().skip(1) {
                if r.pattern_index.is_none() || r.pattern_index != last_index {
                    angles.push(r.two_theta_deg);
                    intensities.push(r.intensity);
                } else {
                    *intensities.last_mut().unwrap() += r.intensity;
                }
                last_index = r.pattern_index;
            }
            let max = intensities.iter().fold(0.0_f64, |a, &b| a.max(b));
            scale = if max > 0.0 { 1000.0 / max } else { 1.0 };
        } else {
            let mut last_angle = f64::NEG_INFINITY;
            for r in self.reflections.iter().skip(1) {
                if r.two_theta_deg - last_angle > 0.15 {
                    angles.push(r.two_theta_deg);
                    intensities.push(r.intensity);
                    last_angle = r.two_theta_deg;
                } else {
                    *intensities.last_mut().unwrap() += r.intensity;
                }
            }
            scale = 1.0;
        }

        angles
            .into_iter()
            .zip(intensities)
            .map(|(t, i)| MeasuredPeak::new(t, i * scale))
            .collect()
    }
}

impl DiffractionData for CalculatedPattern {
    fn wavelength(&self) -> f64 {
        self.wavelength
    }

    fn min_two_theta(&self) -> f64 {
        self.min_two_theta
    }

    fn max_two_theta(&self) -> f64 {
        self.max_two_theta
    }

    fn peaks(&self) -> Result<Vec<MeasuredPeak>> {
        if !self.structure_is_defined() {
            return Err(PowderError::StructureNotDefined);
        }
        Ok(self.reflections.iter().map(|r| r.as_measured()).collect())
    }

    fn measurement_angles(&self) -> Result<Vec<f64>> {
        Ok(self.pattern_angles())
    }

    fn measured_intensities(&self) -> Result<Vec<f64>> {
        let angles = self.pattern_angles();
        Ok(self.intensity_at(&angles))
    }
}

fn is_identity(m: &Matrix3<f64>) -> bool {
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            if (m[(i, j)] - expected).abs() > 1e-8 {
                return false;
            }
        }
    }
    true
}

/// 带容差的字典序比较：a 是否严格小于 b
fn lex_smaller(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    for i in 0..3 {
        if a[i] < b[i] - HKL_TOL {
            return true;
        }
        if (a[i] - b[i]).abs() >= HKL_TOL {
            return false;
        }
    }
    false
}

fn hkl_equal(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    (a[0] - b[0]).abs() < HKL_TOL && (a[1] - b[1]).abs() < HKL_TOL && (a[2] - b[2]).abs() < HKL_TOL
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Atom, Basis, Crystal, Lattice, Symmetry, SymmetryOperation};

    pub(crate) fn cubic_point_group() -> Vec<SymmetryOperation> {
        let perms = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut ops = Vec::with_capacity(48);
        for perm in perms {
            for signs in 0..8 {
                let mut m = Matrix3::zeros();
                for (row, &col) in perm.iter().enumerate() {
                    let sign = if (signs >> row) & 1 == 1 { -1.0 } else { 1.0 };
                    m[(row, col)] = sign;
                }
                ops.push(SymmetryOperation::new(m, vec![Vector3::zeros()]));
            }
        }
        ops
    }

    pub(crate) fn fcc_crystal(name: &str, element: &str, z: u32, a: f64) -> Crystal {
        let basis = Basis::new(Lattice::from_parameters(a, a, a, 90.0, 90.0, 90.0)).unwrap();
        let atoms = vec![
            Atom::new(element, z, [0.0, 0.0, 0.0]),
            Atom::new(element, z, [0.5, 0.5, 0.0]),
            Atom::new(element, z, [0.5, 0.0, 0.5]),
            Atom::new(element, z, [0.0, 0.5, 0.5]),
        ];
        Crystal::new(name, basis, atoms)
    }

    pub(crate) fn aluminium_pattern() -> CalculatedPattern {
        let crystal = fcc_crystal("Al", "Al", 13, 4.0495);
        let symmetry = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        let mut pattern = CalculatedPattern::new();
        pattern.set_wavelength(1.5406);
        pattern.set_range(10.0, 100.0);
        pattern.set_structure(&crystal, &symmetry).unwrap();
        pattern
    }

    /// 强度高于最大值 1e-6 的反射（消光反射保留但强度为零）
    fn visible_peaks(pattern: &CalculatedPattern) -> Vec<(f64, f64, Vector3<f64>)> {
        let max = pattern
            .reflections()
            .iter()
            .map(|r| r.intensity)
            .fold(0.0_f64, f64::max);
        pattern
            .reflections()
            .iter()
            .filter(|r| r.intensity > 1e-6 * max)
            .map(|r| (r.two_theta_deg, r.intensity, r.representative_hkl()))
            .collect()
    }

    #[test]
    fn test_aluminium_first_five_reflections() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        let visible = visible_peaks(&pattern);

        let expected = [
            ([1.0, 1.0, 1.0], 38.47),
            ([2.0, 0.0, 0.0], 44.72),
            ([2.0, 2.0, 0.0], 65.10),
            ([3.0, 1.0, 1.0], 78.23),
            ([2.0, 2.0, 2.0], 82.43),
        ];
        assert!(visible.len() >= 5);
        for (i, (hkl, angle)) in expected.iter().enumerate() {
            let (two_theta, _, rep) = &visible[i];
            assert!(
                (two_theta - angle).abs() < 0.05,
                "peak {} at {:.3}, expected {:.2}",
                i,
                two_theta,
                angle
            );
            let mut abs_rep = [rep[0].abs(), rep[1].abs(), rep[2].abs()];
            abs_rep.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let mut abs_expected = *hkl;
            abs_expected.sort_by(|a, b| b.partial_cmp(a).unwrap());
            for d in 0..3 {
                assert!((abs_rep[d] - abs_expected[d]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_aluminium_111_200_intensity_ratio() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        // |F(111)|² / |F(200)|² ≈ 1.12（B = 0.5，Cromer–Mann 参数）
        let crystal = pattern.crystal.as_ref().unwrap();
        let symmetry = pattern.symmetry.as_ref().unwrap();
        let f111 = {
            let hkl = Vector3::new(1.0, 1.0, 1.0);
            let theta = Reflection::diffraction_angle(&crystal.basis, &hkl, pattern.wavelength);
            crate::xrd::peak::structure_factor_squared(
                RadiationMethod::Xray,
                pattern.wavelength,
                crystal,
                symmetry,
                theta,
                &hkl,
                &pattern.b_factors,
                &pattern.atf_params,
            )
        };
        let f200 = {
            let hkl = Vector3::new(2.0, 0.0, 0.0);
            let theta = Reflection::diffraction_angle(&crystal.basis, &hkl, pattern.wavelength);
            crate::xrd::peak::structure_factor_squared(
                RadiationMethod::Xray,
                pattern.wavelength,
                crystal,
                symmetry,
                theta,
                &hkl,
                &pattern.b_factors,
                &pattern.atf_params,
            )
        };
        let ratio = f111 / f200;
        assert!((ratio - 1.1247).abs() < 0.01, "ratio = {:.4}", ratio);
    }

    #[test]
    fn test_reflection_invariants() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        for r in pattern.reflections() {
            assert!(r.two_theta_deg >= 0.0 && r.two_theta_deg <= 100.0);
            assert!(r.multiplicity >= 1);
            assert_eq!(r.multiplicity, r.equiv_hkl.len());
            assert_eq!(r.multiplicity, r.recip_vectors.len());
        }
        // 列表按 2θ 升序
        for pair in pattern.reflections().windows(2) {
            assert!(pair[0].two_theta_deg <= pair[1].two_theta_deg);
        }
    }

    #[test]
    fn test_compute_is_idempotent() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        let first: Vec<(f64, f64, usize)> = pattern
            .reflections()
            .iter()
            .map(|r| (r.two_theta_deg, r.intensity, r.multiplicity))
            .collect();
        pattern.compute().unwrap();
        let second: Vec<(f64, f64, usize)> = pattern
            .reflections()
            .iter()
            .map(|r| (r.two_theta_deg, r.intensity, r.multiplicity))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nacl_111_weak_200_strong() {
        let a = 5.6402;
        let basis = Basis::new(Lattice::from_parameters(a, a, a, 90.0, 90.0, 90.0)).unwrap();
        let atoms = vec![
            Atom::new("Na", 11, [0.0, 0.0, 0.0]),
            Atom::new("Na", 11, [0.5, 0.5, 0.0]),
            Atom::new("Na", 11, [0.5, 0.0, 0.5]),
            Atom::new("Na", 11, [0.0, 0.5, 0.5]),
            Atom::new("Cl", 17, [0.5, 0.5, 0.5]),
            Atom::new("Cl", 17, [0.0, 0.0, 0.5]),
            Atom::new("Cl", 17, [0.0, 0.5, 0.0]),
            Atom::new("Cl", 17, [0.5, 0.0, 0.0]),
        ];
        let crystal = Crystal::new("NaCl", basis, atoms);
        let symmetry = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        let mut pattern = CalculatedPattern::new();
        pattern.set_range(10.0, 90.0);
        pattern.set_structure(&crystal, &symmetry).unwrap();
        pattern.compute().unwrap();

        let find = |h: f64, k: f64, l: f64| {
            pattern
                .reflections()
                .iter()
                .find(|r| {
                    let rep = r.representative_hkl();
                    let mut abs: Vec<f64> = (0..3).map(|i| rep[i].abs()).collect();
                    abs.sort_by(|x, y| y.partial_cmp(x).unwrap());
                    (abs[0] - h).abs() < 1e-6 && (abs[1] - k).abs() < 1e-6 && (abs[2] - l).abs() < 1e-6
                })
                .map(|r| r.intensity)
                .unwrap()
        };
        let i111 = find(1.0, 1.0, 1.0);
        let i200 = find(2.0, 0.0, 0.0);
        // Na/Cl 散射因子差保证 (111) 弱而非零，(200) 强
        assert!(i111 > 0.0);
        assert!(i200 > 5.0 * i111);
    }

    #[test]
    fn test_silicon_222_absent_but_reported() {
        let a = 5.431;
        let basis = Basis::new(Lattice::from_parameters(a, a, a, 90.0, 90.0, 90.0)).unwrap();
        let mut positions = Vec::new();
        for base in [[0.0, 0.0, 0.0], [0.25, 0.25, 0.25]] {
            for offset in [[0.0, 0.0, 0.0], [0.5, 0.5, 0.0], [0.5, 0.0, 0.5], [0.0, 0.5, 0.5]] {
                positions.push([
                    (base[0] + offset[0]) % 1.0,
                    (base[1] + offset[1]) % 1.0,
                    (base[2] + offset[2]) % 1.0,
                ]);
            }
        }
        let atoms: Vec<Atom> = positions
            .into_iter()
            .map(|p| Atom::new("Si", 14, p))
            .collect();
        let crystal = Crystal::new("Si", basis, atoms);
        let symmetry = Symmetry::p1(&crystal);
        let mut pattern = CalculatedPattern::new();
        pattern.set_range(10.0, 100.0);
        pattern.set_structure(&crystal, &symmetry).unwrap();
        pattern.compute().unwrap();

        // (222) 因系统消光强度为零，但反射并未被剔除
        let two_theta_222 = {
            let hkl = Vector3::new(2.0, 2.0, 2.0);
            2.0 * Reflection::diffraction_angle(&crystal.basis, &hkl, pattern.wavelength)
                .to_degrees()
        };
        let reflection = pattern
            .reflections()
            .iter()
            .find(|r| (r.two_theta_deg - two_theta_222).abs() < 1e-6)
            .expect("(222) reflection should be present");
        let max = pattern
            .reflections()
            .iter()
            .map(|r| r.intensity)
            .fold(0.0_f64, f64::max);
        assert!(reflection.intensity < 1e-9 * max);
    }

    #[test]
    fn test_zero_occupancy_gives_zero_structure_factors() {
        let mut crystal = fcc_crystal("Al", "Al", 13, 4.0495);
        for atom in &mut crystal.atoms {
            atom.occupancy = 0.0;
        }
        let symmetry = Symmetry::from_operations(&crystal, cubic_point_group()).unwrap();
        let mut pattern = CalculatedPattern::new();
        pattern.set_structure(&crystal, &symmetry).unwrap();
        pattern.compute().unwrap();
        for r in pattern.reflections() {
            assert!(r.intensity.abs() < 1e-20);
        }
    }

    #[test]
    fn test_profile_integral_matches_intensity() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        let strongest = pattern
            .reflections()
            .iter()
            .max_by(|a, b| a.intensity.partial_cmp(&b.intensity).unwrap())
            .unwrap()
            .clone();
        let mut single = pattern.clone();
        single.reflections = vec![strongest.clone()];
        single.background_parameters.clear();

        let step = 1e-3;
        let lo = strongest.two_theta_deg - 8.0;
        let hi = strongest.two_theta_deg + 8.0;
        let count = ((hi - lo) / step) as usize + 1;
        let grid: Vec<f64> = (0..count).map(|i| lo + i as f64 * step).collect();

        // 纯 Gaussian 峰形在 ±6H 窗口内应在 1% 内还原积分强度
        single.set_peak_shape(1.0, 0.0, 0.0);
        let profile = single.generate_peak_signal(&grid);
        let integral: f64 = profile.iter().sum::<f64>() * step;
        assert!(
            (integral - strongest.intensity).abs() < 0.01 * strongest.intensity,
            "integral = {}, intensity = {}",
            integral,
            strongest.intensity
        );

        // 含 Lorentzian 成分时 ±6H 截断损失其尾部，偏差放宽到 5%
        single.set_peak_shape(0.5, 0.0, 0.0);
        let profile = single.generate_peak_signal(&grid);
        let integral: f64 = profile.iter().sum::<f64>() * step;
        assert!((integral - strongest.intensity).abs() < 0.05 * strongest.intensity);
    }

    #[test]
    fn test_zero_model_gives_zero_profile() {
        let mut pattern = aluminium_pattern();
        for atom in &mut pattern.crystal.as_mut().unwrap().atoms {
            atom.occupancy = 0.0;
        }
        pattern.calculate_peak_intensities();
        pattern.background_parameters = vec![0.0; 5];
        let angles = pattern.pattern_angles();
        let profile = pattern.intensity_at(&angles);
        assert!(profile.iter().all(|&v| v.abs() < 1e-20));
    }

    #[test]
    fn test_chebyshev_background() {
        let mut pattern = CalculatedPattern::new();
        pattern.set_range(10.0, 90.0);
        pattern.background_parameters = vec![2.0, 0.5, 0.25];
        let angles = [10.0, 50.0, 90.0];
        let bg = pattern.generate_background_signal(&angles);
        // x = -1, 0, 1；T2 = 2x² - 1
        assert!((bg[0] - (2.0 - 0.5 + 0.25)).abs() < 1e-12);
        assert!((bg[1] - (2.0 - 0.25)).abs() < 1e-12);
        assert!((bg[2] - (2.0 + 0.5 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_polynomial_background_with_laurent_start() {
        let mut pattern = CalculatedPattern::new();
        pattern.set_use_chebyshev(false);
        pattern.background_parameters = vec![4.0, 1.0];
        // I(x) = 4/x + 1
        let bg = pattern.generate_background_signal(&[2.0, 4.0]);
        assert!((bg[0] - 3.0).abs() < 1e-12);
        assert!((bg[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_symmetry_reduction_multiplicities() {
        let pattern = aluminium_pattern();
        // 立方晶系：{111} 多重性 8，{200} 多重性 6
        let by_angle = |angle: f64| {
            pattern
                .reflections()
                .iter()
                .find(|r| (r.two_theta_deg - angle).abs() < 0.1)
                .unwrap()
        };
        assert_eq!(by_angle(38.47).multiplicity, 8);
        assert_eq!(by_angle(44.72).multiplicity, 6);
    }
}
