//! # 实验衍射图样处理
//!
//! 读入实验粉末衍射数据并提取积分峰强度。
//!
//! 均匀角度间隔的长序列按原始谱处理：平滑 → 扣本底 → 导数定峰 →
//! Gaussian / 伪 Voigt 拟合 → 自适应 Simpson 积分。非均匀间隔或点数
//! 较少的输入视为已积分峰位直接存储。
//!
//! 处理失败（积分强度为负、峰顶出界）时丢弃整个峰列表，
//! 原始连续数据保留。
//!
//! ## 文本格式
//! 每行一条记录，空白分隔；`wavelength`（前 4 字符即可，不分大小写）
//! 开头的行设定波长；前两个记号均为数值的行为 `2θ 强度` 数据；
//! 空行、注释行（# 或 *）与记号不足的行跳过。
//!
//! ## 依赖关系
//! - 使用 `numeric/lm.rs` 做峰拟合、`numeric/simpson.rs` 做积分
//! - 使用 `xrd/peak.rs` 的 MeasuredPeak
//! - 拟合模型形式参照 lmopt 的峰模型约定

use crate::error::{PowderError, Result};
use crate::numeric::lm::{self, CurveModel};
use crate::numeric::{maximize_scalar, simpson};
use crate::xrd::peak::MeasuredPeak;
use crate::xrd::DiffractionData;
use std::path::Path;

/// 峰检测阈值：最大强度的比例
const PEAK_TOL: f64 = 0.01;
/// 过滤阈值：峰高低于最大值的 2% 合并入邻峰
const HEIGHT_FILTER: f64 = 0.02;
/// 过滤阈值：峰跨度下限（度）
const SPAN_FILTER: f64 = 0.05;
/// 峰间隔小于该值（度）时合为一组联合拟合
const GROUP_GAP: f64 = 0.1;
/// LM 拟合收敛容差
const FIT_TOL: f64 = 1e-5;

/// 实验粉末衍射图样
#[derive(Debug, Clone, Default)]
pub struct ExperimentalPattern {
    wavelength: f64,
    min_two_theta: f64,
    max_two_theta: f64,
    resolution: f64,
    continuous_two_theta: Vec<f64>,
    continuous_intensity: Vec<f64>,
    diffraction_peaks: Vec<MeasuredPeak>,
}

impl ExperimentalPattern {
    pub fn new() -> Self {
        ExperimentalPattern {
            wavelength: 1.5418,
            min_two_theta: 10.0,
            max_two_theta: 100.0,
            resolution: 0.02,
            continuous_two_theta: Vec::new(),
            continuous_intensity: Vec::new(),
            diffraction_peaks: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.continuous_two_theta.clear();
        self.continuous_intensity.clear();
        self.diffraction_peaks.clear();
    }

    pub fn set_wavelength(&mut self, wavelength: f64) {
        self.wavelength = wavelength;
    }

    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    pub fn has_continuous_data(&self) -> bool {
        !self.continuous_two_theta.is_empty()
    }

    pub fn diffraction_peaks(&self) -> &[MeasuredPeak] {
        &self.diffraction_peaks
    }

    // ── 文件与文本导入 ──

    /// 判断文本是否可识别为衍射数据：非空非注释行中
    /// 至少一半具有两个数值记号
    pub fn is_format(text: &str) -> bool {
        let mut line_count = 0;
        let mut pair_count = 0;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(trimmed) {
                continue;
            }
            line_count += 1;
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() < 2 {
                continue;
            }
            if is_number(tokens[0]) && is_number(tokens[1]) {
                pair_count += 1;
            }
        }
        line_count > 0 && pair_count as f64 / line_count as f64 >= 0.5
    }

    /// 从文件读取衍射数据
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PowderError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        if !Self::is_format(&content) {
            return Err(PowderError::NotADiffractionPattern {
                path: path.display().to_string(),
            });
        }
        Self::from_text(&content)
    }

    /// 从文本解析衍射数据
    pub fn from_text(text: &str) -> Result<Self> {
        let mut pattern = ExperimentalPattern::new();
        let mut two_theta = Vec::new();
        let mut intensity = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(trimmed) {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() < 2 {
                continue;
            }

            if is_wavelength_keyword(tokens[0]) {
                pattern.wavelength = tokens[1].parse().map_err(|_| PowderError::ParseError {
                    format: "diffraction".into(),
                    path: String::new(),
                    reason: format!("unrecognized wavelength value `{}`", tokens[1]),
                })?;
            } else if is_number(tokens[0]) && is_number(tokens[1]) {
                two_theta.push(tokens[0].parse().unwrap());
                intensity.push(tokens[1].parse().unwrap());
            }
        }

        pattern.set_points(two_theta, intensity);
        Ok(pattern)
    }

    // ── 数据导入与原始谱处理 ──

    /// 存入 (2θ, 强度) 数据并确定峰位与积分强度。
    ///
    /// 均匀间隔且点数足够多（≥ 500）时按原始谱运行完整处理管线；
    /// 否则视为已积分峰位直接存储。
    pub fn set_points(&mut self, two_theta: Vec<f64>, intensity: Vec<f64>) {
        self.clear();
        if two_theta.is_empty() {
            return;
        }

        // 按角度升序排列
        let mut pairs: Vec<(f64, f64)> = two_theta.into_iter().zip(intensity).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let two_theta: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let intensity: Vec<f64> = pairs.iter().map(|p| p.1).collect();

        // 最大/最小间隔决定数据形态
        let mut min_dif = 0.0;
        let mut max_dif = 0.0;
        if two_theta.len() >= 2 {
            min_dif = two_theta[1] - two_theta[0];
            max_dif = min_dif;
            for pair in two_theta.windows(2) {
                let dif = pair[1] - pair[0];
                if dif < min_dif {
                    min_dif = dif;
                } else if dif > max_dif {
                    max_dif = dif;
                }
            }
        }

        if (max_dif > 1.1 * min_dif || max_dif == 0.0) && two_theta.len() < 500 {
            // 已积分峰位
            log::info!("importing an already-processed pattern");
            self.diffraction_peaks = two_theta
                .iter()
                .zip(&intensity)
                .map(|(&t, &i)| MeasuredPeak::new(t, i))
                .collect();
            self.diffraction_peaks
                .sort_by(|a, b| a.two_theta_deg.partial_cmp(&b.two_theta_deg).unwrap());
            self.min_two_theta = self.diffraction_peaks[0].two_theta_deg - self.resolution;
            self.max_two_theta =
                self.diffraction_peaks.last().unwrap().two_theta_deg + self.resolution / 2.0;
        } else {
            log::info!("processing a raw diffraction pattern");
            self.continuous_two_theta = two_theta.clone();
            self.continuous_intensity = intensity.clone();
            self.min_two_theta = two_theta[0];
            self.max_two_theta = *two_theta.last().unwrap();

            let mut working = intensity;
            smooth_data(&mut working, 2, 0.25);
            remove_background(&two_theta, &mut working);

            let (peak_angles, peak_intensities) = locate_peaks(&two_theta, &working);
            match self.integrate_peaks(&peak_angles, &peak_intensities) {
                Ok(peaks) => self.diffraction_peaks = peaks,
                Err(e) => {
                    log::warn!("peak extraction failed: {e}");
                    self.diffraction_peaks.clear();
                }
            }
        }
    }

    /// 对检出的峰做 Gaussian → 复合 Gaussian → 复合伪 Voigt 拟合，
    /// 再积分得到 (峰位, 积分强度)
    fn integrate_peaks(
        &self,
        peak_angles: &[Vec<f64>],
        peak_intensities: &[Vec<f64>],
    ) -> Result<Vec<MeasuredPeak>> {
        if peak_angles.is_empty() {
            return Ok(Vec::new());
        }

        // 每个峰的数据点
        let points: Vec<Vec<(f64, f64)>> = peak_angles
            .iter()
            .zip(peak_intensities)
            .map(|(a, i)| a.iter().copied().zip(i.iter().copied()).collect())
            .collect();

        // 第一步：单峰 Gaussian 拟合
        let mut gaussian_params: Vec<Vec<f64>> = Vec::with_capacity(points.len());
        for peak_points in &points {
            let (mut mu, mut height) = peak_points[0];
            for &(x, y) in peak_points.iter().skip(1) {
                if y > height {
                    mu = x;
                    height = y;
                }
            }
            let initial = [0.25, mu, height];
            gaussian_params.push(lm::fit(&GaussianPeak, peak_points, &initial, FIT_TOL));
        }

        // 第二步：相邻峰分组（间隔 < 0.1°）
        let mut groups: Vec<Vec<usize>> = vec![vec![0]];
        for peak in 1..peak_angles.len() {
            let start = peak_angles[peak][0];
            let last_end = *peak_angles[*groups.last().unwrap().last().unwrap()]
                .last()
                .unwrap();
            if start - last_end < GROUP_GAP {
                groups.last_mut().unwrap().push(peak);
            } else {
                groups.push(vec![peak]);
            }
        }
        let group_points: Vec<Vec<(f64, f64)>> = groups
            .iter()
            .map(|group| group.iter().flat_map(|&p| points[p].clone()).collect())
            .collect();

        // 第三步：组内联合 Gaussian 拟合
        for (group, data) in groups.iter().zip(&group_points) {
            if group.len() == 1 {
                continue;
            }
            let initial: Vec<f64> = group
                .iter()
                .flat_map(|&p| gaussian_params[p].clone())
                .collect();
            let model = CompositeGaussian { count: group.len() };
            let fitted = lm::fit(&model, data, &initial, FIT_TOL);
            for (slot, &p) in group.iter().enumerate() {
                gaussian_params[p] = fitted[slot * 3..slot * 3 + 3].to_vec();
            }
        }

        // 第四步：Gaussian 解转为伪 Voigt 初值后组内联合拟合
        let mut pv_params: Vec<Vec<f64>> = gaussian_params
            .iter()
            .map(|g| vec![1.0, 0.0, 0.0, g[1], g[0], 0.0, 0.0, g[2]])
            .collect();
        for (group, data) in groups.iter().zip(&group_points) {
            let initial: Vec<f64> = group.iter().flat_map(|&p| pv_params[p].clone()).collect();
            let model = CompositePseudoVoigt { count: group.len() };
            let fitted = lm::fit(&model, data, &initial, FIT_TOL);
            for (slot, &p) in group.iter().enumerate() {
                pv_params[p] = fitted[slot * 8..slot * 8 + 8].to_vec();
            }
        }

        // 第五步：数值求峰顶位置并在组窗口上积分
        let mut output = Vec::new();
        for group in &groups {
            let group_min = peak_angles[*group.first().unwrap()][0];
            let group_max = *peak_angles[*group.last().unwrap()].last().unwrap();
            for &p in group {
                let params = &pv_params[p];
                let (location, _) =
                    maximize_scalar(|x| PseudoVoigt.value(params, x), params[3], 1e-3, 1e-8);
                let intensity = simpson::integrate(
                    &|x| PseudoVoigt.value(params, x),
                    group_min,
                    group_max,
                    1e-8,
                );

                if intensity < 0.0 {
                    return Err(PowderError::NegativeIntegratedIntensity {
                        two_theta: location,
                    });
                }
                if location < self.min_two_theta || location > self.max_two_theta {
                    return Err(PowderError::PeakOutsideRange {
                        two_theta: location,
                    });
                }
                output.push(MeasuredPeak::new(location, intensity));
            }
        }
        output.sort_by(|a, b| a.two_theta_deg.partial_cmp(&b.two_theta_deg).unwrap());
        Ok(output)
    }

    /// 连续数据的线性插值。查询角必须落在测量范围内。
    pub fn continuous_intensity_at(&self, two_theta: &[f64]) -> Result<Vec<f64>> {
        if !self.has_continuous_data() {
            return Err(PowderError::NoContinuousData);
        }
        let mut sorted = two_theta.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if sorted[0] < self.continuous_two_theta[0]
            || *sorted.last().unwrap() > *self.continuous_two_theta.last().unwrap()
        {
            return Err(PowderError::InvalidArgument(format!(
                "no data outside [{:.3}, {:.3}]",
                self.continuous_two_theta[0],
                self.continuous_two_theta.last().unwrap()
            )));
        }

        let mut output = Vec::with_capacity(sorted.len());
        let mut pos = 0;
        for &angle in &sorted {
            while self.continuous_two_theta[pos + 1] < angle {
                pos += 1;
            }
            let t0 = self.continuous_two_theta[pos];
            let t1 = self.continuous_two_theta[pos + 1];
            let i0 = self.continuous_intensity[pos];
            let i1 = self.continuous_intensity[pos + 1];
            output.push(i0 + (i1 - i0) / (t1 - t0) * (angle - t0));
        }
        Ok(output)
    }
}

impl DiffractionData for ExperimentalPattern {
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
        if self.diffraction_peaks.is_empty() {
            return Err(PowderError::NoPeaks {
                reason: "no diffracted intensities were set; import may have failed".into(),
            });
        }
        Ok(self.diffraction_peaks.clone())
    }

    fn measurement_angles(&self) -> Result<Vec<f64>> {
        if !self.has_continuous_data() {
            return Err(PowderError::NoContinuousData);
        }
        Ok(self.continuous_two_theta.clone())
    }

    fn measured_intensities(&self) -> Result<Vec<f64>> {
        if !self.has_continuous_data() {
            return Err(PowderError::NoContinuousData);
        }
        Ok(self.continuous_intensity.clone())
    }
}

// ── 原始谱处理步骤 ──

/// 线性锥形权重平滑：中心权重 1，两端权重 `edge_weight`，
/// 中间线性插值，权重归一化。只处理两侧有完整邻域的点。
fn smooth_data(intensity: &mut [f64], num_per_side: usize, edge_weight: f64) {
    let window = num_per_side * 2 + 1;
    if intensity.len() < window {
        return;
    }

    let mut weight = vec![0.0; window];
    weight[num_per_side] = 1.0;
    let mut total = 1.0;
    for i in 1..=num_per_side {
        let w = 1.0 + (edge_weight - 1.0) * i as f64 / num_per_side as f64;
        total += 2.0 * w;
        weight[num_per_side - i] = w;
        weight[num_per_side + i] = w;
    }
    for w in &mut weight {
        *w /= total;
    }

    let original = intensity.to_vec();
    for i in num_per_side..intensity.len() - num_per_side {
        let start = i - num_per_side;
        intensity[i] = weight
            .iter()
            .enumerate()
            .map(|(j, w)| w * original[start + j])
            .sum();
    }
}

/// 扣除本底：每点取角度半宽约 2° 窗口内的加权平均，
/// 权重 (1/I)⁴（非正强度取 10⁴），使本底点主导、峰点被压制。
fn remove_background(two_theta: &[f64], intensity: &mut [f64]) {
    if two_theta.len() < 2 {
        return;
    }
    let box_size = 4.0;
    let n_points = (box_size / (two_theta[1] - two_theta[0])) as usize;
    let points_per_side = n_points / 2;

    let fit_weight: Vec<f64> = intensity
        .iter()
        .map(|&i| {
            // 1/I 上限防止权重四次方溢出
            let inv = if i > 0.0 { (1.0 / i).min(1e8) } else { 10.0 };
            inv.powi(4)
        })
        .collect();

    let mut background = vec![0.0; intensity.len()];
    for point in 0..background.len() {
        let reach = point
            .min(points_per_side)
            .min(background.len() - 1 - point);
        let mut total_weight = 0.0;
        for neighbor in point - reach..=point + reach {
            background[point] += fit_weight[neighbor] * intensity[neighbor];
            total_weight += fit_weight[neighbor];
        }
        background[point] /= total_weight;
    }

    for (i, b) in intensity.iter_mut().zip(background) {
        *i -= b;
    }
}

/// 中心差分一阶导数，两端复制邻值。假定等距采样。
fn first_derivative(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut d = vec![0.0; x.len()];
    if x.len() < 3 {
        return d;
    }
    let h = 2.0 * (x[1] - x[0]);
    for i in 1..x.len() - 1 {
        d[i] = (y[i + 1] - y[i - 1]) / h;
    }
    d[0] = d[1];
    let last = d.len() - 1;
    d[last] = d[last - 1];
    d
}

/// 中心差分二阶导数，两端复制邻值。假定等距采样。
fn second_derivative(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut d = vec![0.0; x.len()];
    if x.len() < 3 {
        return d;
    }
    let h2 = (x[1] - x[0]).powi(2);
    for i in 1..x.len() - 1 {
        d[i] = (y[i + 1] - 2.0 * y[i] + y[i - 1]) / h2;
    }
    d[0] = d[1];
    let last = d.len() - 1;
    d[last] = d[last - 1];
    d
}

/// 由平滑导数的符号序列检出峰：I > 阈值 ∧ I''>0 → I''<0 → I'<0 →
/// I''>0，中心在 I' 过零处。随后向两侧谷底扩展峰边界，
/// 过小的峰并入相邻接触峰。
fn locate_peaks(two_theta: &[f64], intensity: &[f64]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let n = two_theta.len();
    if n < 7 {
        return (Vec::new(), Vec::new());
    }
    let max_height = intensity.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let peak_tol = PEAK_TOL * max_height;

    let mut d1 = first_derivative(two_theta, intensity);
    smooth_data(&mut d1, 3, 1.0);
    let mut d2 = second_derivative(two_theta, intensity);
    smooth_data(&mut d2, 3, 1.0);

    // 第一部分：导数符号状态机确定峰中心
    let mut centers = Vec::new();
    let mut pos = 0;
    'scan: while pos < n {
        while intensity[pos] < peak_tol || d2[pos] < 0.0 {
            pos += 1;
            if pos == n {
                break 'scan;
            }
        }
        while d2[pos] > 0.0 {
            pos += 1;
            if pos == n {
                break 'scan;
            }
        }
        while d1[pos] > 0.0 {
            pos += 1;
            if pos == n {
                break 'scan;
            }
        }
        centers.push(pos);
        while d2[pos] < 0.0 {
            pos += 1;
            if pos == n {
                // 峰未完成
                centers.pop();
                break 'scan;
            }
        }
    }
    if centers.is_empty() {
        return (Vec::new(), Vec::new());
    }

    // 第二部分：以相邻谷底为界、强度为正的范围为峰边界
    let mut peak_angles: Vec<Vec<f64>> = Vec::with_capacity(centers.len());
    let mut peak_intensities: Vec<Vec<f64>> = Vec::with_capacity(centers.len());

    let mut left_minimum = 0;
    let mut best = intensity[0];
    for i in 1..centers[0] {
        if intensity[i] < best {
            best = intensity[i];
            left_minimum = i;
        }
    }

    for (c, &center) in centers.iter().enumerate() {
        // 本峰与下一峰之间的谷底
        let right_bound = if c == centers.len() - 1 {
            n
        } else {
            centers[c + 1]
        };
        let mut right_minimum = center;
        let mut best = intensity[center];
        for i in center..right_bound {
            if intensity[i] < best {
                best = intensity[i];
                right_minimum = i;
            }
        }

        let mut angles = std::collections::VecDeque::new();
        let mut values = std::collections::VecDeque::new();
        let mut i = center as isize;
        while i >= left_minimum as isize && intensity[i as usize] > 0.0 {
            angles.push_front(two_theta[i as usize]);
            values.push_front(intensity[i as usize]);
            i -= 1;
        }
        let mut i = center + 1;
        while i <= right_minimum && intensity[i] > 0.0 {
            angles.push_back(two_theta[i]);
            values.push_back(intensity[i]);
            i += 1;
        }

        if !angles.is_empty() {
            peak_angles.push(angles.into_iter().collect());
            peak_intensities.push(values.into_iter().collect());
        }
        left_minimum = right_minimum;
    }

    // 第三部分：过滤过小的峰，能接触相邻峰则并入
    let mut pos = 0;
    while pos < peak_angles.len() {
        let height = peak_intensities[pos]
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let span = peak_angles[pos].last().unwrap() - peak_angles[pos][0];
        let remove = height < HEIGHT_FILTER * max_height || span < SPAN_FILTER;
        if remove {
            if pos + 1 < peak_angles.len()
                && peak_angles[pos].last().unwrap() == &peak_angles[pos + 1][0]
            {
                let mut angles = peak_angles.remove(pos);
                let mut values = peak_intensities.remove(pos);
                angles.extend(peak_angles[pos].iter());
                values.extend(peak_intensities[pos].iter());
                peak_angles[pos] = angles;
                peak_intensities[pos] = values;
            } else if pos > 0
                && &peak_angles[pos][0] == peak_angles[pos - 1].last().unwrap()
            {
                let angles = peak_angles.remove(pos);
                let values = peak_intensities.remove(pos);
                peak_angles[pos - 1].extend(angles);
                peak_intensities[pos - 1].extend(values);
            } else {
                peak_angles.remove(pos);
                peak_intensities.remove(pos);
            }
        } else {
            pos += 1;
        }
    }

    (peak_angles, peak_intensities)
}

// ── 拟合模型 ──

/// 三参数 Gaussian 峰：[H², μ, I0]，面积归一化为 I0
pub struct GaussianPeak;

impl CurveModel for GaussianPeak {
    fn arity(&self) -> usize {
        3
    }

    fn value(&self, p: &[f64], x: f64) -> f64 {
        let cg = 4.0 * 2.0_f64.ln();
        let dif = x - p[1];
        let e = (-cg * dif * dif / p[0]).exp();
        p[2] * cg.sqrt() * e / (std::f64::consts::PI * p[0]).sqrt()
    }

    fn gradient(&self, p: &[f64], x: f64, out: &mut [f64]) {
        let pi = std::f64::consts::PI;
        let cg = 4.0 * 2.0_f64.ln();
        let dif = x - p[1];
        let e = (-cg * dif * dif / p[0]).exp();
        out[0] = p[2] * cg.sqrt() * (cg * dif * dif - p[0]) * e / (2.0 * pi.sqrt() * p[0].powf(2.5));
        out[1] = 2.0 * cg.powf(1.5) * p[2] * dif * e / ((pi * p[0]).sqrt() * p[0]);
        out[2] = cg.sqrt() * e / (pi * p[0]).sqrt();
    }
}

/// 复合 Gaussian：每 3 个参数对应一个峰
pub struct CompositeGaussian {
    pub count: usize,
}

impl CurveModel for CompositeGaussian {
    fn arity(&self) -> usize {
        3 * self.count
    }

    fn value(&self, p: &[f64], x: f64) -> f64 {
        (0..self.count)
            .map(|f| GaussianPeak.value(&p[f * 3..f * 3 + 3], x))
            .sum()
    }

    fn gradient(&self, p: &[f64], x: f64, out: &mut [f64]) {
        for f in 0..self.count {
            GaussianPeak.gradient(&p[f * 3..f * 3 + 3], x, &mut out[f * 3..f * 3 + 3]);
        }
    }
}

/// 八参数伪 Voigt 峰：[η0, η1, η2, μ, u, v, w, I0]。
/// 峰宽平方 H² = u + v·tan(θ) + w·tan²(θ)，η = η0 + η1·2θ + η2·(2θ)²。
pub struct PseudoVoigt;

impl CurveModel for PseudoVoigt {
    fn arity(&self) -> usize {
        8
    }

    fn value(&self, p: &[f64], x: f64) -> f64 {
        let pi = std::f64::consts::PI;
        let cg = 4.0 * 2.0_f64.ln();
        let dif = x - p[3];
        let t = (x / 2.0).to_radians().tan();
        let sfw = p[4] + p[5] * t + p[6] * t * t;
        let e = (-cg * dif * dif / sfw).exp();
        let eta = p[0] + p[1] * x + p[2] * x * x;
        let den = 1.0 + 4.0 * dif * dif / sfw;

        p[7] * (cg.sqrt() * e * eta / (pi * sfw).sqrt() + 2.0 * (1.0 - eta) / (pi * sfw.sqrt() * den))
    }

    fn gradient(&self, p: &[f64], x: f64, out: &mut [f64]) {
        let pi = std::f64::consts::PI;
        let cg = 4.0 * 2.0_f64.ln();
        let dif = x - p[3];
        let t = (x / 2.0).to_radians().tan();
        let sfw = p[4] + p[5] * t + p[6] * t * t;
        let e = (-cg * dif * dif / sfw).exp();
        let eta = p[0] + p[1] * x + p[2] * x * x;
        let den = 1.0 + 4.0 * dif * dif / sfw;

        // 对 η0, η1, η2
        out[0] = p[7] * (cg.sqrt() * e / (pi * sfw).sqrt() - 2.0 / (pi * sfw.sqrt() * den));
        out[1] = x * out[0];
        out[2] = x * out[1];

        // 对峰位 μ
        let sfw32 = sfw.powf(1.5);
        let den2 = den * den;
        out[3] = p[7]
            * (2.0 * cg.powf(1.5) * e * eta * dif / (pi.sqrt() * sfw32)
                + 16.0 * (1.0 - eta) * dif / (pi * sfw32 * den2));

        // 对 u, v, w
        let sfw52 = sfw.powf(2.5);
        let term1 = cg.powf(1.5) * e * eta * dif * dif / (pi.sqrt() * sfw52);
        let term2 = cg.sqrt() * e * eta / (2.0 * pi.sqrt() * sfw32);
        let term3 = 8.0 * (1.0 - eta) * dif * dif / (pi * sfw52 * den2);
        let term4 = (1.0 - eta) / (pi * sfw32 * den);
        out[4] = p[7] * (term1 - term2 + term3 - term4);
        out[5] = t * out[4];
        out[6] = t * out[5];

        // 对 I0
        out[7] = cg.sqrt() * e * eta / (pi * sfw).sqrt() + 2.0 * (1.0 - eta) / (pi * sfw.sqrt() * den);
    }
}

/// 复合伪 Voigt：每 8 个参数对应一个峰
pub struct CompositePseudoVoigt {
    pub count: usize,
}

impl CurveModel for CompositePseudoVoigt {
    fn arity(&self) -> usize {
        8 * self.count
    }

    fn value(&self, p: &[f64], x: f64) -> f64 {
        (0..self.count)
            .map(|f| PseudoVoigt.value(&p[f * 8..f * 8 + 8], x))
            .sum()
    }

    fn gradient(&self, p: &[f64], x: f64, out: &mut [f64]) {
        for f in 0..self.count {
            PseudoVoigt.gradient(&p[f * 8..f * 8 + 8], x, &mut out[f * 8..f * 8 + 8]);
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('*')
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// `wavelength` 关键字：不分大小写，给出前 4 个以上字符即可
fn is_wavelength_keyword(token: &str) -> bool {
    let lower = token.to_lowercase();
    lower.len() >= 4 && "wavelength".starts_with(&lower)
}
