//! # R 因子引擎
//!
//! 计算峰与参考峰的匹配、积分强度模式与全谱模式下的 R 因子，
//! 以及相应的最优标度因子。
//!
//! R 因子定义参见 doi:10.1107/S0021889893012348。
//!
//! ## 依赖关系
//! - 为 `xrd/pattern.rs` 的 CalculatedPattern 提供匹配与 R 因子方法
//! - 被 `xrd/refine.rs` 作为优化目标调用

use crate::error::{PowderError, Result};
use crate::xrd::pattern::CalculatedPattern;
use crate::xrd::DiffractionData;

/// 计算峰与参考峰匹配的角度容差（度）
const MATCH_TOL: f64 = 0.15;

/// R 因子计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RMethod {
    /// 文献常用的 Rp 型：Σ|I_ref − s·I_calc| / Σ I_ref
    Abs,
    /// 积分强度精修用的可微形式：Σ(I_ref − s·I_calc)² / Σ I_ref²
    Squared,
    /// 全谱精修目标：未归一化加权残差 Σ w·(I_ref − s·(I_calc + bg))²
    Rietveld,
}

impl CalculatedPattern {
    /// 将每个计算峰匹配到角度差最小的参考峰。
    /// 差超过 0.15° 的计算峰记入未匹配列表。
    pub fn match_peaks_to_reference(&mut self, reference: &dyn DiffractionData) -> Result<()> {
        let reference_peaks = reference.peaks()?;
        self.matching_peaks = vec![Vec::new(); reference_peaks.len()];
        self.unmatched_peaks.clear();

        for index in 0..self.reflections.len() {
            let angle = self.reflections[index].two_theta_deg;
            let mut near_index = 0;
            let mut near_dif = f64::INFINITY;
            for (ref_index, ref_peak) in reference_peaks.iter().enumerate() {
                let dif = (angle - ref_peak.two_theta_deg).abs();
                if dif < near_dif {
                    near_index = ref_index;
                    near_dif = dif;
                }
            }

            if near_dif > MATCH_TOL {
                self.reflections[index].pattern_index = None;
                self.unmatched_peaks.push(index);
            } else {
                self.reflections[index].pattern_index = Some(near_index);
                self.matching_peaks[near_index].push(index);
            }
        }
        Ok(())
    }

    /// 积分强度模式 R 因子。内部同时确定并保存最优标度因子。
    ///
    /// 调用前必须已完成峰匹配。
    pub fn integrated_r_factor(
        &mut self,
        reference: &dyn DiffractionData,
        method: RMethod,
    ) -> Result<f64> {
        if self.matching_peaks.is_empty() {
            return Err(PowderError::Other(
                "diffraction peaks must be matched before computing an R factor".into(),
            ));
        }

        let reference_peaks = reference.peaks()?;

        // 参考峰强度、对应的已匹配计算强度之和、未匹配计算强度
        let reference_intensity: Vec<f64> =
            reference_peaks.iter().map(|p| p.intensity).collect();
        let mut matched_intensity = vec![0.0; reference_intensity.len()];
        for (i, matches) in self.matching_peaks.iter().enumerate() {
            for &j in matches {
                matched_intensity[i] += self.reflections[j].intensity;
            }
        }
        let unmatched_intensity: Vec<f64> = self
            .unmatched_peaks
            .iter()
            .map(|&j| self.reflections[j].intensity)
            .collect();

        // 归一化因子
        let norm = match method {
            RMethod::Squared => reference_intensity.iter().map(|i| i * i).sum::<f64>(),
            RMethod::Abs => reference_intensity.iter().sum::<f64>(),
            RMethod::Rietveld => {
                return Err(PowderError::Other(
                    "the Rietveld residual is not defined for integrated intensities".into(),
                ))
            }
        };

        // 最优标度因子
        self.optimal_scale = 1.0;
        match method {
            RMethod::Squared => {
                // R 对标度是二次的，一阶条件给出闭式解
                let num: f64 = matched_intensity
                    .iter()
                    .zip(&reference_intensity)
                    .map(|(m, r)| m * r)
                    .sum();
                let mut denom: f64 = matched_intensity.iter().map(|m| m * m).sum();
                denom += unmatched_intensity.iter().map(|u| u * u).sum::<f64>();
                if denom > 0.0 {
                    self.optimal_scale = num / denom;
                }
            }
            RMethod::Abs => {
                // |·| 的分段线性性质保证最小值在某个
                // s = I_ref/I_match 折点处取得，逐个扫描
                let mut minimum_error = f64::INFINITY;
                for i in 0..matched_intensity.len() {
                    if matched_intensity[i] == 0.0 {
                        continue;
                    }
                    let scale = reference_intensity[i] / matched_intensity[i];
                    let mut error = 0.0;
                    for j in 0..matched_intensity.len() {
                        error += (reference_intensity[j] - scale * matched_intensity[j]).abs();
                    }
                    for u in &unmatched_intensity {
                        error += (scale * u).abs();
                    }
                    if error < minimum_error {
                        minimum_error = error;
                        self.optimal_scale = scale;
                    }
                }
            }
            RMethod::Rietveld => unreachable!(),
        }

        // R 因子
        let mut r_factor = 0.0;
        match method {
            RMethod::Squared => {
                for (m, r) in matched_intensity.iter().zip(&reference_intensity) {
                    r_factor += (r - self.optimal_scale * m).powi(2);
                }
                for u in &unmatched_intensity {
                    r_factor += (self.optimal_scale * u).powi(2);
                }
            }
            RMethod::Abs => {
                for (m, r) in matched_intensity.iter().zip(&reference_intensity) {
                    r_factor += (r - self.optimal_scale * m).abs();
                }
                for u in &unmatched_intensity {
                    r_factor += (self.optimal_scale * u).abs();
                }
            }
            RMethod::Rietveld => unreachable!(),
        }
        if norm > 0.0 {
            r_factor /= norm;
        }
        Ok(r_factor)
    }

    /// 全谱模式 R 因子。
    /// `Abs`/`Squared` 在扣除本底后比较峰信号；`Rietveld` 为优化
    /// 目标使用的未归一化加权残差。
    pub fn rietveld_r_factor(
        &self,
        reference: &dyn DiffractionData,
        method: RMethod,
    ) -> Result<f64> {
        let two_theta = reference.measurement_angles()?;
        let raw_reference = reference.measured_intensities()?;
        let background = self.generate_background_signal(&two_theta);

        // 扣除本底后的净参考强度（Rietveld 残差不扣除）
        let net_reference: Vec<f64> = if method != RMethod::Rietveld {
            raw_reference
                .iter()
                .zip(&background)
                .map(|(r, b)| r - self.optimal_scale * b)
                .collect()
        } else {
            Vec::new()
        };

        let calculated = self.generate_peak_signal(&two_theta);

        match method {
            RMethod::Abs => {
                let mut num = 0.0;
                let mut denom = 0.0;
                for (i, &calc) in calculated.iter().enumerate() {
                    let reference_intensity = net_reference[i];
                    // 本底以下的区域不计入
                    if reference_intensity <= 0.0 {
                        continue;
                    }
                    num += (reference_intensity - self.optimal_scale * calc).abs();
                    denom += reference_intensity;
                }
                Ok(if denom > 0.0 { num / denom } else { 1.0 })
            }
            RMethod::Squared => {
                let mut num = 0.0;
                let mut denom = 0.0;
                for i in 0..calculated.len() {
                    let weight = if raw_reference[i] > 0.0 {
                        1.0 / raw_reference[i]
                    } else {
                        0.0
                    };
                    let diff = net_reference[i] - self.optimal_scale * calculated[i];
                    num += weight * diff * diff;
                    denom += weight * net_reference[i] * net_reference[i];
                }
                Ok(if denom > 0.0 { (num / denom).sqrt() } else { 1.0 })
            }
            RMethod::Rietveld => {
                let mut num = 0.0;
                for i in 0..calculated.len() {
                    let weight = if raw_reference[i] > 0.0 {
                        1.0 / raw_reference[i]
                    } else {
                        0.0
                    };
                    let diff =
                        raw_reference[i] - self.optimal_scale * (calculated[i] + background[i]);
                    num += weight * diff * diff;
                }
                Ok(num)
            }
        }
    }

    /// 报告当前模型与参考图样的匹配程度（匹配后取 Rp），不精修任何参数
    pub fn r_factor(&mut self, reference: &dyn DiffractionData) -> Result<f64> {
        self.match_peaks_to_reference(reference)?;
        self.integrated_r_factor(reference, RMethod::Abs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xrd::experimental::ExperimentalPattern;
    use crate::xrd::pattern::tests::aluminium_pattern;

    fn reference_from_pattern(pattern: &CalculatedPattern, scale: f64) -> ExperimentalPattern {
        // 以非均匀角度间隔存入，使处理器按已积分峰位导入
        let peaks = pattern.combined_peaks();
        let angles: Vec<f64> = peaks.iter().map(|p| p.two_theta_deg).collect();
        let intensities: Vec<f64> = peaks.iter().map(|p| p.intensity * scale).collect();
        let mut reference = ExperimentalPattern::new();
        reference.set_wavelength(pattern.wavelength());
        reference.set_points(angles, intensities);
        reference
    }

    #[test]
    fn test_perfect_match_gives_zero_r() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        let reference = reference_from_pattern(&pattern, 1.0);
        let r = pattern.r_factor(&reference).unwrap();
        assert!(r < 1e-9, "R = {}", r);
    }

    #[test]
    fn test_scale_invariance() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();

        // 两个参考都在匹配之前构造，只差整体标度 α
        let alpha = 3.5;
        let reference = reference_from_pattern(&pattern, 1.0);
        let scaled_reference = reference_from_pattern(&pattern, alpha);

        pattern.match_peaks_to_reference(&reference).unwrap();
        let r_abs = pattern.integrated_r_factor(&reference, RMethod::Abs).unwrap();
        let scale = pattern.optimal_scale();
        let r_sq = pattern
            .integrated_r_factor(&reference, RMethod::Squared)
            .unwrap();

        // 参考强度整体乘 α 后 R 不变，最优标度乘 α
        pattern.match_peaks_to_reference(&scaled_reference).unwrap();
        let r_abs_scaled = pattern
            .integrated_r_factor(&scaled_reference, RMethod::Abs)
            .unwrap();
        let scale_scaled = pattern.optimal_scale();
        let r_sq_scaled = pattern
            .integrated_r_factor(&scaled_reference, RMethod::Squared)
            .unwrap();

        assert!((r_abs - r_abs_scaled).abs() < 1e-9);
        assert!((r_sq - r_sq_scaled).abs() < 1e-9);
        assert!((scale_scaled / scale - alpha).abs() < 1e-6 * alpha);
    }

    #[test]
    fn test_unmatched_peaks_are_recorded() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();

        // 参考只保留一个真实峰位，其余计算峰必然落在匹配容差外
        let peaks = pattern.combined_peaks();
        let mut reference = ExperimentalPattern::new();
        reference.set_wavelength(pattern.wavelength());
        reference.set_points(
            vec![
                peaks[0].two_theta_deg,
                peaks[0].two_theta_deg + 20.0,
                peaks[0].two_theta_deg + 50.0,
            ],
            vec![peaks[0].intensity, 1.0, 1.0],
        );
        pattern.match_peaks_to_reference(&reference).unwrap();
        assert!(!pattern.unmatched_peaks.is_empty());
        let matched: usize = pattern.matching_peaks.iter().map(|m| m.len()).sum();
        assert_eq!(
            matched + pattern.unmatched_peaks.len(),
            pattern.reflections().len()
        );
    }

    #[test]
    fn test_r_factor_requires_matching() {
        let mut pattern = aluminium_pattern();
        pattern.compute().unwrap();
        let reference = reference_from_pattern(&pattern, 1.0);
        let result = pattern.integrated_r_factor(&reference, RMethod::Abs);
        assert!(result.is_err());
    }
}
