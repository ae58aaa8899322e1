//! # 粉末衍射引擎
//!
//! 计算图样、实验图样处理与结构精修。
//!
//! ## 子模块
//! - `scattering`: 原子散射因子数据库
//! - `peak`: 衍射峰实体（实测峰与计算反射）
//! - `pattern`: 计算图样（峰位枚举与峰形合成）
//! - `experimental`: 实验图样处理（平滑、扣本底、定峰、拟合、积分）
//! - `rfactor`: R 因子引擎
//! - `refine`: 精修驱动器
//! - `export`: 数据导出
//! - `plot`: 图表生成
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `models/` 与 `numeric/`

pub mod experimental;
pub mod export;
pub mod pattern;
pub mod peak;
pub mod plot;
pub mod refine;
pub mod rfactor;
pub mod scattering;

pub use experimental::ExperimentalPattern;
pub use pattern::CalculatedPattern;
pub use peak::{MeasuredPeak, RadiationMethod, Reflection};
pub use refine::RefinableParameter;
pub use rfactor::RMethod;

use crate::error::Result;

/// 衍射数据的统一视图：计算图样与实验图样都可作为
/// 匹配与精修的参考。
pub trait DiffractionData {
    /// 辐射波长（Å）
    fn wavelength(&self) -> f64;
    /// 测量窗口下限（度）
    fn min_two_theta(&self) -> f64;
    /// 测量窗口上限（度）
    fn max_two_theta(&self) -> f64;
    /// 衍射峰列表（按角度升序）
    fn peaks(&self) -> Result<Vec<MeasuredPeak>>;
    /// 测量角度（连续数据，升序）
    fn measurement_angles(&self) -> Result<Vec<f64>>;
    /// 各测量角处的强度
    fn measured_intensities(&self) -> Result<Vec<f64>>;
}
