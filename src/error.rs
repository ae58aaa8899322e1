//! # 统一错误处理模块
//!
//! 定义 qpowder 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分类
//! - I/O 与解析错误（结构文件、衍射数据文件）
//! - 配置错误（计算/精修前未定义结构或参考图样等，致命）
//! - 实验数据处理失败（积分强度为负、峰顶超出测量范围）
//! - 数值错误（奇异晶格、拟合发散）
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// qpowder 统一错误类型
#[derive(Error, Debug)]
pub enum PowderError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("File is not recognizable as a diffraction pattern: {path}")]
    NotADiffractionPattern { path: String },

    // ─────────────────────────────────────────────────────────────
    // 配置错误（致命）
    // ─────────────────────────────────────────────────────────────
    #[error("Structure has not been defined; call set_structure first")]
    StructureNotDefined,

    #[error("A reference pattern is required for this operation but none was supplied")]
    ReferenceNotDefined,

    #[error("No diffraction peaks available: {reason}")]
    NoPeaks { reason: String },

    #[error("Intensity was not measured as a function of angle")]
    NoContinuousData,

    #[error("Atomic scattering factor is not defined for Z = {z} (valid range 1..=98)")]
    ElementOutOfRange { z: i32 },

    #[error("Unknown element symbol: {symbol}")]
    UnknownElement { symbol: String },

    // ─────────────────────────────────────────────────────────────
    // 实验数据处理失败
    // ─────────────────────────────────────────────────────────────
    #[error("Peak integration failed: negative intensity near 2θ = {two_theta:.3}")]
    NegativeIntegratedIntensity { two_theta: f64 },

    #[error("Peak integration failed: maximum at 2θ = {two_theta:.3} outside measured range")]
    PeakOutsideRange { two_theta: f64 },

    // ─────────────────────────────────────────────────────────────
    // 数值错误
    // ─────────────────────────────────────────────────────────────
    #[error("Singular lattice: determinant is zero")]
    SingularLattice,

    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PowderError>;
