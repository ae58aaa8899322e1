//! # 批量处理
//!
//! 收集目录下的结构文件并并行计算衍射图样，带进度条。
//!
//! ## 依赖关系
//! - 被 `commands/calc.rs` 的目录模式使用
//! - 使用 `walkdir` 遍历目录、`rayon` 并行、`indicatif` 显示进度

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::PathBuf;
use walkdir::WalkDir;

/// 单个文件的处理结果
pub enum ProcessResult {
    Success(String),
    Skipped(String),
    Failed(String, String),
}

/// 批量处理统计
#[derive(Default)]
pub struct BatchSummary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

/// 收集匹配任一模式的文件。模式以逗号分隔，
/// `*` 只允许出现在首部或尾部（如 "POSCAR*,*.vasp"）。
pub fn collect_files(root: &PathBuf, patterns: &str, recursive: bool) -> Vec<PathBuf> {
    let patterns: Vec<&str> = patterns.split(',').map(|p| p.trim()).collect();
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            patterns.iter().any(|p| matches_pattern(&name, p))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}

/// 并行处理文件列表。`jobs` 为 0 时使用默认线程数。
pub fn run_parallel<F>(files: Vec<PathBuf>, jobs: usize, process: F) -> BatchSummary
where
    F: Fn(&PathBuf) -> ProcessResult + Sync,
{
    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let run = || {
        files
            .par_iter()
            .map(|file| {
                let result = process(file);
                progress.inc(1);
                result
            })
            .collect::<Vec<_>>()
    };

    let results = if jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map(|pool| pool.install(run))
            .unwrap_or_else(|_| run())
    } else {
        run()
    };
    progress.finish_and_clear();

    let mut summary = BatchSummary::default();
    for result in results {
        match result {
            ProcessResult::Success(_) => summary.success += 1,
            ProcessResult::Skipped(_) => summary.skipped += 1,
            ProcessResult::Failed(path, error) => {
                summary.failed += 1;
                summary.failures.push((path, error));
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("POSCAR", "POSCAR*"));
        assert!(matches_pattern("POSCAR-001", "POSCAR*"));
        assert!(matches_pattern("al.vasp", "*.vasp"));
        assert!(!matches_pattern("al.cif", "*.vasp"));
        assert!(matches_pattern("CONTCAR", "CONTCAR"));
    }
}
