/// 日志工具模块
///
/// 提供日志初始化、日志文件命名与清理、阶段分隔的辅助函数
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// 记录之间的分隔线长度
pub const SECTION_LINE_LENGTH: usize = 35;

const LOG_DATE_FORMAT: &str = "%Y-%m-%d";

/// 初始化日志系统
///
/// 控制台和日志文件各一个输出层；`RUST_LOG` 优先于配置中的日志级别。
///
/// # 参数
/// - `config`: 日志配置
/// - `debug`: 是否强制 debug 级别
///
/// # 返回
/// 返回本次运行的日志文件路径
pub fn init_logging(config: &LoggingConfig, debug: bool) -> Result<PathBuf> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("无法创建日志目录: {}", config.log_dir.display()))?;

    let today = Local::now().date_naive();
    let log_path = compile_log_path(&config.log_dir, today);
    let log_file = File::create(&log_path)
        .with_context(|| format!("无法创建日志文件: {}", log_path.display()))?;

    let level = if debug { "debug" } else { config.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .context("日志系统已经初始化")?;

    print_log_header(today);
    remove_old_logs(&config.log_dir, config.retain_logs_days, today);

    Ok(log_path)
}

/// 生成当天第一个未被占用的日志文件路径（`YYYY-MM-DD_NNN.log`）
pub fn compile_log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    let date_tag = date.format(LOG_DATE_FORMAT);
    let mut nth = 0;
    loop {
        nth += 1;
        let log_path = log_dir.join(format!("{}_{:03}.log", date_tag, nth));
        if !log_path.is_file() {
            return log_path;
        }
    }
}

fn print_log_header(date: NaiveDate) {
    info!("Application name: Accounting Document Updater");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Log date: {}\n", date.format("%d-%b-%Y"));
}

/// 删除早于保留天数的日志文件
///
/// # 参数
/// - `log_dir`: 日志目录
/// - `retain_days`: 保留天数（至少 1 天）
/// - `today`: 当天日期
///
/// # 返回
/// 返回删除的文件数量
pub fn remove_old_logs(log_dir: &Path, retain_days: u32, today: NaiveDate) -> usize {
    let retain_days = i64::from(retain_days.max(1));
    let threshold = today - chrono::Duration::days(retain_days);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("无法读取日志目录 {}: {}", log_dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("log") {
            continue;
        }

        let Some(log_date) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|name| name.split('_').next())
            .and_then(|token| NaiveDate::parse_from_str(token, LOG_DATE_FORMAT).ok())
        else {
            continue;
        };

        if log_date < threshold {
            info!("Removing obsolete log file: '{}' ...", path.display());
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => error!("无法删除日志文件 {}: {}", path.display(), e),
            }
        }
    }
    removed
}

/// 记录之间的分隔线
pub fn section_break() {
    info!("{}", "-".repeat(SECTION_LINE_LENGTH));
}

pub fn log_phase_start(phase: &str) {
    info!("=== {} START ===", phase);
}

pub fn log_phase_end(phase: &str) {
    info!("=== {} END ===\n", phase);
}

pub fn log_phase_failure(phase: &str) {
    error!("=== {} FAILURE ===\n", phase);
}

/// 打印最终统计信息
///
/// # 参数
/// - `succeeded`: 全部步骤成功的记录数
/// - `total`: 记录总数
/// - `log_path`: 日志文件路径
pub fn print_final_stats(succeeded: usize, total: usize, log_path: &Path) {
    info!("{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!("完成时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{}", "=".repeat(60));
    info!("✅ 无错误记录: {}/{}", succeeded, total);
    info!("⚠️ 有警告或错误的记录: {}", total - succeeded);
    info!("{}", "=".repeat(60));
    info!("日志已保存至: {}", log_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, LOG_DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_compile_log_path_takes_first_free_counter() {
        let dir = tempfile::tempdir().unwrap();
        let today = date("2026-10-18");

        let first = compile_log_path(dir.path(), today);
        assert!(first.ends_with("2026-10-18_001.log"));

        fs::write(&first, "").unwrap();
        fs::write(dir.path().join("2026-10-18_002.log"), "").unwrap();
        let next = compile_log_path(dir.path(), today);
        assert!(next.ends_with("2026-10-18_003.log"));
    }

    #[test]
    fn test_remove_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "2026-09-01_001.log",
            "2026-10-17_001.log",
            "2026-10-18_001.log",
            "notes.txt",
            "broken_001.log",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let removed = remove_old_logs(dir.path(), 7, date("2026-10-18"));

        assert_eq!(removed, 1);
        assert!(!dir.path().join("2026-09-01_001.log").exists());
        assert!(dir.path().join("2026-10-17_001.log").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("broken_001.log").exists());
    }

    #[test]
    fn test_retention_is_at_least_one_day() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2026-10-17_001.log"), "").unwrap();
        fs::write(dir.path().join("2026-10-16_001.log"), "").unwrap();

        let removed = remove_old_logs(dir.path(), 0, date("2026-10-18"));

        assert_eq!(removed, 1);
        assert!(dir.path().join("2026-10-17_001.log").exists());
    }
}
