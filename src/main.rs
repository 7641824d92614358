use std::path::{Path, PathBuf};
use std::process::ExitCode;

use accounting_doc_updater::utils::logging;
use accounting_doc_updater::{App, AppError, Config, RunOutcome, RunRequest};
use clap::Parser;
use tracing::{error, info};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "accounting-doc-updater")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Appends case IDs to accounting documents in SAP and closes linked notifications", long_about = None)]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, default_value = "app_config.toml")]
    config: PathBuf,

    /// 用户提交的工作表（CSV）
    #[arg(short, long)]
    input: PathBuf,

    /// 请求人邮箱
    #[arg(short, long)]
    requester: String,

    /// 启用 debug 日志
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 加载配置
    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            eprintln!("CRITICAL: 无法加载配置文件!");
            return ExitCode::from(2);
        }
    };

    // 初始化日志
    let log_path = match logging::init_logging(&config.logging, cli.debug) {
        Ok(path) => path,
        Err(e) => {
            let err = AppError::Logging(e);
            eprintln!("CRITICAL: {}", err);
            return ExitCode::from(err.exit_code());
        }
    };

    let request = RunRequest {
        input: cli.input,
        requester: cli.requester,
    };

    let code = run(config, &request, &log_path).await;
    info!("=== System shutdown with return code: {} ===", code);
    ExitCode::from(code)
}

/// 初始化并运行应用，返回进程退出码
async fn run(config: Config, request: &RunRequest, log_path: &Path) -> u8 {
    let mut app = match App::initialize(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ [{}] {}", e.phase(), e);
            return e.exit_code();
        }
    };

    match app.run(request).await {
        Ok(RunOutcome::Completed { .. }) => {
            let total = app.records().len();
            let succeeded = (0..total)
                .filter(|&idx| !app.ledger().has_failure(idx))
                .count();
            logging::print_final_stats(succeeded, total, log_path);
            0
        }
        Ok(RunOutcome::InvalidInput { message, .. }) => {
            info!("工作表无效，已通知请求人: {}", message);
            0
        }
        Err(e) => {
            error!("❌ [{}] {}", e.phase(), e);
            e.exit_code()
        }
    }
}
