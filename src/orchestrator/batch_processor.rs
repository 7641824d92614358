//! 批量处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一次请求的完整生命周期和资源管理。
//!
//! ## 阶段
//!
//! 1. **Initialization**：创建会话工厂，打开 SAP 会话
//! 2. **Fetching user input**：读取并校验工作表；工作表无效时给请求人发送错误通知
//! 3. **Processing**：在阻塞线程上依次执行 VA03 → FB03 → QM02 三个阶段
//! 4. **Reporting**：生成报表，通知请求人
//! 5. **Cleanup**：释放会话、删除临时文件（初始化之后的每条路径都会执行）
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有会话工厂和会话句柄的模块
//! - **同步引擎**：远程调用全部阻塞，整个处理阶段放进 `spawn_blocking`
//! - **向下委托**：委托 `stages` 处理三个阶段

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::{Backend, Config};
use crate::error::AppError;
use crate::infrastructure::session;
use crate::infrastructure::{BridgeConnector, Connector, SessionHandle, SimulatedHost};
use crate::models::{load_host_fixture, parse_worksheet, read_worksheet, Ledger, Record};
use crate::orchestrator::stages;
use crate::reporting::{write_report, Notice, Notifier};
use crate::utils::logging::{log_phase_end, log_phase_failure, log_phase_start};
use crate::workflow::RecoveryRunner;

/// 一次处理请求
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// 用户提交的工作表
    pub input: PathBuf,
    /// 请求人邮箱
    pub requester: String,
}

/// 请求处理结果
#[derive(Debug)]
pub enum RunOutcome {
    /// 处理完成并已生成报表
    Completed {
        report: PathBuf,
        notification: Option<PathBuf>,
    },
    /// 工作表无效，已通知请求人
    InvalidInput {
        message: String,
        notification: Option<PathBuf>,
    },
}

/// 会话工厂和当前会话，处理阶段整体移入阻塞线程
struct Engine {
    runner: RecoveryRunner,
    handle: Option<SessionHandle>,
}

/// 应用主结构
pub struct App {
    config: Config,
    engine: Option<Engine>,
    notifier: Notifier,
    records: Vec<Record>,
    ledger: Ledger,
}

impl App {
    /// 初始化应用：按配置创建会话工厂并连接 SAP
    pub async fn initialize(config: Config) -> crate::Result<Self> {
        log_phase_start("Initialization");
        let connector = match build_connector(&config).await {
            Ok(connector) => connector,
            Err(e) => {
                log_phase_failure("Initialization");
                return Err(AppError::Initialization(e));
            }
        };
        let app = Self::connect(config, connector).await?;
        log_phase_end("Initialization");
        Ok(app)
    }

    /// 使用给定的会话工厂初始化应用
    pub async fn with_connector(config: Config, connector: Box<dyn Connector>) -> crate::Result<Self> {
        log_phase_start("Initialization");
        let app = Self::connect(config, connector).await?;
        log_phase_end("Initialization");
        Ok(app)
    }

    async fn connect(config: Config, connector: Box<dyn Connector>) -> crate::Result<Self> {
        info!("🔌 正在连接 SAP 系统 {}...", config.sap.system);
        let mut runner = RecoveryRunner::new(
            connector,
            config.sap.system.clone(),
            config.sap.max_recovery_attempts,
        );

        let (runner, opened) = tokio::task::spawn_blocking(move || {
            let opened = runner.open();
            (runner, opened)
        })
        .await
        .map_err(|e| AppError::Initialization(e.into()))?;

        let handle = opened
            .with_context(|| format!("无法连接到 SAP 系统 {}", config.sap.system))
            .map_err(|e| {
                log_phase_failure("Initialization");
                AppError::Initialization(e)
            })?;
        info!(
            "✓ 已连接到 SAP 系统 {}（连接丢失上限 {} 次）",
            runner.system(),
            runner.max_attempts()
        );

        Ok(Self {
            notifier: Notifier::new(config.notifications.clone()),
            config,
            engine: Some(Engine {
                runner,
                handle: Some(handle),
            }),
            records: Vec::new(),
            ledger: Ledger::default(),
        })
    }

    /// 本次处理的记录（处理中止后仍保留已完成的结果）
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// 处理一次请求，无论结果如何都会执行清理
    pub async fn run(&mut self, request: &RunRequest) -> crate::Result<RunOutcome> {
        let result = self.run_phases(request).await;
        self.cleanup().await;
        result
    }

    async fn run_phases(&mut self, request: &RunRequest) -> crate::Result<RunOutcome> {
        // ========== 用户输入 ==========
        log_phase_start("Fetching user input");
        let content = match read_worksheet(&request.input).await {
            Ok(content) => content,
            Err(e) => {
                error!("❌ {:#}", e);
                log_phase_failure("Fetching user input");
                return Err(AppError::Input(e));
            }
        };

        let records = match parse_worksheet(&content) {
            Ok(records) => records,
            Err(e) => {
                let message = e.to_string();
                error!("❌ 工作表无效: {}", message);
                log_phase_end("Fetching user input");
                let notification = self
                    .notify(&request.requester, Notice::Error { message: &message })
                    .await;
                return Ok(RunOutcome::InvalidInput {
                    message,
                    notification,
                });
            }
        };
        log_phase_end("Fetching user input");

        // ========== 处理 ==========
        log_phase_start("Processing");
        if let Err(e) = self.process(records).await {
            error!("❌ {}", e);
            log_phase_failure("Processing");
            return Err(e);
        }
        log_phase_end("Processing");

        // ========== 报表 ==========
        log_phase_start("Reporting");
        let report = write_report(
            &self.config.report.temp_dir,
            &self.config.report.file_name,
            &self.records,
            &self.ledger,
        )
        .await
        .map_err(|e| {
            error!("❌ {:#}", e);
            log_phase_failure("Reporting");
            AppError::Reporting(e)
        })?;

        let notification = self
            .notify(&request.requester, Notice::Completed { report: &report })
            .await;
        log_phase_end("Reporting");

        Ok(RunOutcome::Completed {
            report,
            notification,
        })
    }

    /// 在阻塞线程上执行三个阶段
    async fn process(&mut self, records: Vec<Record>) -> crate::Result<()> {
        let Some(mut engine) = self.engine.take() else {
            return Err(AppError::Processing(
                crate::workflow::RunAborted::Uninitialized {
                    transaction: "SAP session",
                },
            ));
        };
        let sap = self.config.sap.clone();
        let mut records = records;

        let joined = tokio::task::spawn_blocking(move || {
            let mut ledger = Ledger::new(records.len());
            let result = match engine.handle.take() {
                Some(handle) => Ok(handle),
                None => engine.runner.open(),
            }
            .and_then(|handle| {
                stages::run_all(&mut engine.runner, &mut records, &mut ledger, handle, &sap)
            })
            .map(|handle| engine.handle = Some(handle));
            (engine, records, ledger, result)
        })
        .await
        .map_err(AppError::Engine)?;

        let (engine, records, ledger, result) = joined;
        self.engine = Some(engine);
        self.records = records;
        self.ledger = ledger;

        result.map_err(AppError::Processing)
    }

    /// 发送通知；发送失败只记录日志
    async fn notify(&self, requester: &str, notice: Notice<'_>) -> Option<PathBuf> {
        match self.notifier.send(requester, notice).await {
            Ok(path) => path,
            Err(e) => {
                error!("❌ 通知发送失败: {:#}", e);
                None
            }
        }
    }

    /// 释放会话并删除临时文件
    pub async fn cleanup(&mut self) {
        log_phase_start("Cleanup");

        if let Some(handle) = self.engine.as_mut().and_then(|e| e.handle.take()) {
            info!("🔌 正在断开 SAP 连接...");
            session::close(handle);
            info!("✓ SAP 连接已关闭");
        }

        delete_temp_files(&self.config.report.temp_dir).await;
        log_phase_end("Cleanup");
    }
}

/// 按配置创建会话工厂
async fn build_connector(config: &Config) -> Result<Box<dyn Connector>> {
    let sap = &config.sap;
    match sap.backend {
        Backend::Bridge => {
            info!("使用 GUI 脚本桥: {}", sap.bridge_addr);
            Ok(Box::new(BridgeConnector::new(
                sap.bridge_addr.clone(),
                sap.bridge_timeout(),
            )))
        }
        Backend::Simulator => {
            let fixture_path = sap
                .fixture
                .as_deref()
                .context("simulator 后端需要配置 sap.fixture")?;
            warn!("⚠️ 使用模拟主机: {}", fixture_path.display());
            let fixture = load_host_fixture(fixture_path).await?;
            Ok(Box::new(SimulatedHost::new(fixture).connector()))
        }
    }
}

/// 删除临时目录中的所有文件，失败只记录日志
async fn delete_temp_files(temp_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!("无法读取临时目录 {}: {}", temp_dir.display(), e);
                break;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => error!("无法删除临时文件 {}: {}", path.display(), e),
        }
    }

    if removed > 0 {
        info!("🧹 已删除 {} 个临时文件", removed);
    }
}
