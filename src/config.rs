use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::services::LockRetry;
use crate::workflow::DEFAULT_MAX_ATTEMPTS;

/// 程序配置文件
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sap: SapConfig,
    pub notifications: NotificationConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
}

/// 远程会话后端
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// GUI 脚本桥（生产环境）
    #[default]
    Bridge,
    /// 内存模拟主机（演练 / 测试）
    Simulator,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridge" => Ok(Backend::Bridge),
            "simulator" => Ok(Backend::Simulator),
            other => bail!("未知的会话后端: {}", other),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SapConfig {
    /// 连接目标系统
    pub system: String,
    pub backend: Backend,
    /// GUI 脚本桥地址
    pub bridge_addr: String,
    pub bridge_timeout_secs: u64,
    /// 模拟主机数据文件（仅 simulator 后端）
    pub fixture: Option<PathBuf>,
    /// 单条记录连接丢失的重试上限
    pub max_recovery_attempts: u32,
    pub lock_retry_attempts: u32,
    pub lock_retry_delay_ms: u64,
    /// 关闭弹窗时最多按键次数
    pub popup_max_presses: usize,
}

impl Default for SapConfig {
    fn default() -> Self {
        Self {
            system: "P25".to_string(),
            backend: Backend::Bridge,
            bridge_addr: "127.0.0.1:7700".to_string(),
            bridge_timeout_secs: 30,
            fixture: None,
            max_recovery_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_retry_attempts: 3,
            lock_retry_delay_ms: 2000,
            popup_max_presses: 3,
        }
    }
}

impl SapConfig {
    pub fn lock_retry(&self) -> LockRetry {
        LockRetry {
            attempts: self.lock_retry_attempts,
            delay: Duration::from_millis(self.lock_retry_delay_ms),
        }
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 是否发送通知
    pub send: bool,
    pub sender: String,
    pub subject: String,
    /// 待发送邮件的输出目录
    pub outbox_dir: PathBuf,
    /// HTML 模板目录
    pub template_dir: PathBuf,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send: true,
            sender: "accounting.automation@company.com".to_string(),
            subject: "Accounting document update".to_string(),
            outbox_dir: PathBuf::from("outbox"),
            template_dir: PathBuf::from("notification"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 报表文件名（不含扩展名）
    pub file_name: String,
    /// 临时文件目录，清理阶段会清空
    pub temp_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            file_name: "report".to_string(),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    /// 默认日志级别，`RUST_LOG` 优先
    pub level: String,
    /// 日志保留天数（至少 1 天）
    pub retain_logs_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            level: "info".to_string(),
            retain_logs_days: 30,
        }
    }
}

impl Config {
    /// 从 TOML 文件加载配置，再用环境变量覆盖
    ///
    /// # 参数
    /// - `path`: 配置文件路径，必须是 `.toml` 文件
    pub async fn load(path: &Path) -> Result<Self> {
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            bail!("配置文件不是 TOML 类型: {}", path.display());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))?;

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(system) = std::env::var("SAP_SYSTEM") {
            self.sap.system = system;
        }
        if let Ok(backend) = std::env::var("SAP_BACKEND") {
            self.sap.backend = backend.parse()?;
        }
        if let Ok(addr) = std::env::var("SAP_BRIDGE_ADDR") {
            self.sap.bridge_addr = addr;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        self.notifications.send = std::env::var("NOTIFICATIONS_SEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.notifications.send);
        Ok(self)
    }
}
