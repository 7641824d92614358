use std::fmt;

use crate::workflow::RunAborted;

/// 应用程序错误类型
///
/// 按失败的阶段划分，每个阶段对应一个进程退出码。
#[derive(Debug)]
pub enum AppError {
    /// 日志系统初始化失败
    Logging(anyhow::Error),
    /// 配置加载或 SAP 连接失败
    Initialization(anyhow::Error),
    /// 读取用户输入失败
    Input(anyhow::Error),
    /// 处理过程中整批中止
    Processing(RunAborted),
    /// 处理线程异常退出
    Engine(tokio::task::JoinError),
    /// 报表生成失败
    Reporting(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Logging(e) => write!(f, "日志初始化错误: {:#}", e),
            AppError::Initialization(e) => write!(f, "初始化错误: {:#}", e),
            AppError::Input(e) => write!(f, "用户输入错误: {:#}", e),
            AppError::Processing(e) => write!(f, "处理中止: {}", e),
            AppError::Engine(e) => write!(f, "处理线程异常退出: {}", e),
            AppError::Reporting(e) => write!(f, "报表错误: {:#}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Logging(e)
            | AppError::Initialization(e)
            | AppError::Input(e)
            | AppError::Reporting(e) => Some(&**e),
            AppError::Processing(e) => Some(e),
            AppError::Engine(e) => Some(e),
        }
    }
}

impl From<RunAborted> for AppError {
    fn from(err: RunAborted) -> Self {
        AppError::Processing(err)
    }
}

impl AppError {
    /// 进程退出码
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Logging(_) => 1,
            AppError::Initialization(_) | AppError::Input(_) => 2,
            AppError::Processing(_) | AppError::Engine(_) => 3,
            AppError::Reporting(_) => 4,
        }
    }

    /// 失败的阶段名称（用于阶段日志）
    pub fn phase(&self) -> &'static str {
        match self {
            AppError::Logging(_) => "Logging",
            AppError::Initialization(_) => "Initialization",
            AppError::Input(_) => "Fetching user input",
            AppError::Processing(_) | AppError::Engine(_) => "Processing",
            AppError::Reporting(_) => "Reporting",
        }
    }
}

/// 应用程序结果类型
pub type Result<T> = std::result::Result<T, AppError>;
