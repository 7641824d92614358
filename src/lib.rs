//! # Accounting Document Updater
//!
//! 按用户提交的工作表，在 SAP 中自动更新会计凭证的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（远程会话），只暴露能力
//! - `GuiSession` - 远程 GUI 的屏幕 / 字段 / 按键能力
//! - `SessionHandle` - 唯一的会话 owner，由驱动之间显式交接
//! - `BridgeConnector` / `SimulatedHost` - 生产与模拟两种后端
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单条记录
//! - `CreditNoteLookup` - VA03 贷项凭证查询
//! - `DocumentAnnotation` - FB03 凭证文本标注
//! - `NotificationClosure` - QM02 服务通知关闭
//! - `dialog` / `tree_search` - 弹窗分类与树搜索
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条记录的一次操作"如何重试
//! - `RecordCtx` - 上下文封装（阶段 + 行号）
//! - `RecoveryRunner` - 连接丢失时重连、重启驱动、重试当前记录
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 应用生命周期与资源管理
//! - `orchestrator/stages` - VA03 → FB03 → QM02 三个阶段
//!
//! ### ⑤ 输出层（Reporting）
//! - `reporting/` - CSV 报表与用户通知
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod reporting;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, Result};
pub use infrastructure::{Connector, SessionHandle, SimulatedHost};
pub use models::{Ledger, Record, Stage};
pub use orchestrator::{App, RunOutcome, RunRequest};
pub use workflow::{RecordCtx, RecoveryRunner, RunAborted};
