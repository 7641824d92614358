//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责一次请求的阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量处理器
//! - 管理应用生命周期（初始化、输入、处理、报表、清理）
//! - 持有会话工厂和会话句柄
//! - 把同步的处理阶段放进阻塞线程
//!
//! ### `stages` - 批量处理阶段
//! - VA03 → FB03 → QM02 顺序执行
//! - 每条记录的结果写入台账
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (一次请求)
//!     ↓
//! stages (Vec<Record> × 三个阶段)
//!     ↓
//! workflow::RecoveryRunner (单条记录 + 连接恢复)
//!     ↓
//! services (能力层：VA03 / FB03 / QM02 驱动)
//!     ↓
//! infrastructure (基础设施：SessionHandle / GuiSession)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管生命周期，stages 管阶段顺序
//! 2. **资源隔离**：只有编排层持有会话工厂
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure

pub mod batch_processor;
pub mod stages;

// 重新导出主要类型
pub use batch_processor::{App, RunOutcome, RunRequest};
pub use stages::run_all;
