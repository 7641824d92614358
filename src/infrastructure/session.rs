//! 会话句柄 - 基础设施层
//!
//! 持有唯一的远程会话资源。同一时刻只有一个驱动持有句柄，
//! 所有权通过 `start(handle)` / `close() -> handle` 显式移交。

use thiserror::Error;
use tracing::debug;

use super::gui::{GuiFault, GuiResult, GuiSession};

/// 连接远程主机失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// 远程主机不可达
    #[error("无法连接到远程系统 {system}: {reason}")]
    Unreachable { system: String, reason: String },

    /// 远程主机拒绝了会话
    #[error("远程系统 {system} 拒绝了会话: {reason}")]
    Rejected { system: String, reason: String },
}

/// 会话句柄
///
/// 职责：
/// - 持有唯一的远程会话
/// - 只暴露 [`GuiSession`] 能力，不认识事务流程
/// - `close()` 幂等且不会失败，drop 时自动释放
pub struct SessionHandle {
    system: String,
    session: Option<Box<dyn GuiSession>>,
}

impl SessionHandle {
    pub fn new(system: impl Into<String>, session: Box<dyn GuiSession>) -> Self {
        Self {
            system: system.into(),
            session: Some(session),
        }
    }

    /// 连接目标标识
    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// 获取远程会话能力；句柄已关闭时返回传输错误
    pub fn gui(&mut self) -> GuiResult<&mut (dyn GuiSession + 'static)> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(GuiFault::Transport(format!(
                "session to '{}' is closed",
                self.system
            ))),
        }
    }

    /// 释放远程会话
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("释放远程会话: {}", self.system);
            session.disconnect();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("system", &self.system)
            .field("open", &self.is_open())
            .finish()
    }
}

/// 会话工厂
///
/// 进程启动时打开一次，连接丢失时由恢复流程重新打开。
pub trait Connector: Send {
    fn open(&mut self, system: &str) -> Result<SessionHandle, ConnectionError>;
}

/// 显式释放句柄
pub fn close(mut handle: SessionHandle) {
    handle.close();
}
