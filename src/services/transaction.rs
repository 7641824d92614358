//! 事务驱动的公共部分 - 业务能力层
//!
//! 三个事务驱动（VA03 / FB03 / QM02）共享同一套生命周期：
//!
//! ```text
//! Uninitialized --start(handle)--> Ready --close()--> Closed
//!                                  Ready --start(handle)--> Ready（强制重启事务）
//! ```
//!
//! 驱动只抛出 [`DriverError`]，是否重试、记录还是中止由流程层决定。

use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::{session, GuiFault, GuiSession, SessionHandle};
use crate::services::dialog;

/// 业务警告（记录后继续处理下一条）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessWarning {
    #[error("Document text already contains the case ID!")]
    CaseIdContained,

    #[error("The credit note does not exist yet in the system.")]
    CreditNoteNotFound,

    /// 订单被冻结，内容为弹窗消息
    #[error("{0}")]
    OrderBlocked(String),

    /// 通知只能显示，内容为状态栏消息
    #[error("{0}")]
    DisplayOnly(String),
}

/// 驱动操作的结果标签
///
/// 流程层只对这个封闭枚举做模式匹配。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("{0}")]
    Warning(BusinessWarning),

    /// 业务错误（记录后继续处理下一条）
    #[error("{0}")]
    Business(String),

    /// 远程会话已经死亡
    #[error("Connection to SAP lost!")]
    ConnectionLost,

    /// 自动化对屏幕的认知与实际不符，整批中止
    #[error("{0}")]
    Protocol(String),

    #[error("Uninitialized transaction {transaction}! Use `start()` to run the transaction first!")]
    Uninitialized { transaction: &'static str },
}

impl DriverError {
    pub fn business(message: impl Into<String>) -> Self {
        DriverError::Business(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        DriverError::Protocol(message.into())
    }

    /// 业务警告或业务错误：记录到台账，不重试
    pub fn is_recordable(&self) -> bool {
        matches!(self, DriverError::Warning(_) | DriverError::Business(_))
    }
}

impl From<BusinessWarning> for DriverError {
    fn from(warning: BusinessWarning) -> Self {
        DriverError::Warning(warning)
    }
}

/// 单个步骤内部的失败
///
/// 底层调用失败时还不知道是不是连接丢失，
/// 由 [`DriverCore::run`] 探测存活后再转换成 [`DriverError`]。
#[derive(Debug)]
pub enum StepError {
    Fault(GuiFault),
    Driver(DriverError),
}

impl From<GuiFault> for StepError {
    fn from(fault: GuiFault) -> Self {
        StepError::Fault(fault)
    }
}

impl From<DriverError> for StepError {
    fn from(err: DriverError) -> Self {
        StepError::Driver(err)
    }
}

impl From<BusinessWarning> for StepError {
    fn from(warning: BusinessWarning) -> Self {
        StepError::Driver(DriverError::Warning(warning))
    }
}

pub type StepResult<T> = Result<T, StepError>;

/// 驱动状态
#[derive(Debug, Default)]
pub enum DriverState {
    #[default]
    Uninitialized,
    Ready(SessionHandle),
    Closed,
}

/// 三个驱动共享的接口，恢复流程对它泛型
pub trait Transaction {
    /// 事务代码（VA03 / FB03 / QM02）
    fn name(&self) -> &'static str;

    /// 打开事务；已经 Ready 时强制重启
    fn start(&mut self, handle: SessionHandle) -> Result<(), DriverError>;

    /// 结束事务并交还会话句柄；未启动时返回 `None`
    fn close(&mut self) -> Result<Option<SessionHandle>, DriverError>;

    /// 丢弃已失效的会话句柄，不做远程调用
    fn release(&mut self);

    fn is_ready(&self) -> bool;
}

/// 驱动公共核心：持有会话句柄、状态和弹窗策略
#[derive(Debug)]
pub struct DriverCore {
    tcode: &'static str,
    state: DriverState,
    popup_max_presses: usize,
}

impl DriverCore {
    pub fn new(tcode: &'static str, popup_max_presses: usize) -> Self {
        Self {
            tcode,
            state: DriverState::Uninitialized,
            popup_max_presses: popup_max_presses.max(1),
        }
    }

    pub fn popup_max_presses(&self) -> usize {
        self.popup_max_presses
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, DriverState::Ready(_))
    }

    /// 接管句柄并打开事务，随后执行 `init`（通常是清空搜索字段）
    pub fn start<F>(&mut self, handle: SessionHandle, init: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut dyn GuiSession) -> StepResult<()>,
    {
        if self.is_ready() {
            debug!("[{}] 事务已在运行，强制重启", self.tcode);
        }
        // 旧句柄（如果有）在这里被释放
        self.state = DriverState::Ready(handle);

        let tcode = self.tcode;
        self.run(|gui| {
            gui.start_transaction(tcode)?;
            init(gui)
        })
    }

    pub fn release(&mut self) {
        if let DriverState::Ready(handle) = std::mem::replace(&mut self.state, DriverState::Closed) {
            debug!("[{}] 释放失效的会话句柄", self.tcode);
            session::close(handle);
        }
    }

    /// 结束事务，确认结束时弹出的窗口，交还句柄
    pub fn close(&mut self) -> Result<Option<SessionHandle>, DriverError> {
        if !self.is_ready() {
            return Ok(None);
        }

        let presses = self.popup_max_presses;
        let result = self.run(|gui| {
            gui.end_transaction()?;
            if let dialog::Signal::BlockingPopup(_) = dialog::classify_screen(gui)? {
                dialog::resolve_popup(gui, true, presses)?;
            }
            Ok(())
        });

        match std::mem::replace(&mut self.state, DriverState::Closed) {
            DriverState::Ready(handle) => match result {
                Ok(()) => Ok(Some(handle)),
                Err(e) => {
                    warn!("[{}] 结束事务失败: {}", self.tcode, e);
                    Err(e)
                }
            },
            _ => result.map(|_| None),
        }
    }

    /// 在当前会话上执行一个步骤
    ///
    /// 底层调用失败时探测会话存活：已死亡为 [`DriverError::ConnectionLost`]，
    /// 仍存活则为 [`DriverError::Protocol`]。
    pub fn run<T, F>(&mut self, step: F) -> Result<T, DriverError>
    where
        F: FnOnce(&mut dyn GuiSession) -> StepResult<T>,
    {
        let tcode = self.tcode;
        let handle = match &mut self.state {
            DriverState::Ready(handle) => handle,
            _ => return Err(DriverError::Uninitialized { transaction: tcode }),
        };

        let gui = match handle.gui() {
            Ok(gui) => gui,
            Err(_) => return Err(DriverError::ConnectionLost),
        };

        match step(gui) {
            Ok(value) => Ok(value),
            Err(StepError::Driver(e)) => Err(e),
            Err(StepError::Fault(fault)) => {
                let alive = match handle.gui() {
                    Ok(gui) => gui.is_alive(),
                    Err(_) => false,
                };
                if alive {
                    Err(DriverError::Protocol(format!("[{tcode}] {fault}")))
                } else {
                    debug!("[{}] 调用失败后会话已死亡: {}", tcode, fault);
                    Err(DriverError::ConnectionLost)
                }
            }
        }
    }
}
