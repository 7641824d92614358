//! 连接恢复与重试 - 流程层
//!
//! 核心职责：包装驱动对单条记录的操作，决定"成功 / 记录 / 重试 / 中止"
//!
//! 对三个驱动完全相同的规则：
//!
//! ```text
//! 操作成功                 → Succeeded
//! Warning / Business       → Recorded（写入台账，不重试）
//! ConnectionLost           → 计数 +1；未达上限则重连、重启同一个驱动、重试同一条记录
//!                            达到上限则整批中止
//! Protocol / Uninitialized → 整批中止
//! ```
//!
//! 计数器只属于一条记录的一次操作，重连后重启驱动时的连接丢失也计入。

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infrastructure::{ConnectionError, Connector, SessionHandle};
use crate::services::{DriverError, Transaction};
use crate::workflow::record_ctx::RecordCtx;

/// 连接丢失的默认重试上限
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 整批中止的原因
#[derive(Debug, Error)]
pub enum RunAborted {
    #[error("Connection to SAP lost {attempts} times during {transaction}, giving up!")]
    RetriesExhausted {
        transaction: &'static str,
        attempts: u32,
    },

    #[error("Unrecoverable error in {transaction}: {message}")]
    Protocol {
        transaction: &'static str,
        message: String,
    },

    #[error("Could not reconnect to SAP: {0}")]
    Reconnect(#[from] ConnectionError),

    #[error("Uninitialized transaction {transaction}!")]
    Uninitialized { transaction: &'static str },
}

impl RunAborted {
    fn from_driver(transaction: &'static str, err: DriverError) -> Self {
        match err {
            DriverError::Uninitialized { transaction } => RunAborted::Uninitialized { transaction },
            DriverError::ConnectionLost => RunAborted::RetriesExhausted {
                transaction,
                attempts: 1,
            },
            other => RunAborted::Protocol {
                transaction,
                message: other.to_string(),
            },
        }
    }
}

/// 单条记录一次操作的结果
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<R> {
    Succeeded(R),
    /// 业务警告或业务错误，消息写入台账
    Recorded(DriverError),
}

/// 带连接恢复的执行器
///
/// 持有会话工厂，是流程中唯一会重新打开会话的地方。
pub struct RecoveryRunner {
    connector: Box<dyn Connector>,
    system: String,
    max_attempts: u32,
}

impl RecoveryRunner {
    pub fn new(connector: Box<dyn Connector>, system: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            connector,
            system: system.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 打开一个新会话
    pub fn open(&mut self) -> Result<SessionHandle, RunAborted> {
        let handle = self.connector.open(&self.system)?;
        debug!("已连接到系统 {}", self.system);
        Ok(handle)
    }

    fn reconnect(&mut self) -> Result<SessionHandle, RunAborted> {
        info!("🔌 正在重新连接 {}...", self.system);
        self.open().map_err(|e| {
            error!("❌ 重新连接失败: {}", e);
            e
        })
    }

    /// 把会话交给驱动并启动事务
    ///
    /// 启动时的连接丢失同样按上限重试。
    pub fn launch<D: Transaction>(
        &mut self,
        driver: &mut D,
        handle: SessionHandle,
    ) -> Result<(), RunAborted> {
        let mut lost = 0;
        self.start_driver(driver, handle, &mut lost)
    }

    fn start_driver<D: Transaction>(
        &mut self,
        driver: &mut D,
        handle: SessionHandle,
        lost: &mut u32,
    ) -> Result<(), RunAborted> {
        let mut handle = handle;
        loop {
            info!("▶ 启动 {}...", driver.name());
            match driver.start(handle) {
                Ok(()) => return Ok(()),
                Err(DriverError::ConnectionLost) => {
                    driver.release();
                    self.count_loss(driver.name(), lost)?;
                    handle = self.reconnect()?;
                }
                Err(e) => {
                    error!("❌ 无法启动 {}: {}", driver.name(), e);
                    return Err(RunAborted::from_driver(driver.name(), e));
                }
            }
        }
    }

    fn count_loss(&self, transaction: &'static str, lost: &mut u32) -> Result<(), RunAborted> {
        *lost += 1;
        warn!(
            "⚠️ [{}] 与 SAP 的连接丢失（第 {}/{} 次）",
            transaction, lost, self.max_attempts
        );
        if *lost >= self.max_attempts {
            error!("❌ [{}] 连接丢失次数达到上限，中止处理", transaction);
            return Err(RunAborted::RetriesExhausted {
                transaction,
                attempts: *lost,
            });
        }
        Ok(())
    }

    /// 对一条记录执行驱动操作
    ///
    /// # 参数
    /// - `driver`: 已启动的驱动
    /// - `ctx`: 记录上下文（用于日志）
    /// - `op`: 对驱动的操作，重试时会被再次调用
    ///
    /// # 返回
    /// - `Ok(Attempt)`: 成功或需要记录的业务结果
    /// - `Err(RunAborted)`: 整批必须中止
    pub fn run<D, R, F>(
        &mut self,
        driver: &mut D,
        ctx: &RecordCtx,
        mut op: F,
    ) -> Result<Attempt<R>, RunAborted>
    where
        D: Transaction,
        F: FnMut(&mut D) -> Result<R, DriverError>,
    {
        let mut lost = 0;
        let mut attempt = 1;

        loop {
            debug!("{} 第 {} 次尝试", ctx, attempt);
            match op(driver) {
                Ok(value) => return Ok(Attempt::Succeeded(value)),
                Err(e) if e.is_recordable() => return Ok(Attempt::Recorded(e)),
                Err(DriverError::ConnectionLost) => {
                    // 同一时刻只存在一个会话句柄
                    driver.release();
                    self.count_loss(driver.name(), &mut lost)?;
                    let handle = self.reconnect()?;
                    info!("{} 🔄 重启 {} 后重试当前记录", ctx, driver.name());
                    self.start_driver(driver, handle, &mut lost)?;
                    attempt += 1;
                }
                Err(e) => {
                    error!("{} ❌ {}", ctx, e);
                    return Err(RunAborted::from_driver(driver.name(), e));
                }
            }
        }
    }

    /// 结束驱动的事务并收回会话句柄
    ///
    /// 结束时连接已丢失则重新打开一个会话。
    pub fn finish<D: Transaction>(&mut self, driver: &mut D) -> Result<SessionHandle, RunAborted> {
        match driver.close() {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => self.open(),
            Err(DriverError::ConnectionLost) => {
                warn!("⚠️ [{}] 结束事务时连接丢失", driver.name());
                self.reconnect()
            }
            Err(e) => Err(RunAborted::from_driver(driver.name(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::infrastructure::simulator::DocumentFixture;
    use crate::infrastructure::{HostFixture, SimulatedConnector, SimulatedHost};
    use crate::models::Stage;
    use crate::services::{DocumentAnnotation, DocumentKey};

    const KEY: DocumentKey<'static> = DocumentKey {
        number: 544411698,
        fiscal_year: 2024,
        company_code: "0010",
    };

    fn host() -> SimulatedHost {
        SimulatedHost::new(HostFixture {
            documents: vec![DocumentFixture {
                company_code: "0010".to_string(),
                number: 544411698,
                year: 2024,
                text: "RET711884319".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    fn ctx() -> RecordCtx {
        RecordCtx::new(Stage::Annotate, 1, 1, 1, KEY.number)
    }

    fn started(host: &SimulatedHost) -> (RecoveryRunner, DocumentAnnotation) {
        let mut runner = RecoveryRunner::new(Box::new(host.connector()), "P25", 3);
        let mut driver = DocumentAnnotation::new(3);
        let handle = runner.open().unwrap();
        runner.launch(&mut driver, handle).unwrap();
        (runner, driver)
    }

    #[test]
    fn test_success_needs_no_reconnect() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        let result = runner
            .run(&mut driver, &ctx(), |d| d.annotate(KEY, 400081469))
            .unwrap();

        assert_eq!(
            result,
            Attempt::Succeeded("RET711884319 D 400081469".to_string())
        );
        assert_eq!(host.sessions_opened(), 1);
    }

    #[test]
    fn test_business_result_is_recorded_without_retry() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        let result = runner
            .run(&mut driver, &ctx(), |d| d.annotate(KEY, 711884319))
            .unwrap();

        assert!(matches!(result, Attempt::Recorded(DriverError::Warning(_))));
        assert_eq!(host.sessions_opened(), 1);
    }

    #[test]
    fn test_recovers_after_connection_loss() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        host.drop_connection_on_next_keys(2);
        let mut calls = 0;
        let result = runner
            .run(&mut driver, &ctx(), |d| {
                calls += 1;
                d.annotate(KEY, 400081469)
            })
            .unwrap();

        assert!(matches!(result, Attempt::Succeeded(_)));
        assert_eq!(calls, 3);
        assert_eq!(host.sessions_opened(), 3);
        assert_eq!(host.document_saves("0010", 544411698, 2024), 1);
    }

    #[test]
    fn test_aborts_after_three_losses() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        host.drop_connection_on_next_keys(3);
        let err = runner
            .run(&mut driver, &ctx(), |d| d.annotate(KEY, 400081469))
            .unwrap_err();

        assert!(matches!(
            err,
            RunAborted::RetriesExhausted {
                transaction: "FB03",
                attempts: 3
            }
        ));
        assert_eq!(
            host.document_text("0010", 544411698, 2024).as_deref(),
            Some("RET711884319")
        );
    }

    #[test]
    fn test_unreachable_host_aborts_with_reconnect_error() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        host.drop_connection_on_next_keys(1);
        host.set_reachable(false);
        let err = runner
            .run(&mut driver, &ctx(), |d| d.annotate(KEY, 400081469))
            .unwrap_err();

        assert!(matches!(err, RunAborted::Reconnect(_)));
    }

    #[test]
    fn test_uninitialized_driver_aborts() {
        let host = host();
        let mut runner = RecoveryRunner::new(Box::new(host.connector()), "P25", 3);
        let mut driver = DocumentAnnotation::new(3);

        let err = runner
            .run(&mut driver, &ctx(), |d| d.annotate(KEY, 400081469))
            .unwrap_err();

        assert!(matches!(
            err,
            RunAborted::Uninitialized { transaction: "FB03" }
        ));
    }

    #[test]
    fn test_finish_returns_live_handle() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        let handle = runner.finish(&mut driver).unwrap();
        assert!(handle.is_open());
        assert!(!driver.is_ready());
        assert_eq!(host.sessions_opened(), 1);
    }

    #[test]
    fn test_finish_reopens_when_session_is_dead() {
        let host = host();
        let (mut runner, mut driver) = started(&host);

        host.kill_sessions();
        let handle = runner.finish(&mut driver).unwrap();
        assert!(handle.is_open());
        assert_eq!(host.sessions_opened(), 2);
    }

    type Events = Arc<Mutex<Vec<&'static str>>>;

    /// 记录每次打开会话的会话工厂
    struct RecordingConnector {
        inner: SimulatedConnector,
        events: Events,
    }

    impl Connector for RecordingConnector {
        fn open(&mut self, system: &str) -> Result<SessionHandle, ConnectionError> {
            self.events.lock().unwrap().push("open");
            self.inner.open(system)
        }
    }

    /// 记录句柄交接的驱动，前 `losses` 次操作报告连接丢失
    struct RecordingDriver {
        handle: Option<SessionHandle>,
        losses: u32,
        events: Events,
    }

    impl RecordingDriver {
        fn work(&mut self) -> Result<u32, DriverError> {
            if self.losses > 0 {
                self.losses -= 1;
                return Err(DriverError::ConnectionLost);
            }
            Ok(7)
        }
    }

    impl Transaction for RecordingDriver {
        fn name(&self) -> &'static str {
            "FB03"
        }

        fn start(&mut self, handle: SessionHandle) -> Result<(), DriverError> {
            let event = if self.handle.is_some() { "start-while-holding" } else { "start" };
            self.events.lock().unwrap().push(event);
            self.handle = Some(handle);
            Ok(())
        }

        fn close(&mut self) -> Result<Option<SessionHandle>, DriverError> {
            Ok(self.handle.take())
        }

        fn release(&mut self) {
            if self.handle.take().is_some() {
                self.events.lock().unwrap().push("release");
            }
        }

        fn is_ready(&self) -> bool {
            self.handle.is_some()
        }
    }

    #[test]
    fn test_dead_handle_is_released_before_reconnect() {
        let host = host();
        let events = Events::default();
        let connector = RecordingConnector {
            inner: host.connector(),
            events: events.clone(),
        };
        let mut runner = RecoveryRunner::new(Box::new(connector), "P25", 3);
        let mut driver = RecordingDriver {
            handle: None,
            losses: 2,
            events: events.clone(),
        };

        let handle = runner.open().unwrap();
        runner.launch(&mut driver, handle).unwrap();
        let attempt = runner.run(&mut driver, &ctx(), |d| d.work()).unwrap();

        assert_eq!(attempt, Attempt::Succeeded(7));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["open", "start", "release", "open", "start", "release", "open", "start"]
        );
    }
}
