//! 服务通知关闭驱动（QM02） - 业务能力层
//!
//! 打开通知，逐个完成尚未填写完成日期的任务，最后整体完成通知。

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::infrastructure::{GuiSession, SessionHandle, VKey};
use crate::services::dialog::{self, KnownDialog, Signal};
use crate::services::transaction::{
    BusinessWarning, DriverCore, DriverError, StepResult, Transaction,
};

pub const TCODE: &str = "QM02";

const NOTIFICATION_FIELD: &str = "RIWO00-QMNUM";
const TAB_STRIP: &str = "TAB_GROUP_10";
const DATA_TAB: usize = 3;
const TASK_TABLE: &str = "SAPLIQS0MASSNAHMEN_VIEWER";
const TASK_NUMBER_COLUMN: usize = 0;
const COMPLETION_DATE_COLUMN: usize = 16;
const COMPLETE_TASK_BUTTON: &str = "FC_ERLEDIGT";
const COMPLETE_NOTIFICATION_BUTTON: &str = "tbar[1]/btn[20]";

const NOT_FOUND_STATUS: &str = "does not exist";
const DISPLAY_ONLY_STATUS: &str = "can only be displayed";
const LOCKED_STATUS: &str = "blocked";

/// 通知被锁定时的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// 任务表中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub number: u32,
    pub completion_date: String,
    /// 枚举时记录的绝对行号
    pub row: usize,
}

impl TaskRow {
    pub fn is_open(&self) -> bool {
        self.completion_date.trim().is_empty()
    }
}

/// QM02 驱动
#[derive(Debug)]
pub struct NotificationClosure {
    core: DriverCore,
    lock_retry: LockRetry,
}

impl NotificationClosure {
    pub fn new(popup_max_presses: usize, lock_retry: LockRetry) -> Self {
        Self {
            core: DriverCore::new(TCODE, popup_max_presses),
            lock_retry,
        }
    }

    /// 完成服务通知
    ///
    /// # 返回
    /// - `Ok(completed)`: 本次完成的任务数
    /// - `Warning(DisplayOnly)`: 通知只能显示（通常已完成）
    /// - `Business`: 通知不存在、持续被锁定或整体完成时状态检查失败
    pub fn complete(&mut self, notification: u64) -> Result<usize, DriverError> {
        let presses = self.core.popup_max_presses();
        let lock_retry = self.lock_retry;
        self.core
            .run(|gui| complete_notification(gui, notification, presses, lock_retry))
    }
}

impl Transaction for NotificationClosure {
    fn name(&self) -> &'static str {
        TCODE
    }

    fn start(&mut self, handle: SessionHandle) -> Result<(), DriverError> {
        self.core.start(handle, clear_search_field)
    }

    fn close(&mut self) -> Result<Option<SessionHandle>, DriverError> {
        self.core.close()
    }

    fn release(&mut self) {
        self.core.release()
    }

    fn is_ready(&self) -> bool {
        self.core.is_ready()
    }
}

fn complete_notification(
    gui: &mut dyn GuiSession,
    notification: u64,
    presses: usize,
    lock_retry: LockRetry,
) -> StepResult<usize> {
    open_notification(gui, notification, presses, lock_retry)?;

    gui.select_tab(TAB_STRIP, DATA_TAB)?;
    let tasks = list_tasks(gui)?;
    let open: Vec<&TaskRow> = tasks.iter().filter(|t| t.is_open()).collect();
    debug!(
        "[{}] 通知 {}: 共 {} 个任务，{} 个未完成",
        TCODE,
        notification,
        tasks.len(),
        open.len()
    );

    let mut completed = 0;
    for task in open {
        if complete_task(gui, task, presses)? {
            completed += 1;
        }
    }

    gui.press(COMPLETE_NOTIFICATION_BUTTON)?;

    if is_status_check_error(gui)? {
        // 单个任务的状态检查错误会被跳过，整体完成时则视为失败
        dialog::resolve_popup(gui, false, presses)?;
        gui.send_vkey(VKey::F12)?;
        if has_popup(gui)? {
            dialog::resolve_popup(gui, false, presses)?;
        }
        clear_search_field(gui)?;
        return Err(DriverError::business("Status check error!").into());
    }

    // 确认完成
    gui.send_vkey(VKey::Enter)?;
    clear_search_field(gui)?;

    Ok(completed)
}

fn open_notification(
    gui: &mut dyn GuiSession,
    notification: u64,
    presses: usize,
    lock_retry: LockRetry,
) -> StepResult<()> {
    gui.set_text(NOTIFICATION_FIELD, &notification.to_string())?;
    gui.send_vkey(VKey::Enter)?;

    if has_popup(gui)? {
        dialog::resolve_popup(gui, true, presses)?;
    }

    let message = gui.status_bar()?.text;

    if message.contains(NOT_FOUND_STATUS) {
        clear_search_field(gui)?;
        return Err(DriverError::business(message).into());
    }

    if message.contains(DISPLAY_ONLY_STATUS) {
        gui.send_vkey(VKey::F12)?;
        clear_search_field(gui)?;
        return Err(BusinessWarning::DisplayOnly(message).into());
    }

    if message.contains(LOCKED_STATUS) {
        return reopen_locked(gui, lock_retry);
    }

    if has_popup(gui)? {
        dialog::resolve_popup(gui, true, presses)?;
        to_initial_screen(gui)?;
        clear_search_field(gui)?;
        return Err(DriverError::business(message).into());
    }

    Ok(())
}

/// 通知被其他用户锁定时，间隔重试 Enter
fn reopen_locked(gui: &mut dyn GuiSession, lock_retry: LockRetry) -> StepResult<()> {
    for attempt in 1..=lock_retry.attempts {
        info!(
            "[{}] 通知被锁定，第 {}/{} 次重新打开...",
            TCODE, attempt, lock_retry.attempts
        );
        if !lock_retry.delay.is_zero() {
            thread::sleep(lock_retry.delay);
        }
        gui.send_vkey(VKey::Enter)?;

        if !matches!(dialog::classify_screen(gui)?, Signal::Error(_)) {
            return Ok(());
        }
    }

    match dialog::classify_screen(gui)? {
        Signal::Error(text) => {
            warn!("[{}] 通知仍被锁定: {}", TCODE, text);
            clear_search_field(gui)?;
            Err(DriverError::business(text).into())
        }
        _ => Ok(()),
    }
}

/// 枚举任务表的所有行
///
/// 表格是分页虚拟化的：可见窗口之外的行需要先移动滚动条再读取。
/// 总行数包含末尾的空白输入行，遇到空白任务号即停止。
pub fn list_tasks(gui: &mut dyn GuiSession) -> StepResult<Vec<TaskRow>> {
    let mut tasks = Vec::new();
    let last_row = gui.table_row_count(TASK_TABLE)?.saturating_sub(1);
    let visible_rows = gui.table_visible_rows(TASK_TABLE)?.max(1);

    let mut row = 0;
    while row < last_row {
        let visible_row = row % visible_rows;
        if visible_row == 0 && row > 0 {
            gui.table_scroll_to(TASK_TABLE, row)?;
        }

        let number = gui.table_cell(TASK_TABLE, visible_row, TASK_NUMBER_COLUMN)?;
        let number = number.trim();
        if number.is_empty() {
            break;
        }
        let number = number.parse::<u32>().map_err(|_| {
            DriverError::protocol(format!("Unexpected task number '{number}' in row {row}!"))
        })?;

        let completion_date = gui.table_cell(TASK_TABLE, visible_row, COMPLETION_DATE_COLUMN)?;
        tasks.push(TaskRow {
            number,
            completion_date: completion_date.trim().to_string(),
            row,
        });
        row += 1;
    }

    Ok(tasks)
}

/// 完成单个任务；状态检查错误时取消弹窗并跳过
fn complete_task(gui: &mut dyn GuiSession, task: &TaskRow, presses: usize) -> StepResult<bool> {
    gui.table_scroll_to(TASK_TABLE, task.row)?;
    gui.table_select_row(TASK_TABLE, task.row)?;
    gui.press(COMPLETE_TASK_BUTTON)?;

    if is_status_check_error(gui)? {
        warn!("[{}] 任务 {} 状态检查错误，跳过", TCODE, task.number);
        dialog::resolve_popup(gui, false, presses)?;
        return Ok(false);
    }

    if has_popup(gui)? {
        dialog::resolve_popup(gui, true, presses)?;
    }
    Ok(true)
}

fn has_popup(gui: &mut dyn GuiSession) -> StepResult<bool> {
    Ok(matches!(
        dialog::classify_screen(gui)?,
        Signal::BlockingPopup(_)
    ))
}

fn is_status_check_error(gui: &mut dyn GuiSession) -> StepResult<bool> {
    Ok(matches!(
        dialog::classify_screen(gui)?,
        Signal::BlockingPopup(p) if p.is(KnownDialog::StatusCheckError)
    ))
}

fn to_initial_screen(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.send_vkey(VKey::ShiftF3)?;
    gui.send_vkey(VKey::F12)?;
    Ok(())
}

fn clear_search_field(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.set_text(NOTIFICATION_FIELD, "")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulator::{
        HostFixture, NotificationFixture, SimulatedHost, TaskFixture,
    };
    use crate::infrastructure::Connector;

    const NO_DELAY: LockRetry = LockRetry {
        attempts: 3,
        delay: Duration::ZERO,
    };

    fn task(number: u32, completion_date: &str) -> TaskFixture {
        TaskFixture {
            number,
            completion_date: completion_date.to_string(),
        }
    }

    fn notification(tasks: Vec<TaskFixture>) -> NotificationFixture {
        NotificationFixture {
            number: 300012345,
            tasks,
            visible_rows: 2,
            ..Default::default()
        }
    }

    fn started(notif: NotificationFixture) -> (SimulatedHost, NotificationClosure) {
        let host = SimulatedHost::new(HostFixture {
            notifications: vec![notif],
            ..Default::default()
        });
        let handle = host.connector().open("P25").unwrap();
        let mut driver = NotificationClosure::new(3, NO_DELAY);
        driver.start(handle).unwrap();
        (host, driver)
    }

    #[test]
    fn test_completes_open_tasks_across_pages() {
        let (host, mut driver) = started(notification(vec![
            task(1, "01.02.2024"),
            task(2, ""),
            task(3, ""),
            task(4, "01.02.2024"),
            task(5, ""),
        ]));

        assert_eq!(driver.complete(300012345), Ok(3));
        assert!(host.notification_completed(300012345));
        assert_eq!(host.completed_tasks(300012345), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_notification_is_business_error() {
        let (_host, mut driver) = started(notification(vec![]));

        let err = driver.complete(300099999).unwrap_err();
        assert!(matches!(err, DriverError::Business(ref m) if m.contains("does not exist")));
    }

    #[test]
    fn test_display_only_is_warning() {
        let mut notif = notification(vec![task(1, "")]);
        notif.display_only = true;
        let (host, mut driver) = started(notif);

        let err = driver.complete(300012345).unwrap_err();
        assert!(matches!(err, DriverError::Warning(BusinessWarning::DisplayOnly(_))));
        assert!(host.completed_tasks(300012345).is_empty());
    }

    #[test]
    fn test_temporary_lock_is_retried() {
        let mut notif = notification(vec![task(1, "")]);
        notif.blocked_attempts = 3;
        let (host, mut driver) = started(notif);

        assert_eq!(driver.complete(300012345), Ok(1));
        assert!(host.notification_completed(300012345));
    }

    #[test]
    fn test_persistent_lock_is_business_error() {
        let mut notif = notification(vec![task(1, "")]);
        notif.blocked_attempts = 10;
        let (host, mut driver) = started(notif);

        let err = driver.complete(300012345).unwrap_err();
        assert!(matches!(err, DriverError::Business(ref m) if m.contains("blocked")));
        assert!(!host.notification_completed(300012345));
    }

    #[test]
    fn test_task_status_check_error_is_skipped_but_completion_fails() {
        let mut notif = notification(vec![task(1, ""), task(2, "")]);
        notif.failing_tasks = vec![1];
        let (host, mut driver) = started(notif);

        assert_eq!(
            driver.complete(300012345),
            Err(DriverError::business("Status check error!"))
        );
        assert!(!host.notification_completed(300012345));
        // 未保存的任务完成不会落库
        assert!(host.completed_tasks(300012345).is_empty());
    }

    #[test]
    fn test_completion_status_check_error_fails() {
        let mut notif = notification(vec![task(1, "")]);
        notif.fail_completion = true;
        let (_host, mut driver) = started(notif);

        assert_eq!(
            driver.complete(300012345),
            Err(DriverError::business("Status check error!"))
        );
        // 导航已复位，驱动仍可使用
        assert!(driver.is_ready());
    }

    #[test]
    fn test_list_tasks_stops_at_blank_row() {
        let host = SimulatedHost::new(HostFixture {
            notifications: vec![notification(vec![task(7, ""), task(9, "03.03.2024"), task(11, "")])],
            ..Default::default()
        });
        let mut handle = host.connector().open("P25").unwrap();
        let gui = handle.gui().unwrap();
        gui.start_transaction("QM02").unwrap();
        gui.set_text("RIWO00-QMNUM", "300012345").unwrap();
        gui.send_vkey(VKey::Enter).unwrap();
        gui.select_tab(TAB_STRIP, DATA_TAB).unwrap();

        let tasks = list_tasks(gui).unwrap();
        let rows: Vec<(u32, usize, bool)> =
            tasks.iter().map(|t| (t.number, t.row, t.is_open())).collect();
        assert_eq!(rows, vec![(7, 0, true), (9, 1, false), (11, 2, true)]);
    }
}
