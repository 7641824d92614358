//! 模拟远程主机 - 基础设施层
//!
//! 在内存中模拟 VA03 / FB03 / QM02 三个事务的屏幕行为，用于测试和演练：
//!
//! - 主机数据来自 [`HostFixture`]（由 `models::loaders::toml_loader` 从 TOML 文件加载）
//! - 支持注入连接丢失（按键时断开、整体不可达、强制杀掉会话）
//! - 会话之间共享主机数据，每个会话各自维护屏幕状态

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::gui::{GuiFault, GuiResult, GuiSession, MessageType, StatusBar, VKey, WindowInfo};
use super::session::{ConnectionError, Connector, SessionHandle};

// ========== 主机数据 ==========

/// 模拟主机的初始数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFixture {
    #[serde(default)]
    pub orders: Vec<OrderFixture>,
    #[serde(default)]
    pub documents: Vec<DocumentFixture>,
    #[serde(default)]
    pub notifications: Vec<NotificationFixture>,
}

/// 订单（VA03）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFixture {
    pub number: u64,
    /// 输入订单号后弹出的信息窗口内容
    #[serde(default)]
    pub popup: Option<String>,
    /// 弹窗标题，缺省为 "Information"
    #[serde(default)]
    pub popup_title: Option<String>,
    /// 弹窗不响应按键和按钮
    #[serde(default)]
    pub popup_sticky: bool,
    /// 打开凭证流时状态栏上的错误
    #[serde(default)]
    pub flow_error: Option<String>,
    /// 凭证流树（顶层节点互为兄弟）
    #[serde(default)]
    pub flow: Vec<FlowNode>,
}

/// 凭证流树节点
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowNode {
    pub text: String,
    /// 双击节点后明细网格中的参考号
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub children: Vec<FlowNode>,
}

impl FlowNode {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_children(mut self, children: Vec<FlowNode>) -> Self {
        self.children = children;
        self
    }
}

/// 会计凭证（FB03）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFixture {
    pub company_code: String,
    pub number: u64,
    pub year: u16,
    #[serde(default)]
    pub text: String,
    /// 已清账的凭证文本不可修改
    #[serde(default)]
    pub cleared: bool,
    /// 打开凭证时状态栏上的警告
    #[serde(default)]
    pub header_warning: Option<String>,
    /// 保存时状态栏上的错误
    #[serde(default)]
    pub save_error: Option<String>,
    /// 保存时提示"到期日已过"
    #[serde(default)]
    pub due_date_in_past: bool,
}

/// 服务通知（QM02）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFixture {
    pub number: u64,
    #[serde(default)]
    pub display_only: bool,
    /// 前 N 次打开时通知被其他用户锁定
    #[serde(default)]
    pub blocked_attempts: u32,
    #[serde(default)]
    pub tasks: Vec<TaskFixture>,
    /// 完成时触发"状态检查错误"的任务编号
    #[serde(default)]
    pub failing_tasks: Vec<u32>,
    /// 整体完成时触发"状态检查错误"
    #[serde(default)]
    pub fail_completion: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_visible_rows")]
    pub visible_rows: usize,
}

/// 通知任务
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFixture {
    pub number: u32,
    #[serde(default)]
    pub completion_date: String,
}

fn default_visible_rows() -> usize {
    5
}

impl Default for NotificationFixture {
    fn default() -> Self {
        Self {
            number: 0,
            display_only: false,
            blocked_attempts: 0,
            tasks: Vec::new(),
            failing_tasks: Vec::new(),
            fail_completion: false,
            completed: false,
            visible_rows: default_visible_rows(),
        }
    }
}

// ========== 主机 ==========

#[derive(Debug)]
struct HostState {
    fixture: HostFixture,
    reachable: bool,
    next_session_id: u64,
    live_sessions: HashSet<u64>,
    sessions_opened: usize,
    /// 接下来 N 次按键会断开发出按键的会话
    disconnect_on_keys: u32,
    /// 断开前先放行的按键次数
    keys_before_disconnect: u32,
    saves: Vec<(String, u64, u16)>,
}

/// 模拟远程主机
///
/// 克隆后共享同一份主机数据。
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    inner: Arc<Mutex<HostState>>,
}

impl SimulatedHost {
    pub fn new(fixture: HostFixture) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HostState {
                fixture,
                reachable: true,
                next_session_id: 1,
                live_sessions: HashSet::new(),
                sessions_opened: 0,
                disconnect_on_keys: 0,
                keys_before_disconnect: 0,
                saves: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        lock(&self.inner)
    }

    /// 创建会话工厂
    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector { host: self.clone() }
    }

    /// 设置主机是否可达
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// 接下来 `count` 次按键各自断开发出按键的会话
    pub fn drop_connection_on_next_keys(&self, count: u32) {
        self.drop_connection_after_keys(0, count);
    }

    /// 先放行 `after` 次按键，之后的 `count` 次按键各自断开发出按键的会话
    pub fn drop_connection_after_keys(&self, after: u32, count: u32) {
        let mut state = self.state();
        state.keys_before_disconnect = after;
        state.disconnect_on_keys = count;
    }

    /// 立即断开所有现有会话
    pub fn kill_sessions(&self) {
        self.state().live_sessions.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn document_text(&self, company_code: &str, number: u64, year: u16) -> Option<String> {
        self.state()
            .fixture
            .documents
            .iter()
            .find(|d| d.company_code == company_code && d.number == number && d.year == year)
            .map(|d| d.text.clone())
    }

    /// 凭证被保存的次数
    pub fn document_saves(&self, company_code: &str, number: u64, year: u16) -> usize {
        self.state()
            .saves
            .iter()
            .filter(|(c, n, y)| c == company_code && *n == number && *y == year)
            .count()
    }

    pub fn notification_completed(&self, number: u64) -> bool {
        self.state()
            .fixture
            .notifications
            .iter()
            .any(|n| n.number == number && n.completed)
    }

    /// 已填写完成日期的任务编号
    pub fn completed_tasks(&self, number: u64) -> Vec<u32> {
        self.state()
            .fixture
            .notifications
            .iter()
            .find(|n| n.number == number)
            .map(|n| {
                n.tasks
                    .iter()
                    .filter(|t| !t.completion_date.is_empty())
                    .map(|t| t.number)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lock(inner: &Arc<Mutex<HostState>>) -> MutexGuard<'_, HostState> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 模拟主机的会话工厂
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    host: SimulatedHost,
}

impl Connector for SimulatedConnector {
    fn open(&mut self, system: &str) -> Result<SessionHandle, ConnectionError> {
        let mut state = self.host.state();
        if !state.reachable {
            return Err(ConnectionError::Unreachable {
                system: system.to_string(),
                reason: "simulated host is unreachable".to_string(),
            });
        }

        let id = state.next_session_id;
        state.next_session_id += 1;
        state.sessions_opened += 1;
        state.live_sessions.insert(id);
        drop(state);

        let session = SimSession::new(id, self.host.inner.clone());
        Ok(SessionHandle::new(system, Box::new(session)))
    }
}

// ========== 会话 ==========

type DocKey = (String, u64, u16);

#[derive(Debug, Clone, PartialEq)]
enum Screen {
    Empty,
    Va03Initial,
    Va03Overview { order: u64 },
    Va03DocFlow { order: u64 },
    Va03Accounting { reference: String },
    Fb03Initial,
    Fb03Header { key: DocKey },
    Fb03LineItem { key: DocKey, editing: bool },
    Qm02Initial,
    Qm02Notification { number: u64 },
}

#[derive(Debug, Clone)]
struct Modal {
    title: String,
    lines: Vec<String>,
    buttons: Vec<String>,
    sticky: bool,
}

impl Modal {
    fn new(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: message.lines().map(str::to_string).collect(),
            buttons: vec!["Yes".to_string(), "No".to_string()],
            sticky: false,
        }
    }
}

const VA03_SEARCH_FIELDS: [&str; 6] = [
    "VBAK-VBELN",
    "RV45S-BSTNK",
    "RV45S-KUNNR",
    "RV45Z-LFNKD",
    "RV45S-FAKKD",
    "RV45S-PSPID",
];
const FB03_SEARCH_FIELDS: [&str; 3] = ["RF05L-BUKRS", "RF05L-BELNR", "RF05L-GJAHR"];
const VA03_FLOW_TREE: &str = "usr/shell/shellcont[1]/shell[1]";
const VA03_DETAIL_GRID: &str = "shellcont/shell";
const QM02_TASK_TABLE: &str = "SAPLIQS0MASSNAHMEN_VIEWER";
const QM02_TAB_STRIP: &str = "TAB_GROUP_10";
const QM02_DATA_TAB: usize = 3;
const SIMULATED_COMPLETION_DATE: &str = "18.10.2026";

struct SimSession {
    id: u64,
    host: Arc<Mutex<HostState>>,
    tcode: Option<String>,
    screen: Screen,
    fields: std::collections::HashMap<String, String>,
    focus: Option<String>,
    status: StatusBar,
    modal: Option<Modal>,
    // FB03
    pending_text: Option<String>,
    save_pending: bool,
    // QM02
    selected_tab: Option<usize>,
    table_offset: usize,
    selected_row: Option<usize>,
    pending_tasks: BTreeSet<u32>,
    completion_pending: bool,
}

impl SimSession {
    fn new(id: u64, host: Arc<Mutex<HostState>>) -> Self {
        Self {
            id,
            host,
            tcode: None,
            screen: Screen::Empty,
            fields: Default::default(),
            focus: None,
            status: StatusBar::default(),
            modal: None,
            pending_text: None,
            save_pending: false,
            selected_tab: None,
            table_offset: 0,
            selected_row: None,
            pending_tasks: BTreeSet::new(),
            completion_pending: false,
        }
    }

    fn ensure_alive(&self) -> GuiResult<()> {
        if lock(&self.host).live_sessions.contains(&self.id) {
            Ok(())
        } else {
            Err(GuiFault::Transport(
                "The RPC server is unavailable".to_string(),
            ))
        }
    }

    fn set_status(&mut self, text: impl Into<String>, kind: MessageType) {
        self.status = StatusBar::new(text, kind);
    }

    fn clear_status(&mut self) {
        self.status = StatusBar::default();
    }

    fn go(&mut self, screen: Screen) {
        self.screen = screen;
        self.focus = None;
    }

    fn field(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    fn flow_node(&self, order: u64, key: &str) -> GuiResult<Option<FlowNode>> {
        let state = lock(&self.host);
        let fixture = state
            .fixture
            .orders
            .iter()
            .find(|o| o.number == order)
            .ok_or_else(|| GuiFault::ControlNotFound(VA03_FLOW_TREE.to_string()))?;

        let mut level = &fixture.flow;
        let mut node = None;
        for part in key.split('.') {
            let idx: usize = part
                .parse()
                .map_err(|_| GuiFault::Remote(format!("invalid node key '{key}'")))?;
            match level.get(idx) {
                Some(n) => {
                    node = Some(n);
                    level = &n.children;
                }
                None => return Ok(None),
            }
        }
        Ok(node.cloned())
    }

    fn flow_order(&self, tree: &str) -> GuiResult<u64> {
        match &self.screen {
            Screen::Va03DocFlow { order } if tree == VA03_FLOW_TREE => Ok(*order),
            _ => Err(GuiFault::ControlNotFound(tree.to_string())),
        }
    }

    fn notification_number(&self, control: &str) -> GuiResult<u64> {
        match &self.screen {
            Screen::Qm02Notification { number } => Ok(*number),
            _ => Err(GuiFault::ControlNotFound(control.to_string())),
        }
    }

    fn task_table(&self, table: &str) -> GuiResult<(u64, Vec<TaskFixture>, usize)> {
        let number = self.notification_number(table)?;
        if table != QM02_TASK_TABLE || self.selected_tab != Some(QM02_DATA_TAB) {
            return Err(GuiFault::ControlNotFound(table.to_string()));
        }
        let state = lock(&self.host);
        let notif = state
            .fixture
            .notifications
            .iter()
            .find(|n| n.number == number)
            .ok_or_else(|| GuiFault::ControlNotFound(table.to_string()))?;
        let mut tasks = notif.tasks.clone();
        for task in tasks.iter_mut() {
            if self.pending_tasks.contains(&task.number) {
                task.completion_date = SIMULATED_COMPLETION_DATE.to_string();
            }
        }
        Ok((number, tasks, notif.visible_rows.max(1)))
    }

    // ---------- 按键处理 ----------

    fn on_key(&mut self, key: VKey) -> GuiResult<()> {
        if let Some(modal) = &self.modal {
            // 弹窗上 Enter 确认、F12 取消，其余按键无效
            if !modal.sticky && matches!(key, VKey::Enter | VKey::F12) {
                self.modal = None;
            }
            return Ok(());
        }

        match (self.screen.clone(), key) {
            (Screen::Va03Initial, VKey::Enter) => self.va03_open_order(),
            (Screen::Va03Overview { order }, VKey::F5) => self.va03_open_flow(order),
            (Screen::Va03Overview { .. }, VKey::F2) => {}
            (Screen::Va03Overview { .. }, VKey::F3 | VKey::F12) => self.go(Screen::Va03Initial),
            (Screen::Va03DocFlow { order }, VKey::ShiftF3)
            | (Screen::Va03DocFlow { order }, VKey::F3) => self.go(Screen::Va03Overview { order }),
            (Screen::Va03Accounting { .. }, VKey::ShiftF3 | VKey::F3 | VKey::F12) => {
                // 明细视图返回到概览
                let order = self.field("VBAK-VBELN").parse().unwrap_or_default();
                self.go(Screen::Va03Overview { order });
            }
            (Screen::Fb03Initial, VKey::Enter) => self.fb03_open_document(),
            (Screen::Fb03Header { key }, VKey::F2) => {
                if self.focus.as_deref() == Some("RF05L-ANZDT") {
                    self.go(Screen::Fb03LineItem {
                        key,
                        editing: false,
                    });
                }
            }
            (Screen::Fb03Header { .. }, VKey::F12 | VKey::F3) => self.go(Screen::Fb03Initial),
            (Screen::Fb03LineItem { key, editing }, VKey::CtrlF1) => {
                self.screen = Screen::Fb03LineItem {
                    key,
                    editing: !editing,
                };
            }
            (Screen::Fb03LineItem { key, .. }, VKey::CtrlS) => self.fb03_save(key),
            (Screen::Fb03LineItem { key, .. }, VKey::Enter) if self.save_pending => {
                self.fb03_commit(key)
            }
            (Screen::Fb03LineItem { key, .. }, VKey::F12 | VKey::F3) => {
                self.pending_text = None;
                self.save_pending = false;
                self.go(Screen::Fb03Header { key });
            }
            (Screen::Qm02Initial, VKey::Enter) => self.qm02_open_notification(),
            (Screen::Qm02Notification { number }, VKey::Enter) if self.completion_pending => {
                self.qm02_save(number)
            }
            (Screen::Qm02Notification { .. }, VKey::F12 | VKey::ShiftF3 | VKey::F3) => {
                self.qm02_leave()
            }
            _ => {}
        }
        Ok(())
    }

    fn va03_open_order(&mut self) {
        let raw = self.field("VBAK-VBELN");
        let order = raw.trim().parse::<u64>().ok();
        let fixture = order.and_then(|number| {
            lock(&self.host)
                .fixture
                .orders
                .iter()
                .find(|o| o.number == number)
                .cloned()
        });

        match fixture {
            None => self.set_status(
                format!("SD document {raw} is not in the database or has been archived"),
                MessageType::Error,
            ),
            Some(order) => {
                self.clear_status();
                self.go(Screen::Va03Overview {
                    order: order.number,
                });
                if let Some(message) = &order.popup {
                    let title = order.popup_title.as_deref().unwrap_or("Information");
                    let mut modal = Modal::new(title, message);
                    modal.sticky = order.popup_sticky;
                    self.modal = Some(modal);
                }
            }
        }
    }

    fn va03_open_flow(&mut self, order: u64) {
        if self.focus.as_deref() != Some("KUWEV-KUNNR") {
            return;
        }
        let flow_error = lock(&self.host)
            .fixture
            .orders
            .iter()
            .find(|o| o.number == order)
            .and_then(|o| o.flow_error.clone());

        match flow_error {
            Some(message) => self.set_status(message, MessageType::Error),
            None => {
                self.clear_status();
                self.go(Screen::Va03DocFlow { order });
            }
        }
    }

    fn fb03_open_document(&mut self) {
        let company_code = self.field("RF05L-BUKRS");
        let raw_number = self.field("RF05L-BELNR");
        let raw_year = self.field("RF05L-GJAHR");
        let number = raw_number.trim().parse::<u64>().ok();
        let year = raw_year.trim().parse::<u16>().ok();

        let fixture = match (number, year) {
            (Some(number), Some(year)) => lock(&self.host)
                .fixture
                .documents
                .iter()
                .find(|d| d.company_code == company_code && d.number == number && d.year == year)
                .cloned(),
            _ => None,
        };

        match fixture {
            None => self.set_status(
                format!("Document {raw_number} {company_code} {raw_year} does not exist"),
                MessageType::Error,
            ),
            Some(doc) => {
                match &doc.header_warning {
                    Some(message) => self.set_status(message.clone(), MessageType::Warning),
                    None => self.clear_status(),
                }
                self.go(Screen::Fb03Header {
                    key: (doc.company_code, doc.number, doc.year),
                });
            }
        }
    }

    fn document(&self, key: &DocKey) -> Option<DocumentFixture> {
        lock(&self.host)
            .fixture
            .documents
            .iter()
            .find(|d| d.company_code == key.0 && d.number == key.1 && d.year == key.2)
            .cloned()
    }

    fn fb03_save(&mut self, key: DocKey) {
        let Some(doc) = self.document(&key) else {
            return;
        };
        if self.pending_text.is_none() {
            self.set_status("No data was changed", MessageType::Success);
            return;
        }
        if let Some(message) = &doc.save_error {
            self.set_status(message.clone(), MessageType::Error);
            return;
        }
        if doc.due_date_in_past {
            self.save_pending = true;
            self.set_status(
                "Net due date on 01.01.2024 is in the past",
                MessageType::Warning,
            );
            return;
        }
        self.fb03_commit(key);
    }

    fn fb03_commit(&mut self, key: DocKey) {
        let Some(text) = self.pending_text.take() else {
            return;
        };
        self.save_pending = false;
        {
            let mut state = lock(&self.host);
            if let Some(doc) = state
                .fixture
                .documents
                .iter_mut()
                .find(|d| d.company_code == key.0 && d.number == key.1 && d.year == key.2)
            {
                doc.text = text;
            }
            state.saves.push(key.clone());
        }
        self.set_status(
            format!("Document {} was saved in company code {}", key.1, key.0),
            MessageType::Success,
        );
        self.go(Screen::Fb03Initial);
    }

    fn qm02_open_notification(&mut self) {
        let raw = self.field("RIWO00-QMNUM");
        let number = raw.trim().parse::<u64>().ok();

        let mut state = lock(&self.host);
        let notif = number.and_then(|n| {
            state
                .fixture
                .notifications
                .iter_mut()
                .find(|x| x.number == n)
        });

        let Some(notif) = notif else {
            drop(state);
            self.set_status(
                format!("Notification {raw} does not exist"),
                MessageType::Error,
            );
            return;
        };

        if notif.blocked_attempts > 0 {
            notif.blocked_attempts -= 1;
            drop(state);
            self.set_status(
                format!("Notification {raw} is currently blocked by user BATCH01"),
                MessageType::Error,
            );
            return;
        }

        let display_only = notif.display_only || notif.completed;
        let number = notif.number;
        drop(state);

        self.pending_tasks.clear();
        self.completion_pending = false;
        self.selected_tab = None;
        self.table_offset = 0;
        self.selected_row = None;
        self.go(Screen::Qm02Notification { number });

        if display_only {
            self.set_status(
                format!("Notification {raw} is completed and can only be displayed"),
                MessageType::Warning,
            );
        } else {
            self.clear_status();
        }
    }

    fn qm02_complete_selected_task(&mut self, number: u64) -> GuiResult<()> {
        let (_, tasks, _) = self.task_table(QM02_TASK_TABLE)?;
        let row = self
            .selected_row
            .ok_or_else(|| GuiFault::Remote("no task row selected".to_string()))?;
        let task = tasks
            .get(row)
            .ok_or_else(|| GuiFault::Remote(format!("task row {row} is empty")))?;

        let failing = lock(&self.host)
            .fixture
            .notifications
            .iter()
            .find(|n| n.number == number)
            .map(|n| n.failing_tasks.contains(&task.number))
            .unwrap_or(false);

        if failing {
            self.modal = Some(Modal::new(
                "Status check error",
                "Task cannot be completed: status check failed",
            ));
        } else {
            self.pending_tasks.insert(task.number);
        }
        Ok(())
    }

    fn qm02_complete_notification(&mut self, number: u64) {
        let (fail_completion, open_tasks) = {
            let state = lock(&self.host);
            match state.fixture.notifications.iter().find(|n| n.number == number) {
                Some(n) => (
                    n.fail_completion,
                    n.tasks.iter().any(|t| {
                        t.completion_date.is_empty() && !self.pending_tasks.contains(&t.number)
                    }),
                ),
                None => (true, false),
            }
        };

        if fail_completion || open_tasks {
            self.modal = Some(Modal::new(
                "Status check error",
                "Notification cannot be completed: outstanding tasks",
            ));
        } else {
            self.completion_pending = true;
        }
    }

    fn qm02_save(&mut self, number: u64) {
        {
            let mut state = lock(&self.host);
            if let Some(notif) = state
                .fixture
                .notifications
                .iter_mut()
                .find(|n| n.number == number)
            {
                for task in notif.tasks.iter_mut() {
                    if self.pending_tasks.contains(&task.number) {
                        task.completion_date = SIMULATED_COMPLETION_DATE.to_string();
                    }
                }
                notif.completed = true;
            }
        }
        self.pending_tasks.clear();
        self.completion_pending = false;
        self.set_status(
            format!("Notification {number} saved"),
            MessageType::Success,
        );
        self.go(Screen::Qm02Initial);
    }

    fn qm02_leave(&mut self) {
        self.pending_tasks.clear();
        self.completion_pending = false;
        self.go(Screen::Qm02Initial);
    }
}

impl GuiSession for SimSession {
    fn start_transaction(&mut self, code: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        let screen = match code {
            "VA03" => Screen::Va03Initial,
            "FB03" => Screen::Fb03Initial,
            "QM02" => Screen::Qm02Initial,
            other => return Err(GuiFault::Remote(format!("unknown transaction '{other}'"))),
        };
        self.tcode = Some(code.to_string());
        self.fields.clear();
        self.modal = None;
        self.pending_text = None;
        self.save_pending = false;
        self.clear_status();
        self.go(screen);
        Ok(())
    }

    fn end_transaction(&mut self) -> GuiResult<()> {
        self.ensure_alive()?;
        self.tcode = None;
        self.fields.clear();
        self.modal = None;
        self.clear_status();
        self.go(Screen::Empty);
        Ok(())
    }

    fn send_vkey(&mut self, key: VKey) -> GuiResult<()> {
        self.ensure_alive()?;
        {
            let mut state = lock(&self.host);
            if state.disconnect_on_keys > 0 && state.keys_before_disconnect > 0 {
                state.keys_before_disconnect -= 1;
            } else if state.disconnect_on_keys > 0 {
                state.disconnect_on_keys -= 1;
                state.live_sessions.remove(&self.id);
                return Err(GuiFault::Transport(
                    "The RPC server is unavailable".to_string(),
                ));
            }
        }
        self.on_key(key)
    }

    fn set_text(&mut self, control: &str, value: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        match &self.screen {
            Screen::Va03Initial if VA03_SEARCH_FIELDS.contains(&control) => {}
            Screen::Fb03Initial if FB03_SEARCH_FIELDS.contains(&control) => {}
            Screen::Qm02Initial if control == "RIWO00-QMNUM" => {}
            Screen::Fb03LineItem { key, editing } if control == "BSEG-SGTXT" => {
                let cleared = self.document(key).map(|d| d.cleared).unwrap_or(false);
                if !editing || cleared {
                    return Err(GuiFault::Rejected {
                        control: control.to_string(),
                        message: "field is not changeable".to_string(),
                    });
                }
                self.pending_text = Some(value.to_string());
                return Ok(());
            }
            _ => return Err(GuiFault::ControlNotFound(control.to_string())),
        }
        self.fields.insert(control.to_string(), value.to_string());
        Ok(())
    }

    fn text(&mut self, control: &str) -> GuiResult<String> {
        self.ensure_alive()?;
        match &self.screen {
            Screen::Fb03LineItem { key, .. } if control == "BSEG-SGTXT" => {
                if let Some(text) = &self.pending_text {
                    return Ok(text.clone());
                }
                self.document(key)
                    .map(|d| d.text)
                    .ok_or_else(|| GuiFault::ControlNotFound(control.to_string()))
            }
            _ => self
                .fields
                .get(control)
                .cloned()
                .ok_or_else(|| GuiFault::ControlNotFound(control.to_string())),
        }
    }

    fn set_focus(&mut self, control: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        let valid = matches!(
            (&self.screen, control),
            (Screen::Va03Overview { .. }, "KUWEV-KUNNR") | (Screen::Fb03Header { .. }, "RF05L-ANZDT")
        );
        if !valid {
            return Err(GuiFault::ControlNotFound(control.to_string()));
        }
        self.focus = Some(control.to_string());
        Ok(())
    }

    fn press(&mut self, control: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        let number = self.notification_number(control)?;
        match control {
            "FC_ERLEDIGT" => self.qm02_complete_selected_task(number),
            "tbar[1]/btn[20]" => {
                self.qm02_complete_notification(number);
                Ok(())
            }
            other => Err(GuiFault::ControlNotFound(other.to_string())),
        }
    }

    fn control_count(&mut self, control: &str) -> GuiResult<usize> {
        self.ensure_alive()?;
        let count = match (&self.screen, control) {
            (Screen::Fb03Header { key } | Screen::Fb03LineItem { key, .. }, "BSEG-AUGBL") => {
                usize::from(self.document(key).map(|d| d.cleared).unwrap_or(false))
            }
            _ => 0,
        };
        Ok(count)
    }

    fn select_tab(&mut self, strip: &str, index: usize) -> GuiResult<()> {
        self.ensure_alive()?;
        self.notification_number(strip)?;
        if strip != QM02_TAB_STRIP {
            return Err(GuiFault::ControlNotFound(strip.to_string()));
        }
        self.selected_tab = Some(index);
        Ok(())
    }

    fn status_bar(&mut self) -> GuiResult<StatusBar> {
        self.ensure_alive()?;
        Ok(self.status.clone())
    }

    fn active_window(&mut self) -> GuiResult<WindowInfo> {
        self.ensure_alive()?;
        Ok(match &self.modal {
            Some(modal) => WindowInfo::modal(modal.title.clone()),
            None => WindowInfo::main(self.tcode.clone().unwrap_or_default()),
        })
    }

    fn dialog_lines(&mut self) -> GuiResult<Vec<String>> {
        self.ensure_alive()?;
        self.modal
            .as_ref()
            .map(|m| m.lines.clone())
            .ok_or_else(|| GuiFault::ControlNotFound("wnd[1]/usr".to_string()))
    }

    fn dialog_buttons(&mut self) -> GuiResult<Vec<String>> {
        self.ensure_alive()?;
        self.modal
            .as_ref()
            .map(|m| m.buttons.clone())
            .ok_or_else(|| GuiFault::ControlNotFound("wnd[1]".to_string()))
    }

    fn press_dialog_button(&mut self, caption: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        match &self.modal {
            Some(modal) if modal.buttons.iter().any(|b| b == caption) => {
                if !modal.sticky {
                    self.modal = None;
                }
                Ok(())
            }
            _ => Err(GuiFault::ControlNotFound(caption.to_string())),
        }
    }

    fn tree_top_node(&mut self, tree: &str) -> GuiResult<Option<String>> {
        self.ensure_alive()?;
        let order = self.flow_order(tree)?;
        Ok(self.flow_node(order, "0")?.map(|_| "0".to_string()))
    }

    fn tree_node_text(&mut self, tree: &str, key: &str) -> GuiResult<String> {
        self.ensure_alive()?;
        let order = self.flow_order(tree)?;
        self.flow_node(order, key)?
            .map(|n| n.text)
            .ok_or_else(|| GuiFault::Remote(format!("unknown node key '{key}'")))
    }

    fn tree_first_child(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>> {
        self.ensure_alive()?;
        let order = self.flow_order(tree)?;
        let child = format!("{key}.0");
        Ok(self.flow_node(order, &child)?.map(|_| child))
    }

    fn tree_next_sibling(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>> {
        self.ensure_alive()?;
        let order = self.flow_order(tree)?;
        let (parent, last) = match key.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, key),
        };
        let idx: usize = last
            .parse()
            .map_err(|_| GuiFault::Remote(format!("invalid node key '{key}'")))?;
        let sibling = match parent {
            Some(parent) => format!("{parent}.{}", idx + 1),
            None => (idx + 1).to_string(),
        };
        Ok(self.flow_node(order, &sibling)?.map(|_| sibling))
    }

    fn tree_open_node(&mut self, tree: &str, key: &str) -> GuiResult<()> {
        self.ensure_alive()?;
        let order = self.flow_order(tree)?;
        let node = self
            .flow_node(order, key)?
            .ok_or_else(|| GuiFault::Remote(format!("unknown node key '{key}'")))?;
        self.go(Screen::Va03Accounting {
            reference: node.reference.unwrap_or_default(),
        });
        Ok(())
    }

    fn grid_cell(&mut self, grid: &str, row: usize, column: &str) -> GuiResult<String> {
        self.ensure_alive()?;
        match &self.screen {
            Screen::Va03Accounting { reference }
                if grid == VA03_DETAIL_GRID && row == 0 && column == "DOCNUV" =>
            {
                Ok(reference.clone())
            }
            _ => Err(GuiFault::ControlNotFound(format!("{grid}[{row}, {column}]"))),
        }
    }

    fn table_row_count(&mut self, table: &str) -> GuiResult<usize> {
        self.ensure_alive()?;
        let (_, tasks, _) = self.task_table(table)?;
        // 表格控件总会多出一行空白输入行
        Ok(tasks.len() + 1)
    }

    fn table_visible_rows(&mut self, table: &str) -> GuiResult<usize> {
        self.ensure_alive()?;
        let (_, _, visible) = self.task_table(table)?;
        Ok(visible)
    }

    fn table_cell(&mut self, table: &str, visible_row: usize, column: usize) -> GuiResult<String> {
        self.ensure_alive()?;
        let (_, tasks, visible) = self.task_table(table)?;
        if visible_row >= visible {
            return Err(GuiFault::ControlNotFound(format!(
                "{table}[{visible_row}, {column}]"
            )));
        }
        let task = tasks.get(self.table_offset + visible_row);
        Ok(match (task, column) {
            (Some(task), 0) => task.number.to_string(),
            (Some(task), 16) => task.completion_date.clone(),
            _ => String::new(),
        })
    }

    fn table_scroll_to(&mut self, table: &str, position: usize) -> GuiResult<()> {
        self.ensure_alive()?;
        let (_, tasks, _) = self.task_table(table)?;
        self.table_offset = position.min(tasks.len());
        Ok(())
    }

    fn table_select_row(&mut self, table: &str, absolute_row: usize) -> GuiResult<()> {
        self.ensure_alive()?;
        let (_, _, visible) = self.task_table(table)?;
        if absolute_row < self.table_offset || absolute_row >= self.table_offset + visible {
            return Err(GuiFault::ControlNotFound(format!(
                "{table} row {absolute_row}"
            )));
        }
        self.selected_row = Some(absolute_row);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.ensure_alive().is_ok()
    }

    fn disconnect(&mut self) {
        lock(&self.host).live_sessions.remove(&self.id);
    }
}
