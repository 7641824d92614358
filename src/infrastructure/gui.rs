//! 远程 GUI 会话能力 - 基础设施层
//!
//! 远程企业系统只暴露"字段 + 虚拟按键 + 状态栏 + 弹窗"这一类屏幕能力，
//! 本模块把它抽象成 [`GuiSession`] trait：
//!
//! - 不认识 Record / 事务流程
//! - 只暴露单次远程调用，每次调用都可能失败（[`GuiFault`]）
//! - 具体后端见 `bridge`（生产）和 `simulator`（测试 / 演练）

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 远程调用结果
pub type GuiResult<T> = Result<T, GuiFault>;

/// 远程调用失败
///
/// 底层调用失败时并不知道会话是否还活着，需要调用方再用
/// [`GuiSession::is_alive`] 探测一次才能区分"连接丢失"和"屏幕模型不对"。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuiFault {
    /// 与远程主机之间的传输失败
    #[error("transport failure: {0}")]
    Transport(String),

    /// 当前屏幕上找不到控件
    #[error("control not found: {0}")]
    ControlNotFound(String),

    /// 控件存在但拒绝了操作（例如只读字段被写入）
    #[error("control '{control}' rejected the operation: {message}")]
    Rejected { control: String, message: String },

    /// 远程端返回的其他错误
    #[error("remote call failed: {0}")]
    Remote(String),
}

/// 虚拟按键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VKey {
    Enter,
    F2,
    F3,
    F5,
    CtrlS,
    F12,
    ShiftF3,
    CtrlF1,
}

impl VKey {
    /// 远程协议使用的虚拟按键码
    pub fn code(self) -> u8 {
        match self {
            VKey::Enter => 0,
            VKey::F2 => 2,
            VKey::F3 => 3,
            VKey::F5 => 5,
            VKey::CtrlS => 11,
            VKey::F12 => 12,
            VKey::ShiftF3 => 15,
            VKey::CtrlF1 => 25,
        }
    }
}

/// 状态栏消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    None,
    Success,
    Information,
    Warning,
    Error,
    Abort,
}

impl MessageType {
    /// 从远程协议的单字母代码解析（S / I / W / E / A）
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "S" => MessageType::Success,
            "I" => MessageType::Information,
            "W" => MessageType::Warning,
            "E" => MessageType::Error,
            "A" => MessageType::Abort,
            _ => MessageType::None,
        }
    }
}

/// 状态栏快照
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusBar {
    pub text: String,
    pub kind: MessageType,
}

impl StatusBar {
    pub fn new(text: impl Into<String>, kind: MessageType) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, MessageType::Error | MessageType::Abort)
    }

    /// 错误或警告
    pub fn is_alert(&self) -> bool {
        self.is_error() || self.kind == MessageType::Warning
    }
}

/// 窗口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Main,
    Modal,
}

/// 当前活动窗口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub kind: WindowKind,
    pub title: String,
}

impl WindowInfo {
    pub fn main(title: impl Into<String>) -> Self {
        Self {
            kind: WindowKind::Main,
            title: title.into(),
        }
    }

    pub fn modal(title: impl Into<String>) -> Self {
        Self {
            kind: WindowKind::Modal,
            title: title.into(),
        }
    }

    pub fn is_modal(&self) -> bool {
        self.kind == WindowKind::Modal
    }
}

/// 远程 GUI 会话
///
/// 所有方法都是阻塞调用：要么返回结果，要么返回 [`GuiFault`]。
/// 控件用远程系统的固定标识符寻址（例如 `"VBAK-VBELN"`）。
pub trait GuiSession: Send {
    // ---------- 事务 ----------

    fn start_transaction(&mut self, code: &str) -> GuiResult<()>;
    fn end_transaction(&mut self) -> GuiResult<()>;

    // ---------- 主窗口 ----------

    fn send_vkey(&mut self, key: VKey) -> GuiResult<()>;
    fn set_text(&mut self, control: &str, value: &str) -> GuiResult<()>;
    fn text(&mut self, control: &str) -> GuiResult<String>;
    fn set_focus(&mut self, control: &str) -> GuiResult<()>;
    fn press(&mut self, control: &str) -> GuiResult<()>;
    /// 当前屏幕上同名控件的数量
    fn control_count(&mut self, control: &str) -> GuiResult<usize>;
    fn select_tab(&mut self, strip: &str, index: usize) -> GuiResult<()>;
    fn status_bar(&mut self) -> GuiResult<StatusBar>;
    fn active_window(&mut self) -> GuiResult<WindowInfo>;

    // ---------- 弹窗 ----------

    /// 弹窗中的消息行（按显示顺序）
    fn dialog_lines(&mut self) -> GuiResult<Vec<String>>;
    /// 弹窗中按钮的标题
    fn dialog_buttons(&mut self) -> GuiResult<Vec<String>>;
    fn press_dialog_button(&mut self, caption: &str) -> GuiResult<()>;

    // ---------- 树控件 ----------

    fn tree_top_node(&mut self, tree: &str) -> GuiResult<Option<String>>;
    fn tree_node_text(&mut self, tree: &str, key: &str) -> GuiResult<String>;
    fn tree_first_child(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>>;
    fn tree_next_sibling(&mut self, tree: &str, key: &str) -> GuiResult<Option<String>>;
    /// 选中并双击节点
    fn tree_open_node(&mut self, tree: &str, key: &str) -> GuiResult<()>;

    // ---------- 网格 / 表格控件 ----------

    fn grid_cell(&mut self, grid: &str, row: usize, column: &str) -> GuiResult<String>;
    /// 表格总行数（包括不可见行）
    fn table_row_count(&mut self, table: &str) -> GuiResult<usize>;
    fn table_visible_rows(&mut self, table: &str) -> GuiResult<usize>;
    /// 可见窗口内的单元格
    fn table_cell(&mut self, table: &str, visible_row: usize, column: usize) -> GuiResult<String>;
    fn table_scroll_to(&mut self, table: &str, position: usize) -> GuiResult<()>;
    fn table_select_row(&mut self, table: &str, absolute_row: usize) -> GuiResult<()>;

    // ---------- 存活探测 ----------

    /// 探测会话是否还活着（只在调用失败后使用）
    fn is_alive(&mut self) -> bool;

    /// 释放远程会话，不返回错误
    fn disconnect(&mut self) {}
}
