//! 对话框分类 - 业务能力层
//!
//! 无状态的辅助函数：根据当前窗口和状态栏判断屏幕处于什么状态，
//! 并按"确认 / 取消"意图关闭已知的弹窗。
//!
//! 未知标题的弹窗一律视为协议错误，驱动不会盲目关闭它不认识的窗口。

use phf::phf_map;

use crate::infrastructure::{GuiResult, GuiSession, MessageType, StatusBar, VKey, WindowInfo};
use crate::services::transaction::{DriverError, StepResult};

/// 已知的弹窗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownDialog {
    Information,
    StatusCheckError,
    DocumentLineMessages,
}

static KNOWN_DIALOGS: phf::Map<&'static str, KnownDialog> = phf_map! {
    "Information" => KnownDialog::Information,
    "Status check error" => KnownDialog::StatusCheckError,
    "Document lines: Display messages" => KnownDialog::DocumentLineMessages,
};

impl KnownDialog {
    pub fn from_title(title: &str) -> Option<Self> {
        KNOWN_DIALOGS.get(title.trim()).copied()
    }
}

/// 阻塞弹窗
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub title: String,
    pub known: Option<KnownDialog>,
}

impl Popup {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let known = KnownDialog::from_title(&title);
        Self { title, known }
    }

    pub fn is(&self, dialog: KnownDialog) -> bool {
        self.known == Some(dialog)
    }
}

/// 屏幕信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Normal,
    Informational(String),
    Warning(String),
    Error(String),
    BlockingPopup(Popup),
}

/// 根据窗口和状态栏分类，弹窗优先
pub fn classify(window: &WindowInfo, status: &StatusBar) -> Signal {
    if window.is_modal() {
        return Signal::BlockingPopup(Popup::new(window.title.clone()));
    }

    match status.kind {
        MessageType::Error | MessageType::Abort => Signal::Error(status.text.clone()),
        MessageType::Warning => Signal::Warning(status.text.clone()),
        MessageType::Information => Signal::Informational(status.text.clone()),
        MessageType::Success | MessageType::None => Signal::Normal,
    }
}

/// 读取当前屏幕并分类
pub fn classify_screen(gui: &mut dyn GuiSession) -> GuiResult<Signal> {
    let window = gui.active_window()?;
    let status = gui.status_bar()?;
    Ok(classify(&window, &status))
}

fn is_popup(gui: &mut dyn GuiSession) -> GuiResult<bool> {
    Ok(gui.active_window()?.is_modal())
}

/// 当前弹窗（如果有）
fn current_popup(gui: &mut dyn GuiSession) -> GuiResult<Option<Popup>> {
    let window = gui.active_window()?;
    Ok(window.is_modal().then(|| Popup::new(window.title)))
}

/// 弹窗中的消息，各行以空格连接
pub fn dialog_message(gui: &mut dyn GuiSession) -> GuiResult<String> {
    let lines = gui.dialog_lines()?;
    Ok(lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

/// 关闭当前弹窗
///
/// # 参数
/// - `confirm`: `true` 按确认（Enter / "Yes"），`false` 按取消（F12 / "No"）
/// - `max_presses`: 按键次数上限
///
/// # 返回
/// - 没有弹窗时直接返回
/// - 未知标题或按键后仍无法关闭时返回 [`DriverError::Protocol`]
pub fn resolve_popup(gui: &mut dyn GuiSession, confirm: bool, max_presses: usize) -> StepResult<()> {
    let Some(popup) = current_popup(gui)? else {
        return Ok(());
    };

    if popup.known.is_none() {
        return Err(DriverError::protocol(format!(
            "Unrecognized dialog window: '{}'!",
            popup.title
        ))
        .into());
    }

    let key = if confirm { VKey::Enter } else { VKey::F12 };
    let mut presses = 0;
    while presses < max_presses {
        match current_popup(gui)? {
            Some(p) if p.known.is_some() => gui.send_vkey(key)?,
            _ => break,
        }
        presses += 1;
    }

    let Some(remaining) = current_popup(gui)? else {
        return Ok(());
    };

    // 关闭一个弹窗后又出现了不认识的弹窗
    if remaining.known.is_none() {
        return Err(DriverError::protocol(format!(
            "Unrecognized dialog window: '{}'!",
            remaining.title
        ))
        .into());
    }

    // 按键无效时退回到按钮
    let caption = if confirm { "Yes" } else { "No" };
    let buttons = gui.dialog_buttons()?;
    if buttons.iter().any(|b| b.trim() == caption) {
        gui.press_dialog_button(caption)?;
        if !is_popup(gui)? {
            return Ok(());
        }
    }

    Err(DriverError::protocol(format!(
        "Could not close the dialog window: '{}'!",
        remaining.title
    ))
    .into())
}
