//! 会计凭证文本标注驱动（FB03） - 业务能力层
//!
//! 打开凭证第一行行项目，把案件号以 `"{原文本} D {案件号}"` 的格式
//! 追加到"文本"字段并保存。

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::infrastructure::{GuiFault, GuiSession, SessionHandle, VKey};
use crate::services::dialog::{self, Signal};
use crate::services::transaction::{
    BusinessWarning, DriverCore, DriverError, StepResult, Transaction,
};

pub const TCODE: &str = "FB03";

/// "文本"字段的长度上限
pub const MAX_TEXT_CHARS: usize = 50;

const COMPANY_CODE_FIELD: &str = "RF05L-BUKRS";
const DOCUMENT_FIELD: &str = "RF05L-BELNR";
const YEAR_FIELD: &str = "RF05L-GJAHR";
const LINE_ITEM_ANCHOR: &str = "RF05L-ANZDT";
const TEXT_FIELD: &str = "BSEG-SGTXT";
const CLEARING_FIELD: &str = "BSEG-AUGBL";

const NOT_FOUND_STATUS: &str = "does not exist";
static BENIGN_SAVE_NOTICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Net due date on .+ is in the past").unwrap());

/// 凭证定位信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentKey<'a> {
    pub number: u64,
    pub fiscal_year: u16,
    pub company_code: &'a str,
}

/// FB03 驱动
#[derive(Debug)]
pub struct DocumentAnnotation {
    core: DriverCore,
}

impl DocumentAnnotation {
    pub fn new(popup_max_presses: usize) -> Self {
        Self {
            core: DriverCore::new(TCODE, popup_max_presses),
        }
    }

    /// 把案件号追加到凭证文本
    ///
    /// # 参数
    /// - `key`: 凭证号 / 会计年度 / 公司代码
    /// - `case_id`: 案件号
    ///
    /// # 返回
    /// - `Ok(text)`: 写入后的新文本
    /// - `Warning(CaseIdContained)`: 文本已包含案件号，未写入
    /// - `Business`: 凭证不存在、文本超长、凭证已清账或保存失败
    pub fn annotate(&mut self, key: DocumentKey<'_>, case_id: u64) -> Result<String, DriverError> {
        let presses = self.core.popup_max_presses();
        self.core
            .run(|gui| append_case_id(gui, key, case_id, presses))
    }
}

impl Transaction for DocumentAnnotation {
    fn name(&self) -> &'static str {
        TCODE
    }

    fn start(&mut self, handle: SessionHandle) -> Result<(), DriverError> {
        self.core.start(handle, clear_search_fields)
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

fn append_case_id(
    gui: &mut dyn GuiSession,
    key: DocumentKey<'_>,
    case_id: u64,
    presses: usize,
) -> StepResult<String> {
    open_document(gui, key)?;

    gui.set_focus(LINE_ITEM_ANCHOR)?;
    gui.send_vkey(VKey::F2)?;

    let old_text = gui.text(TEXT_FIELD)?;
    let new_text = match compose_text(&old_text, case_id) {
        Ok(text) => text,
        Err(e) => {
            to_initial_screen(gui)?;
            clear_search_fields(gui)?;
            return Err(e.into());
        }
    };

    if let Signal::BlockingPopup(_) = dialog::classify_screen(gui)? {
        dialog::resolve_popup(gui, false, presses)?;
        to_initial_screen(gui)?;
        clear_search_fields(gui)?;
        return Err(DriverError::business("Unable to edit the document!").into());
    }

    gui.send_vkey(VKey::CtrlF1)?;
    write_text(gui, &new_text)?;
    save_changes(gui)?;
    clear_search_fields(gui)?;

    debug!("[{}] 凭证 {} 文本已更新: {}", TCODE, key.number, new_text);
    Ok(new_text)
}

fn open_document(gui: &mut dyn GuiSession, key: DocumentKey<'_>) -> StepResult<()> {
    gui.set_text(COMPANY_CODE_FIELD, key.company_code)?;
    gui.set_text(DOCUMENT_FIELD, &key.number.to_string())?;
    gui.set_text(YEAR_FIELD, &key.fiscal_year.to_string())?;
    gui.send_vkey(VKey::Enter)?;

    match dialog::classify_screen(gui)? {
        Signal::Error(text) if text.contains(NOT_FOUND_STATUS) => {
            clear_search_fields(gui)?;
            Err(DriverError::business(text).into())
        }
        Signal::Error(text) | Signal::Warning(text) => {
            // 凭证已打开，只需返回一层
            gui.send_vkey(VKey::F12)?;
            clear_search_fields(gui)?;
            Err(DriverError::business(text).into())
        }
        _ => Ok(()),
    }
}

/// 计算追加案件号后的文本
///
/// 文本已包含案件号时返回 `CaseIdContained`；超过字段长度时返回业务错误。
pub fn compose_text(text: &str, case_id: u64) -> Result<String, DriverError> {
    let case_id = case_id.to_string();
    if text.contains(&case_id) {
        return Err(BusinessWarning::CaseIdContained.into());
    }

    let repaired = remove_duplicates(text, &case_id);
    let composed = format!("{} D {}", repaired.trim(), case_id);

    if composed.chars().count() > MAX_TEXT_CHARS {
        return Err(DriverError::business(format!(
            "'Text' value exceeds {MAX_TEXT_CHARS} chars length!"
        )));
    }
    Ok(composed)
}

/// 修复重复写入的案件号：出现两次及以上时全部删除
pub fn remove_duplicates(text: &str, case_id: &str) -> String {
    if case_id.is_empty() || text.matches(case_id).count() < 2 {
        return text.to_string();
    }
    text.replace(case_id, "").trim().to_string()
}

fn write_text(gui: &mut dyn GuiSession, text: &str) -> StepResult<()> {
    match gui.set_text(TEXT_FIELD, text) {
        Ok(()) => Ok(()),
        Err(GuiFault::Rejected { message, .. }) => {
            let cleared = gui.control_count(CLEARING_FIELD)? == 1;
            to_initial_screen(gui)?;
            clear_search_fields(gui)?;
            if cleared {
                Err(DriverError::business(
                    "The document is already cleared and the text cannot be changed!",
                )
                .into())
            } else {
                Err(DriverError::business(message).into())
            }
        }
        Err(fault) => Err(fault.into()),
    }
}

fn save_changes(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.send_vkey(VKey::CtrlS)?;

    let text = match dialog::classify_screen(gui)? {
        Signal::Error(text) | Signal::Warning(text) => text,
        _ => return Ok(()),
    };

    if BENIGN_SAVE_NOTICE.is_match(&text) {
        debug!("[{}] 忽略保存提示: {}", TCODE, text);
        gui.send_vkey(VKey::Enter)?;
        return Ok(());
    }

    to_initial_screen(gui)?;
    clear_search_fields(gui)?;
    Err(DriverError::business(format!(
        "Unable to save document changes! {text}"
    ))
    .into())
}

fn to_initial_screen(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.send_vkey(VKey::F12)?;
    gui.send_vkey(VKey::F12)?;
    Ok(())
}

fn clear_search_fields(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.set_text(COMPANY_CODE_FIELD, "")?;
    gui.set_text(DOCUMENT_FIELD, "")?;
    gui.set_text(YEAR_FIELD, "")?;
    Ok(())
}
