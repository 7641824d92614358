//! 贷项凭证查询驱动（VA03） - 业务能力层
//!
//! 输入订单号，打开凭证流，在凭证流树中查找第一个
//! "Accounting document" 节点，从明细网格的参考号中取出贷项凭证号。

use tracing::debug;

use crate::infrastructure::{GuiSession, SessionHandle, VKey};
use crate::services::dialog::{self, Signal};
use crate::services::transaction::{
    BusinessWarning, DriverCore, DriverError, StepResult, Transaction,
};
use crate::services::tree_search::{find_first, GuiTree};

pub const TCODE: &str = "VA03";

const ORDER_FIELD: &str = "VBAK-VBELN";
const SEARCH_FIELDS: [&str; 6] = [
    ORDER_FIELD,   // 订单
    "RV45S-BSTNK", // 采购订单
    "RV45S-KUNNR", // 售达方
    "RV45Z-LFNKD", // 交货单
    "RV45S-FAKKD", // 开票凭证
    "RV45S-PSPID", // WBS 元素
];
const SHIP_TO_FIELD: &str = "KUWEV-KUNNR";
const FLOW_TREE: &str = "usr/shell/shellcont[1]/shell[1]";
const DETAIL_GRID: &str = "shellcont/shell";
const REFERENCE_COLUMN: &str = "DOCNUV";

const ACCOUNTING_MARKER: &str = "Accounting document";
const CREDIT_NOTE_DIGITS: usize = 9;

const NOT_FOUND_STATUS: &str = "is not in the database or has been archived";
const COMMENT_TEXT_NOTICE: &str = "information in the customer comment text";
const ORDER_BLOCKED_NOTICE: &str = "Order is blocked";

/// VA03 驱动
#[derive(Debug)]
pub struct CreditNoteLookup {
    core: DriverCore,
}

impl CreditNoteLookup {
    pub fn new(popup_max_presses: usize) -> Self {
        Self {
            core: DriverCore::new(TCODE, popup_max_presses),
        }
    }

    /// 查询订单对应的贷项凭证号
    ///
    /// # 返回
    /// - `Ok(number)`: 贷项凭证号
    /// - `Warning(CreditNoteNotFound)`: 订单尚未生成贷项凭证
    /// - `Warning(OrderBlocked)`: 订单被冻结
    /// - `Business`: 订单不存在或其他弹窗 / 状态栏错误
    pub fn lookup(&mut self, order: u64) -> Result<u64, DriverError> {
        let presses = self.core.popup_max_presses();
        self.core.run(|gui| lookup_credit_note(gui, order, presses))
    }
}

impl Transaction for CreditNoteLookup {
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

fn lookup_credit_note(gui: &mut dyn GuiSession, order: u64, presses: usize) -> StepResult<u64> {
    gui.set_text(ORDER_FIELD, &order.to_string())?;
    gui.send_vkey(VKey::Enter)?;

    if let Signal::BlockingPopup(_) = dialog::classify_screen(gui)? {
        handle_order_popup(gui, presses)?;
    }

    if let Signal::Error(text) = dialog::classify_screen(gui)? {
        if text.contains(NOT_FOUND_STATUS) {
            clear_search_fields(gui)?;
            return Err(DriverError::business(format!("Order {order} not found!")).into());
        }
    }

    open_document_flow(gui)?;

    if let Signal::BlockingPopup(_) = dialog::classify_screen(gui)? {
        handle_order_popup(gui, presses)?;
    }

    if let Signal::Error(text) = dialog::classify_screen(gui)? {
        abandon_order(gui)?;
        return Err(DriverError::business(text).into());
    }

    let node = find_first(&mut GuiTree::new(gui, FLOW_TREE), |text| {
        text.contains(ACCOUNTING_MARKER)
    })?;

    let credit_note = match node {
        Some(key) => {
            debug!("[{}] 凭证流节点命中: {}", TCODE, key);
            Some(read_reference(gui, &key)?)
        }
        None => None,
    };

    to_initial_screen(gui)?;
    clear_search_fields(gui)?;

    credit_note.ok_or_else(|| BusinessWarning::CreditNoteNotFound.into())
}

/// 处理输入订单号后弹出的窗口
fn handle_order_popup(gui: &mut dyn GuiSession, presses: usize) -> StepResult<()> {
    let message = dialog::dialog_message(gui)?;
    dialog::resolve_popup(gui, true, presses)?;

    if message.contains(COMMENT_TEXT_NOTICE) {
        return Ok(());
    }

    abandon_order(gui)?;
    if message.contains(ORDER_BLOCKED_NOTICE) {
        Err(BusinessWarning::OrderBlocked(message).into())
    } else {
        Err(DriverError::business(message).into())
    }
}

fn read_reference(gui: &mut dyn GuiSession, key: &str) -> StepResult<u64> {
    gui.tree_open_node(FLOW_TREE, key)?;
    let value = gui.grid_cell(DETAIL_GRID, 0, REFERENCE_COLUMN)?;
    parse_credit_note(&value).ok_or_else(|| {
        DriverError::business(format!("Unexpected credit note reference '{value}'!")).into()
    })
}

/// 取参考号末尾 9 位数字
pub fn parse_credit_note(reference: &str) -> Option<u64> {
    let reference = reference.trim();
    let count = reference.chars().count();
    let tail: String = reference
        .chars()
        .skip(count.saturating_sub(CREDIT_NOTE_DIGITS))
        .collect();
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

fn open_document_flow(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.set_focus(SHIP_TO_FIELD)?;
    gui.send_vkey(VKey::F2)?;
    gui.send_vkey(VKey::F5)?;
    Ok(())
}

fn to_initial_screen(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.send_vkey(VKey::ShiftF3)?;
    gui.send_vkey(VKey::F12)?;
    Ok(())
}

/// 放弃当前订单，回到初始屏幕
fn abandon_order(gui: &mut dyn GuiSession) -> StepResult<()> {
    gui.send_vkey(VKey::F3)?;
    clear_search_fields(gui)
}

fn clear_search_fields(gui: &mut dyn GuiSession) -> StepResult<()> {
    for field in SEARCH_FIELDS {
        gui.set_text(field, "")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulator::{FlowNode, HostFixture, OrderFixture, SimulatedHost};
    use crate::infrastructure::Connector;

    fn order(number: u64, flow: Vec<FlowNode>) -> OrderFixture {
        OrderFixture {
            number,
            flow,
            ..Default::default()
        }
    }

    fn credited_flow() -> Vec<FlowNode> {
        vec![FlowNode::new("Credit memo request 5012233445").with_children(vec![
            FlowNode::new("Credit memo 0090012345").with_children(vec![FlowNode::new(
                "Accounting document 0090012345",
            )
            .with_reference("00000090012345")]),
        ])]
    }

    fn started(fixture: HostFixture) -> (SimulatedHost, CreditNoteLookup) {
        let host = SimulatedHost::new(fixture);
        let handle = host.connector().open("P25").unwrap();
        let mut driver = CreditNoteLookup::new(3);
        driver.start(handle).unwrap();
        (host, driver)
    }

    #[test]
    fn test_lookup_finds_credit_note() {
        let (_host, mut driver) = started(HostFixture {
            orders: vec![order(5012233445, credited_flow())],
            ..Default::default()
        });

        assert_eq!(driver.lookup(5012233445), Ok(90012345));
        // 回到初始屏幕后可以继续查询
        assert_eq!(driver.lookup(5012233445), Ok(90012345));
    }

    #[test]
    fn test_lookup_without_accounting_node_is_not_found_warning() {
        let flow = vec![FlowNode::new("Credit memo request 5012233445")
            .with_children(vec![FlowNode::new("Returns delivery 8400001")])];
        let (_host, mut driver) = started(HostFixture {
            orders: vec![order(5012233445, flow)],
            ..Default::default()
        });

        let err = driver.lookup(5012233445).unwrap_err();
        assert_eq!(err, DriverError::Warning(BusinessWarning::CreditNoteNotFound));
        assert_eq!(err.to_string(), "The credit note does not exist yet in the system.");
    }

    #[test]
    fn test_unknown_order_is_business_error() {
        let (_host, mut driver) = started(HostFixture::default());

        let err = driver.lookup(5019999999).unwrap_err();
        assert_eq!(err, DriverError::business("Order 5019999999 not found!"));
    }

    #[test]
    fn test_blocked_order_is_warning() {
        let mut blocked = order(5012233445, credited_flow());
        blocked.popup = Some("Order is blocked for further processing".to_string());
        let (_host, mut driver) = started(HostFixture {
            orders: vec![blocked, order(5012233446, credited_flow())],
            ..Default::default()
        });

        let err = driver.lookup(5012233445).unwrap_err();
        assert_eq!(
            err,
            DriverError::Warning(BusinessWarning::OrderBlocked(
                "Order is blocked for further processing".to_string()
            ))
        );
        assert_eq!(driver.lookup(5012233446), Ok(90012345));
    }

    #[test]
    fn test_comment_text_popup_is_confirmed() {
        let mut noted = order(5012233445, credited_flow());
        noted.popup = Some("There is information in the customer comment text".to_string());
        let (_host, mut driver) = started(HostFixture {
            orders: vec![noted],
            ..Default::default()
        });

        assert_eq!(driver.lookup(5012233445), Ok(90012345));
    }

    #[test]
    fn test_other_popup_is_business_error() {
        let mut odd = order(5012233445, credited_flow());
        odd.popup = Some("Credit limit exceeded".to_string());
        let (_host, mut driver) = started(HostFixture {
            orders: vec![odd],
            ..Default::default()
        });

        assert_eq!(
            driver.lookup(5012233445),
            Err(DriverError::business("Credit limit exceeded"))
        );
    }

    #[test]
    fn test_unknown_popup_is_protocol_error() {
        let mut odd = order(5012233445, credited_flow());
        odd.popup = Some("Data will be lost.".to_string());
        odd.popup_title = Some("Save changes?".to_string());
        let (_host, mut driver) = started(HostFixture {
            orders: vec![odd],
            ..Default::default()
        });

        assert_eq!(
            driver.lookup(5012233445),
            Err(DriverError::protocol(
                "Unrecognized dialog window: 'Save changes?'!"
            ))
        );
    }

    #[test]
    fn test_popup_that_cannot_be_closed_is_protocol_error() {
        let mut stuck = order(5012233445, credited_flow());
        stuck.popup = Some("Credit limit exceeded".to_string());
        stuck.popup_sticky = true;
        let (_host, mut driver) = started(HostFixture {
            orders: vec![stuck],
            ..Default::default()
        });

        assert_eq!(
            driver.lookup(5012233445),
            Err(DriverError::protocol(
                "Could not close the dialog window: 'Information'!"
            ))
        );
    }

    #[test]
    fn test_lookup_before_start_is_uninitialized() {
        let mut driver = CreditNoteLookup::new(3);
        assert_eq!(
            driver.lookup(5012233445),
            Err(DriverError::Uninitialized { transaction: "VA03" })
        );
    }

    #[test]
    fn test_lost_connection_is_reported() {
        let (host, mut driver) = started(HostFixture {
            orders: vec![order(5012233445, credited_flow())],
            ..Default::default()
        });

        host.drop_connection_on_next_keys(1);
        assert_eq!(driver.lookup(5012233445), Err(DriverError::ConnectionLost));

        // 重新打开会话后驱动可以继续使用
        let handle = host.connector().open("P25").unwrap();
        driver.start(handle).unwrap();
        assert_eq!(driver.lookup(5012233445), Ok(90012345));
    }

    #[test]
    fn test_parse_credit_note() {
        assert_eq!(parse_credit_note("00000090012345"), Some(90012345));
        assert_eq!(parse_credit_note(" 123 "), Some(123));
        assert_eq!(parse_credit_note("RE-0090012345"), Some(90012345));
        assert_eq!(parse_credit_note(""), None);
        assert_eq!(parse_credit_note("ABC"), None);
    }
}
