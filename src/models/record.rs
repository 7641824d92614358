//! 工作表记录

use std::fmt;

/// 订单号的号段前缀
pub const ORDER_NUMBER_PREFIX: &str = "501";

/// 工作表中的一行
///
/// 身份是它在工作表中的行号，处理过程中不会重排。
/// 处理结果消息保存在 [`Ledger`](crate::models::Ledger) 中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 工作表行号（数据行从 1 开始）
    pub row: usize,
    /// 公司代码（4 位，左侧补零）
    pub company_code: String,
    pub document_number: u64,
    pub fiscal_year: u16,
    pub case_id: u64,
    pub notification: Option<u64>,
    /// 订单号；订单类记录的订单号就是凭证号
    pub order_number: Option<u64>,
    /// VA03 查到的贷项凭证号
    pub credit_note: Option<u64>,
    pub is_order: bool,
}

impl Record {
    pub fn new(
        row: usize,
        company_code: impl Into<String>,
        document_number: u64,
        fiscal_year: u16,
        case_id: u64,
        notification: Option<u64>,
    ) -> Self {
        let is_order = is_order_number(document_number);
        Self {
            row,
            company_code: company_code.into(),
            document_number,
            fiscal_year,
            case_id,
            notification,
            order_number: is_order.then_some(document_number),
            credit_note: None,
            is_order,
        }
    }

    /// FB03 中要修改的凭证号
    ///
    /// - 非订单：凭证号本身
    /// - 订单：已查到的贷项凭证号，未查到时为 `None`
    pub fn annotation_target(&self) -> Option<u64> {
        if self.is_order {
            self.credit_note
        } else {
            Some(self.document_number)
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} / 案件 {}",
            self.company_code, self.document_number, self.fiscal_year, self.case_id
        )
    }
}

/// 凭证号是否属于订单号段
pub fn is_order_number(number: u64) -> bool {
    number.to_string().starts_with(ORDER_NUMBER_PREFIX)
}
