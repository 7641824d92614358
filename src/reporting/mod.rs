//! 报表与通知 - 输出层
//!
//! - `report`: 把记录和台账渲染成固定列顺序的 CSV 报表
//! - `notifier`: 用 HTML 模板生成给请求人的通知邮件并放入发件箱

pub mod notifier;
pub mod report;

pub use notifier::{Notice, Notifier};
pub use report::{render_report, write_report};
