//! 处理结果报表
//!
//! 列顺序固定：Company Code, Document Number, Document Year, Case ID,
//! Notification, Credit Note, Message。订单标记不导出。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::models::{Ledger, Record};

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "Company Code")]
    company_code: &'a str,
    #[serde(rename = "Document Number")]
    document_number: u64,
    #[serde(rename = "Document Year")]
    document_year: u16,
    #[serde(rename = "Case ID")]
    case_id: u64,
    #[serde(rename = "Notification")]
    notification: Option<u64>,
    #[serde(rename = "Credit Note")]
    credit_note: Option<u64>,
    #[serde(rename = "Message")]
    message: String,
}

/// 渲染 CSV 报表内容
pub fn render_report(records: &[Record], ledger: &Ledger) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for (idx, record) in records.iter().enumerate() {
        writer
            .serialize(ReportRow {
                company_code: &record.company_code,
                document_number: record.document_number,
                document_year: record.fiscal_year,
                case_id: record.case_id,
                notification: record.notification,
                credit_note: record.credit_note,
                message: ledger.outcome(idx),
            })
            .with_context(|| format!("无法写入报表第 {} 行", record.row))?;
    }

    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("无法生成报表")
}

/// 生成报表文件
///
/// # 参数
/// - `dir`: 临时文件目录
/// - `file_name`: 报表文件名（不含扩展名）
///
/// # 返回
/// 返回报表文件路径
pub async fn write_report(
    dir: &Path,
    file_name: &str,
    records: &[Record],
    ledger: &Ledger,
) -> Result<PathBuf> {
    info!("📄 正在生成报表...");
    let content = render_report(records, ledger)?;

    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("无法创建目录: {}", dir.display()))?;
    let path = dir.join(format!("{file_name}.csv"));
    fs::write(&path, content)
        .await
        .with_context(|| format!("无法写入报表: {}", path.display()))?;

    info!("✓ 报表已生成: {}", path.display());
    Ok(path)
}
