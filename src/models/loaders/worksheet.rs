//! 工作表读取与校验
//!
//! 用户提交的 CSV 工作表 → `Vec<Record>`：
//!
//! - 表头去掉首尾空白，中间的空白替换为 `_`
//! - 公司代码左侧补零到 4 位
//! - 必填列只填了一部分的行会被丢弃并记录错误日志，整行为空的行静默丢弃
//! - 数值列无法解析时整个工作表被拒绝

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info};

use crate::models::record::Record;

const COMPANY_CODE: &str = "Company_Code";
const DOCUMENT_NUMBER: &str = "Document_Number";
const DOCUMENT_YEAR: &str = "Document_Year";
const CASE_ID: &str = "Case_ID";
const NOTIFICATION: &str = "Notification";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const REQUIRED_COLUMNS: [&str; 5] = [
    COMPANY_CODE,
    DOCUMENT_NUMBER,
    DOCUMENT_YEAR,
    CASE_ID,
    NOTIFICATION,
];

/// 工作表内容无效（会以错误通知的形式告知用户）
#[derive(Debug, Error)]
pub enum WorksheetError {
    #[error("The worksheet contains no data to process!")]
    Empty,

    #[error("The worksheet is missing the mandatory column '{0}'!")]
    MissingColumn(String),

    #[error("Invalid value '{value}' in column '{column}' on row {row}!")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("The worksheet could not be read: {0}")]
    Csv(#[from] csv::Error),
}

/// 读取工作表文件内容
pub async fn read_worksheet(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取工作表: {}", path.display()))?;
    Ok(content)
}

/// 解析并校验工作表
pub fn parse_worksheet(content: &str) -> std::result::Result<Vec<Record>, WorksheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let columns: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    for column in REQUIRED_COLUMNS {
        if !columns.contains_key(column) {
            return Err(WorksheetError::MissingColumn(column.to_string()));
        }
    }

    let mut records = Vec::new();
    let mut bad_rows = Vec::new();

    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        let row_number = idx + 1;
        let cell = |column: &'static str| cell_value(&row, &columns, column);

        let mandatory = [
            cell(COMPANY_CODE),
            cell(DOCUMENT_NUMBER),
            cell(DOCUMENT_YEAR),
            cell(CASE_ID),
        ];
        let filled = mandatory.iter().filter(|v| !v.is_empty()).count();

        if filled == 0 {
            if !cell(NOTIFICATION).is_empty() {
                bad_rows.push(row_number);
            }
            continue;
        }
        if filled < mandatory.len() {
            bad_rows.push(row_number);
            continue;
        }

        let notification = match cell(NOTIFICATION) {
            "" => None,
            value => Some(parse_number::<u64>(row_number, NOTIFICATION, value)?),
        };

        records.push(Record::new(
            row_number,
            format!("{:0>4}", cell(COMPANY_CODE)),
            parse_number(row_number, DOCUMENT_NUMBER, cell(DOCUMENT_NUMBER))?,
            parse_number(row_number, DOCUMENT_YEAR, cell(DOCUMENT_YEAR))?,
            parse_number(row_number, CASE_ID, cell(CASE_ID))?,
            notification,
        ));
    }

    if !bad_rows.is_empty() {
        error!("发现 {} 行不完整的数据，已丢弃", bad_rows.len());
        debug!("不完整的数据行: {:?}", bad_rows);
    }

    if records.is_empty() {
        return Err(WorksheetError::Empty);
    }

    info!("✓ 工作表校验完成，共 {} 条有效记录", records.len());
    Ok(records)
}

fn cell_value<'r>(
    row: &'r csv::StringRecord,
    columns: &HashMap<&str, usize>,
    column: &str,
) -> &'r str {
    columns
        .get(column)
        .and_then(|&i| row.get(i))
        .unwrap_or("")
}

fn normalize_header(name: &str) -> String {
    WHITESPACE.replace_all(name.trim(), "_").into_owned()
}

fn parse_number<T: std::str::FromStr>(
    row: usize,
    column: &str,
    value: &str,
) -> std::result::Result<T, WorksheetError> {
    // 电子表格导出的整数可能带有 ".0" 后缀
    let digits = value.strip_suffix(".0").unwrap_or(value);
    digits.parse().map_err(|_| WorksheetError::InvalidValue {
        row,
        column: column.to_string(),
        value: value.to_string(),
    })
}
