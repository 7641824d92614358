//! 批量处理阶段 - 编排层
//!
//! ## 职责
//!
//! 按 VA03 → FB03 → QM02 的顺序对整批记录执行三个阶段：
//! 一个阶段对所有适用记录处理完毕后，下一个阶段才开始。
//!
//! - 每个阶段只有在存在适用记录时才启动驱动
//! - 阶段内按工作表顺序逐条处理，结果写入台账
//! - 会话句柄在阶段之间显式交接
//! - 任何 [`RunAborted`] 立即结束整批处理，已写入台账的结果保留

use tracing::{error, info, warn};

use crate::config::SapConfig;
use crate::infrastructure::SessionHandle;
use crate::models::{Ledger, Record, Stage};
use crate::services::{
    CreditNoteLookup, DocumentAnnotation, DocumentKey, DriverError, NotificationClosure,
};
use crate::utils::logging::section_break;
use crate::workflow::{Attempt, RecordCtx, RecoveryRunner, RunAborted};

pub const DOCUMENT_UPDATED: &str = "Document updated.";
pub const DOCUMENT_SKIPPED: &str = "Document skipped.";
pub const NOTIFICATION_COMPLETED: &str = "Notification completed.";

/// 依次执行三个阶段
///
/// # 参数
/// - `runner`: 带连接恢复的执行器
/// - `records`: 工作表记录（VA03 阶段会写入贷项凭证号）
/// - `ledger`: 处理结果台账
/// - `handle`: 当前会话句柄
/// - `sap`: SAP 配置
///
/// # 返回
/// 返回处理结束时仍可用的会话句柄
pub fn run_all(
    runner: &mut RecoveryRunner,
    records: &mut [Record],
    ledger: &mut Ledger,
    handle: SessionHandle,
    sap: &SapConfig,
) -> Result<SessionHandle, RunAborted> {
    let handle = assign_credit_notes(runner, records, ledger, handle, sap)?;
    let handle = annotate_documents(runner, records, ledger, handle, sap)?;
    close_notifications(runner, records, ledger, handle, sap)
}

// ========== VA03 ==========

/// 为订单类记录查询贷项凭证号
pub fn assign_credit_notes(
    runner: &mut RecoveryRunner,
    records: &mut [Record],
    ledger: &mut Ledger,
    handle: SessionHandle,
    sap: &SapConfig,
) -> Result<SessionHandle, RunAborted> {
    let orders: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_order)
        .map(|(idx, _)| idx)
        .collect();

    info!("Total orders to process: {}", orders.len());
    if orders.is_empty() {
        return Ok(handle);
    }

    info!("=== Assigning credit note numbers to orders START ===");
    let mut driver = CreditNoteLookup::new(sap.popup_max_presses);
    runner.launch(&mut driver, handle)?;
    section_break();

    for (pos, &idx) in orders.iter().enumerate() {
        let record = &mut records[idx];
        let Some(order) = record.order_number else {
            continue;
        };
        if !ledger.begin(idx, Stage::Lookup) {
            continue;
        }

        let ctx = RecordCtx::new(Stage::Lookup, record.row, pos + 1, orders.len(), order);
        info!("{} 🔍 查询订单的贷项凭证号...", ctx);

        match runner.run(&mut driver, &ctx, |d| d.lookup(order))? {
            Attempt::Succeeded(credit_note) => {
                info!("{} ✓ 贷项凭证号: {}", ctx, credit_note);
                record.credit_note = Some(credit_note);
                ledger.succeed(idx, Stage::Lookup, None);
            }
            Attempt::Recorded(e) => {
                log_recorded(&ctx, &e);
                record.credit_note = None;
                ledger.fail(idx, Stage::Lookup, &e.to_string());
            }
        }
        section_break();
    }

    let handle = runner.finish(&mut driver)?;
    info!("=== Assigning credit note numbers to orders END ===\n");
    Ok(handle)
}

// ========== FB03 ==========

/// 把案件号写入凭证文本
///
/// 订单类记录使用查到的贷项凭证号；未查到时跳过该记录。
pub fn annotate_documents(
    runner: &mut RecoveryRunner,
    records: &mut [Record],
    ledger: &mut Ledger,
    handle: SessionHandle,
    sap: &SapConfig,
) -> Result<SessionHandle, RunAborted> {
    let total = records.len();
    info!("Total documents to update: {}", total);
    if total == 0 {
        return Ok(handle);
    }

    info!("=== Updating of accounting documents START ===");

    // 没有任何可修改的凭证时不启动 FB03
    let needs_driver = records.iter().any(|r| r.annotation_target().is_some());
    let mut driver = DocumentAnnotation::new(sap.popup_max_presses);
    let mut idle_handle = None;
    if needs_driver {
        runner.launch(&mut driver, handle)?;
    } else {
        idle_handle = Some(handle);
    }
    section_break();

    for (idx, record) in records.iter().enumerate() {
        if !ledger.begin(idx, Stage::Annotate) {
            continue;
        }

        let Some(document) = record.annotation_target() else {
            warn!(
                "[{} 行#{}] 订单 {} 没有贷项凭证，跳过",
                Stage::Annotate,
                record.row,
                record.document_number
            );
            ledger.skip(idx, Stage::Annotate, DOCUMENT_SKIPPED);
            section_break();
            continue;
        };

        let ctx = RecordCtx::new(Stage::Annotate, record.row, idx + 1, total, document);
        info!("{} ✏️ 写入案件号 {}...", ctx, record.case_id);

        let key = DocumentKey {
            number: document,
            fiscal_year: record.fiscal_year,
            company_code: &record.company_code,
        };
        let case_id = record.case_id;

        match runner.run(&mut driver, &ctx, |d| d.annotate(key, case_id))? {
            Attempt::Succeeded(text) => {
                info!("{} ✓ {} 新文本: {}", ctx, DOCUMENT_UPDATED, text);
                ledger.succeed(idx, Stage::Annotate, Some(DOCUMENT_UPDATED));
            }
            Attempt::Recorded(e) => {
                log_recorded(&ctx, &e);
                ledger.fail(idx, Stage::Annotate, &e.to_string());
            }
        }
        section_break();
    }

    let handle = match idle_handle {
        Some(handle) => handle,
        None => runner.finish(&mut driver)?,
    };
    info!("=== Updating of accounting documents END ===\n");
    Ok(handle)
}

// ========== QM02 ==========

/// 完成记录关联的服务通知
pub fn close_notifications(
    runner: &mut RecoveryRunner,
    records: &mut [Record],
    ledger: &mut Ledger,
    handle: SessionHandle,
    sap: &SapConfig,
) -> Result<SessionHandle, RunAborted> {
    let targets: Vec<(usize, u64)> = records
        .iter()
        .enumerate()
        .filter_map(|(idx, r)| r.notification.map(|n| (idx, n)))
        .collect();

    info!("Total notifications to close: {}", targets.len());
    if targets.is_empty() {
        return Ok(handle);
    }

    info!("=== Closing of service notifications START ===");
    let mut driver = NotificationClosure::new(sap.popup_max_presses, sap.lock_retry());
    runner.launch(&mut driver, handle)?;
    section_break();

    for (pos, &(idx, notification)) in targets.iter().enumerate() {
        if !ledger.begin(idx, Stage::Close) {
            continue;
        }

        let ctx = RecordCtx::new(
            Stage::Close,
            records[idx].row,
            pos + 1,
            targets.len(),
            notification,
        );
        info!("{} 📋 完成服务通知...", ctx);

        match runner.run(&mut driver, &ctx, |d| d.complete(notification))? {
            Attempt::Succeeded(tasks) => {
                info!("{} ✓ {} 完成任务数: {}", ctx, NOTIFICATION_COMPLETED, tasks);
                ledger.succeed(idx, Stage::Close, Some(NOTIFICATION_COMPLETED));
            }
            Attempt::Recorded(e) => {
                log_recorded(&ctx, &e);
                ledger.fail(idx, Stage::Close, &e.to_string());
            }
        }
        section_break();
    }

    let handle = runner.finish(&mut driver)?;
    info!("=== Closing of service notifications END ===\n");
    Ok(handle)
}

fn log_recorded(ctx: &RecordCtx, err: &DriverError) {
    match err {
        DriverError::Warning(w) => warn!("{} ⚠️ {}", ctx, w),
        other => error!("{} ❌ {}", ctx, other),
    }
}
