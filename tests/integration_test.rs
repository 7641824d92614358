use std::path::{Path, PathBuf};

use accounting_doc_updater::config::Config;
use accounting_doc_updater::infrastructure::simulator::{
    DocumentFixture, FlowNode, HostFixture, NotificationFixture, OrderFixture, TaskFixture,
};
use accounting_doc_updater::infrastructure::{Connector, SimulatedHost};
use accounting_doc_updater::models::{Stage, StepState};
use accounting_doc_updater::services::{
    BusinessWarning, DocumentAnnotation, DocumentKey, DriverError, Transaction,
};
use accounting_doc_updater::{App, AppError, RunAborted, RunOutcome, RunRequest};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const HEADER: &str = "Company Code,Document Number,Document Year,Case ID,Notification\n";
const REQUESTER: &str = "requester@company.com";

fn document(number: u64, text: &str) -> DocumentFixture {
    DocumentFixture {
        company_code: "0010".to_string(),
        number,
        year: 2024,
        text: text.to_string(),
        ..Default::default()
    }
}

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.sap.lock_retry_delay_ms = 0;
    config.report.temp_dir = dir.join("temp");
    config.notifications.outbox_dir = dir.join("outbox");
    config.notifications.template_dir = dir.join("notification");
    config
}

fn request(dir: &Path, rows: &str) -> RunRequest {
    let input = dir.join("input.csv");
    std::fs::write(&input, format!("{HEADER}{rows}")).unwrap();
    RunRequest {
        input,
        requester: REQUESTER.to_string(),
    }
}

async fn app(dir: &TempDir, host: &SimulatedHost) -> App {
    assert_ok!(App::with_connector(config(dir.path()), Box::new(host.connector())).await)
}

fn outbox_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.join("outbox")) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_full_run_updates_documents_and_closes_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture {
        orders: vec![OrderFixture {
            number: 5012233446,
            flow: vec![
                FlowNode::new("Credit memo request 5012233446"),
                FlowNode::new("Credit memo 5012233446").with_children(vec![FlowNode::new(
                    "Accounting document 0090012345",
                )
                .with_reference("000090012345")]),
            ],
            ..Default::default()
        }],
        documents: vec![document(544411698, "RET711884319"), document(90012345, "CM")],
        notifications: vec![NotificationFixture {
            number: 300012345,
            tasks: vec![
                TaskFixture {
                    number: 1,
                    ..Default::default()
                },
                TaskFixture {
                    number: 2,
                    completion_date: "01.02.2024".to_string(),
                },
            ],
            ..Default::default()
        }],
    });
    let mut app = app(&dir, &host).await;

    let outcome = assert_ok!(
        app.run(&request(
            dir.path(),
            "10,544411698,2024,400081469,300012345\n10,5012233446,2024,400081470,\n",
        ))
        .await
    );

    let RunOutcome::Completed {
        report,
        notification,
    } = outcome
    else {
        panic!("expected a completed run");
    };

    assert_eq!(
        host.document_text("0010", 544411698, 2024).as_deref(),
        Some("RET711884319 D 400081469")
    );
    assert_eq!(
        host.document_text("0010", 90012345, 2024).as_deref(),
        Some("CM D 400081470")
    );
    assert!(host.notification_completed(300012345));
    assert_eq!(host.completed_tasks(300012345), vec![1, 2]);

    assert_eq!(app.records()[1].credit_note, Some(90012345));
    assert_eq!(
        app.ledger().outcome(0),
        "Document updated. Notification completed."
    );
    assert_eq!(app.ledger().outcome(1), "Document updated.");

    // 报表在清理阶段随临时目录一起删除，通知留在发件箱
    assert!(!report.exists());
    assert!(notification.is_some_and(|path| path.exists()));
    assert_eq!(host.sessions_opened(), 1);
}

#[tokio::test]
async fn test_order_without_credit_note_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture {
        orders: vec![OrderFixture {
            number: 5012233445,
            flow: vec![FlowNode::new("Standard order 5012233445")
                .with_children(vec![FlowNode::new("Delivery 8012345678")])],
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut app = app(&dir, &host).await;

    assert_ok!(
        app.run(&request(dir.path(), "10,5012233445,2024,400081469,\n"))
            .await
    );

    assert_eq!(
        app.ledger().outcome(0),
        "The credit note does not exist yet in the system. Document skipped."
    );
    assert_eq!(app.ledger().state(0, Stage::Lookup), StepState::FailedTerminal);
    assert_eq!(app.ledger().state(0, Stage::Annotate), StepState::Skipped);
    assert_eq!(app.records()[0].credit_note, None);
}

#[tokio::test]
async fn test_three_connection_losses_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture {
        documents: vec![document(544411698, "RET711884319"), document(544411699, "RET2")],
        ..Default::default()
    });
    let mut app = app(&dir, &host).await;

    // 第一条记录的四次按键放行，之后三次按键全部断开
    host.drop_connection_after_keys(4, 3);
    let err = assert_err!(
        app.run(&request(
            dir.path(),
            "10,544411698,2024,400081469,\n10,544411699,2024,400081470,\n",
        ))
        .await
    );

    assert_eq!(err.exit_code(), 3);
    assert!(matches!(
        err,
        AppError::Processing(RunAborted::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(app.ledger().outcome(0), "Document updated.");
    assert_eq!(app.ledger().state(0, Stage::Annotate), StepState::Succeeded);
    assert_eq!(
        host.document_text("0010", 544411699, 2024).as_deref(),
        Some("RET2")
    );
    // 中止时不发送通知
    assert!(outbox_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_text_over_field_limit_is_not_written() {
    let dir = tempfile::tempdir().unwrap();
    // 39 + " D " + 9 位案件号 = 51 个字符
    let long_text = "R".repeat(39);
    let host = SimulatedHost::new(HostFixture {
        documents: vec![document(544411698, &long_text)],
        ..Default::default()
    });
    let mut app = app(&dir, &host).await;

    assert_ok!(
        app.run(&request(dir.path(), "10,544411698,2024,400081469,\n"))
            .await
    );

    assert_eq!(
        app.ledger().outcome(0),
        "'Text' value exceeds 50 chars length!"
    );
    assert_eq!(
        host.document_text("0010", 544411698, 2024).as_deref(),
        Some(long_text.as_str())
    );
    assert_eq!(host.document_saves("0010", 544411698, 2024), 0);
}

#[test]
fn test_second_annotation_reports_case_id_contained() {
    let host = SimulatedHost::new(HostFixture {
        documents: vec![document(544411698, "RET711884319")],
        ..Default::default()
    });
    let key = DocumentKey {
        number: 544411698,
        fiscal_year: 2024,
        company_code: "0010",
    };

    let mut driver = DocumentAnnotation::new(3);
    let handle = assert_ok!(host.connector().open("P25"));
    assert_ok!(driver.start(handle));

    let text = assert_ok!(driver.annotate(key, 400081469));
    assert_eq!(text, "RET711884319 D 400081469");

    let err = assert_err!(driver.annotate(key, 400081469));
    assert_eq!(err, DriverError::Warning(BusinessWarning::CaseIdContained));
    assert_eq!(host.document_saves("0010", 544411698, 2024), 1);
}

#[tokio::test]
async fn test_invalid_worksheet_sends_error_notification() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture::default());
    let mut app = app(&dir, &host).await;

    let outcome = assert_ok!(
        app.run(&request(dir.path(), "10,54441X698,2024,400081469,\n"))
            .await
    );

    let RunOutcome::InvalidInput {
        message,
        notification,
    } = outcome
    else {
        panic!("expected an invalid input outcome");
    };
    assert!(message.contains("54441X698"));

    let content = std::fs::read_to_string(notification.unwrap()).unwrap();
    assert!(content.contains(REQUESTER));
    assert!(app.ledger().is_empty());
}

#[tokio::test]
async fn test_missing_worksheet_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture::default());
    let mut app = app(&dir, &host).await;

    let err = assert_err!(
        app.run(&RunRequest {
            input: dir.path().join("missing.csv"),
            requester: REQUESTER.to_string(),
        })
        .await
    );

    assert_eq!(err.exit_code(), 2);
    assert!(outbox_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unreachable_host_fails_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture::default());
    host.set_reachable(false);

    let result = App::with_connector(config(dir.path()), Box::new(host.connector())).await;
    let err = assert_err!(result.map(|_| ()));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_simulator_backend_dry_run_with_demo_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    let mut config = config(dir.path());
    config.sap.backend = accounting_doc_updater::config::Backend::Simulator;
    config.sap.fixture = Some(fixtures.join("demo_host.toml"));

    let mut app = assert_ok!(App::initialize(config).await.map_err(|e| e.to_string()));
    let outcome = assert_ok!(
        app.run(&RunRequest {
            input: fixtures.join("demo_input.csv"),
            requester: REQUESTER.to_string(),
        })
        .await
    );

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(app.records().len(), 4);
    assert_eq!(
        app.ledger().outcome(0),
        "Document updated. Notification completed."
    );
    assert_eq!(app.ledger().outcome(1), "Document updated.");
    assert!(app.ledger().outcome(2).ends_with("Document skipped."));
    assert!(app.ledger().has_failure(3));
}

#[tokio::test]
async fn test_unrecognized_dialog_aborts_with_exit_code_3() {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new(HostFixture {
        orders: vec![
            OrderFixture {
                number: 5012233446,
                flow: vec![FlowNode::new("Credit memo 5012233446").with_children(vec![
                    FlowNode::new("Accounting document 0090012345").with_reference("000090012345"),
                ])],
                ..Default::default()
            },
            OrderFixture {
                number: 5012233447,
                popup: Some("Data will be lost.".to_string()),
                popup_title: Some("Save changes?".to_string()),
                ..Default::default()
            },
        ],
        documents: vec![document(90012345, "CM")],
        ..Default::default()
    });
    let mut app = app(&dir, &host).await;

    let err = assert_err!(
        app.run(&request(
            dir.path(),
            "10,5012233446,2024,400081470,\n10,5012233447,2024,400081471,\n",
        ))
        .await
    );

    assert_eq!(err.exit_code(), 3);
    assert!(matches!(
        err,
        AppError::Processing(RunAborted::Protocol {
            transaction: "VA03",
            ..
        })
    ));
    assert_eq!(app.records()[0].credit_note, Some(90012345));
    assert_eq!(app.ledger().state(0, Stage::Lookup), StepState::Succeeded);
    assert_eq!(
        host.document_text("0010", 90012345, 2024).as_deref(),
        Some("CM")
    );
    assert!(outbox_files(dir.path()).is_empty());
}
