//! 用户通知
//!
//! 用 HTML 模板生成通知邮件：
//!
//! - 处理完成：`template_completed.html`，附带报表
//! - 输入无效：`template_error.html`，其中的 `$error_msg$` 被替换为错误信息
//!
//! 邮件以 `.eml` 文件写入发件箱目录，由外部投递程序发送。
//! 模板文件缺失时使用内置模板。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;

const COMPLETED_TEMPLATE: &str = "template_completed.html";
const ERROR_TEMPLATE: &str = "template_error.html";
const ERROR_PLACEHOLDER: &str = "$error_msg$";

const DEFAULT_COMPLETED_HTML: &str = "<html><body>\
<p>Hello,</p>\
<p>your request has been processed. The result is attached to this message.</p>\
</body></html>";

const DEFAULT_ERROR_HTML: &str = "<html><body>\
<p>Hello,</p>\
<p>your request could not be processed: <b>$error_msg$</b></p>\
</body></html>";

/// 通知内容
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    /// 处理完成，附带报表文件
    Completed { report: &'a Path },
    /// 输入无效
    Error { message: &'a str },
}

/// 用户通知发送器
#[derive(Debug, Clone)]
pub struct Notifier {
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// 生成通知并放入发件箱
    ///
    /// # 参数
    /// - `recipient`: 请求人邮箱
    /// - `notice`: 通知内容
    ///
    /// # 返回
    /// - `Ok(Some(path))`: 发件箱中的邮件文件
    /// - `Ok(None)`: 配置中关闭了通知
    pub async fn send(&self, recipient: &str, notice: Notice<'_>) -> Result<Option<PathBuf>> {
        info!("📧 正在发送通知给 {}...", recipient);

        if !self.config.send {
            warn!("⚠️ 配置中已关闭用户通知，跳过发送");
            return Ok(None);
        }

        let message = match notice {
            Notice::Completed { report } => {
                let html = self
                    .load_template(COMPLETED_TEMPLATE, DEFAULT_COMPLETED_HTML)
                    .await;
                let attachment = fs::read(report)
                    .await
                    .with_context(|| format!("无法读取报表: {}", report.display()))?;
                let name = report
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "report.csv".to_string());
                self.compose(recipient, html, Some((name, attachment)))?
            }
            Notice::Error { message } => {
                let html = self
                    .load_template(ERROR_TEMPLATE, DEFAULT_ERROR_HTML)
                    .await
                    .replace(ERROR_PLACEHOLDER, message);
                self.compose(recipient, html, None)?
            }
        };

        let path = self.deliver(&message, notice).await?;
        info!("✓ 通知已放入发件箱: {}", path.display());
        Ok(Some(path))
    }

    async fn load_template(&self, name: &str, fallback: &str) -> String {
        let path = self.config.template_dir.join(name);
        match fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(e) => {
                debug!("模板 {} 不可用（{}），使用内置模板", path.display(), e);
                fallback.to_string()
            }
        }
    }

    fn compose(
        &self,
        recipient: &str,
        html: String,
        attachment: Option<(String, Vec<u8>)>,
    ) -> Result<Message> {
        let from: Mailbox = self
            .config
            .sender
            .parse()
            .with_context(|| format!("无效的发件人地址: {}", self.config.sender))?;
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("无效的收件人地址: {}", recipient))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(self.config.subject.as_str());

        let message = match attachment {
            None => builder.singlepart(SinglePart::html(html)),
            Some((name, content)) => {
                let content_type = ContentType::parse("text/csv").context("无效的附件类型")?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::html(html))
                        .singlepart(Attachment::new(name).body(content, content_type)),
                )
            }
        };
        message.context("无法生成通知邮件")
    }

    async fn deliver(&self, message: &Message, notice: Notice<'_>) -> Result<PathBuf> {
        let outbox = &self.config.outbox_dir;
        fs::create_dir_all(outbox)
            .await
            .with_context(|| format!("无法创建发件箱: {}", outbox.display()))?;

        let kind = match notice {
            Notice::Completed { .. } => "completed",
            Notice::Error { .. } => "error",
        };
        let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
        let mut nth = 0;
        let path = loop {
            nth += 1;
            let candidate = outbox.join(format!("{}_{}_{:03}.eml", stamp, kind, nth));
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                break candidate;
            }
        };

        fs::write(&path, message.formatted())
            .await
            .with_context(|| format!("无法写入发件箱: {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> NotificationConfig {
        NotificationConfig {
            outbox_dir: dir.join("outbox"),
            template_dir: dir.join("notification"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_error_notice_substitutes_message() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(&cfg.template_dir).unwrap();
        std::fs::write(
            cfg.template_dir.join(ERROR_TEMPLATE),
            "<p>Failed: $error_msg$</p>",
        )
        .unwrap();

        let notifier = Notifier::new(cfg);
        let path = notifier
            .send(
                "requester@company.com",
                Notice::Error {
                    message: "The worksheet contains no data to process!",
                },
            )
            .await
            .unwrap()
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("To: requester@company.com"));
        assert!(content.contains("The worksheet contains no data to process!"));
        assert!(!content.contains(ERROR_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_completed_notice_attaches_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report.csv");
        std::fs::write(&report, "Company Code\n0010\n").unwrap();

        let notifier = Notifier::new(config(dir.path()));
        let path = notifier
            .send("requester@company.com", Notice::Completed { report: &report })
            .await
            .unwrap()
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("report.csv"));
        assert!(content.contains("text/csv"));
    }

    #[tokio::test]
    async fn test_disabled_notifications_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(NotificationConfig {
            send: false,
            ..config(dir.path())
        });

        let sent = notifier
            .send("requester@company.com", Notice::Error { message: "x" })
            .await
            .unwrap();

        assert!(sent.is_none());
        assert!(!dir.path().join("outbox").exists());
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(config(dir.path()));

        let result = notifier
            .send("not an address", Notice::Error { message: "x" })
            .await;
        assert!(result.is_err());
    }
}
