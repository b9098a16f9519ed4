//! Operator notifications.
//!
//! Notifications are fire-and-forget: whoever triggers one never waits on
//! it and never sees its failure, which is only logged.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::StoreError;

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), StoreError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), StoreError> {
        tracing::info!(subject, recipients = ?recipients, body, "operator notification");
        Ok(())
    }
}

/// Pipes a message into `sendmail -t -oi`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    sendmail: PathBuf,
    sender: String,
}

impl SendmailNotifier {
    pub const DEFAULT_PATH: &'static str = "/usr/sbin/sendmail";

    pub fn new(sendmail: impl Into<PathBuf>, sender: impl Into<String>) -> Self {
        Self {
            sendmail: sendmail.into(),
            sender: sender.into(),
        }
    }

    /// The message as handed to sendmail: headers, blank line, body.
    pub fn render(&self, subject: &str, body: &str, recipients: &[String]) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
            self.sender,
            recipients.join(", "),
            subject,
            body
        )
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn notify(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), StoreError> {
        if recipients.is_empty() {
            return Ok(());
        }

        let mut child = Command::new(&self.sendmail)
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.render(subject, body, recipients).as_bytes())
                .await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(StoreError::Notify(format!(
                "sendmail exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Sends a notification in the background and logs a failure.
pub fn spawn_notify(
    notifier: Arc<dyn Notifier>,
    subject: String,
    body: String,
    recipients: Vec<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&subject, &body, &recipients).await {
            tracing::warn!(error = %e, subject = %subject, "operator notification failed");
        }
    })
}
