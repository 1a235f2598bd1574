//! Regression notifications.
//!
//! Delivery is delegated to a [`MailTransport`]. A failed delivery is logged
//! and reported back as [`DispatchStatus::Failed`]; it never fails a build.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{info, warn};

use crate::{BenchTrendError, config::PublisherConfig, history::now_ms};

pub const SUBJECT_PREFIX: &str = "Performance regression";

/// Subject line of a regression notification.
pub fn subject_line(project_display: &str, build_display: &str) -> String {
    format!("{SUBJECT_PREFIX} in {project_display} {build_display}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub html_body: String,
}

impl Notification {
    /// RFC 822 style rendering with an HTML body.
    pub fn to_message(&self) -> String {
        format!(
            "To: {}\r\nFrom: {}\r\nSubject: {}\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n{}",
            header_value(&self.to.join(", ")),
            header_value(&self.from),
            header_value(&self.subject),
            self.html_body
        )
    }
}

/// Line breaks would start a new header, so they fold into spaces.
fn header_value(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub trait MailTransport: Send + Sync {
    fn send(&self, message: &Notification) -> Result<(), BenchTrendError>;
}

/// Writes each message as a `.eml` file into a spool directory.
#[derive(Debug)]
pub struct SpoolTransport {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolTransport {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MailTransport for SpoolTransport {
    fn send(&self, message: &Notification) -> Result<(), BenchTrendError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| BenchTrendError::notification(format!("{}: {e}", self.dir.display())))?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{}-{seq}.eml", now_ms()));
        fs::write(&path, message.to_message())
            .map_err(|e| BenchTrendError::notification(format!("{}: {e}", path.display())))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchStatus {
    Sent,
    /// Tracking is off or no recipient is configured.
    Disabled,
    Failed(String),
}

pub struct NotificationDispatcher {
    transport: Box<dyn MailTransport>,
    enabled: bool,
    recipients: Vec<String>,
    sender: String,
}

impl NotificationDispatcher {
    pub fn new(config: &PublisherConfig, transport: Box<dyn MailTransport>) -> Self {
        Self {
            transport,
            enabled: config.track_regressions,
            recipients: config.recipients(),
            sender: config.sender_address.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.recipients.is_empty()
    }

    pub fn dispatch(&self, project_display: &str, build_display: &str, html: &str) -> DispatchStatus {
        if !self.is_enabled() {
            return DispatchStatus::Disabled;
        }
        let message = Notification {
            to: self.recipients.clone(),
            from: self.sender.clone(),
            subject: subject_line(project_display, build_display),
            html_body: html.to_string(),
        };
        match self.transport.send(&message) {
            Ok(()) => {
                info!(to = %message.to.join(", "), subject = message.subject.as_str(), "sent regression notification");
                DispatchStatus::Sent
            }
            Err(err) => {
                warn!(%err, "failed to send regression notification");
                DispatchStatus::Failed(err.to_string())
            }
        }
    }
}
