use std::fs;

use benchtrend::{
    DispatchStatus, NotificationDispatcher, PublisherConfig, SpoolTransport,
    notify::{MailTransport, Notification, subject_line},
};

fn config(track: bool, address: Option<&str>) -> PublisherConfig {
    let mut config = PublisherConfig {
        track_regressions: track,
        ..PublisherConfig::default()
    };
    config.set_regression_address(address);
    config
}

#[test]
fn test_subject_names_project_and_build() {
    assert_eq!(
        subject_line("parsers", "#12"),
        "Performance regression in parsers #12"
    );
}

#[test]
fn test_dispatch_is_disabled_without_tracking_or_recipients() {
    let spool = tempfile::tempdir().unwrap();
    let off = NotificationDispatcher::new(
        &config(false, Some("perf@example.com")),
        Box::new(SpoolTransport::new(spool.path())),
    );
    assert!(!off.is_enabled());
    assert_eq!(off.dispatch("p", "#1", "<p/>"), DispatchStatus::Disabled);

    let nobody = NotificationDispatcher::new(
        &config(true, Some("  ")),
        Box::new(SpoolTransport::new(spool.path())),
    );
    assert_eq!(nobody.dispatch("p", "#1", "<p/>"), DispatchStatus::Disabled);
    assert_eq!(fs::read_dir(spool.path()).unwrap().count(), 0);
}

#[test]
fn test_spool_transport_writes_one_message_per_send() {
    let spool = tempfile::tempdir().unwrap();
    let dispatcher = NotificationDispatcher::new(
        &config(true, Some("a@example.com, b@example.com")),
        Box::new(SpoolTransport::new(spool.path().join("mail"))),
    );
    assert!(dispatcher.is_enabled());
    assert_eq!(
        dispatcher.dispatch("parsers", "#3", "<html><body>slow</body></html>"),
        DispatchStatus::Sent
    );
    assert_eq!(dispatcher.dispatch("parsers", "#4", "<html/>"), DispatchStatus::Sent);

    let mut messages: Vec<_> = fs::read_dir(spool.path().join("mail"))
        .unwrap()
        .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
        .collect();
    messages.sort();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("Subject: Performance regression in parsers #3")));
    assert!(messages[0].starts_with("To: a@example.com, b@example.com\r\n"));
    assert!(messages[0].contains("Content-Type: text/html"));
}

#[test]
fn test_unwritable_spool_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "occupied").unwrap();
    let transport = SpoolTransport::new(&blocker);
    let message = Notification {
        to: vec!["a@example.com".into()],
        from: "benchtrend@localhost".into(),
        subject: "s".into(),
        html_body: "b".into(),
    };
    assert!(transport.send(&message).is_err());

    let dispatcher = NotificationDispatcher::new(
        &config(true, Some("a@example.com")),
        Box::new(SpoolTransport::new(&blocker)),
    );
    assert!(matches!(
        dispatcher.dispatch("p", "#1", "<p/>"),
        DispatchStatus::Failed(_)
    ));
}

#[test]
fn test_line_breaks_cannot_inject_headers() {
    let message = Notification {
        to: vec!["a@example.com\r\nBcc: x@example.com".into()],
        from: "benchtrend@localhost".into(),
        subject: subject_line("evil\r\nX-Injected: yes", "#1\n"),
        html_body: "<p>line\r\nbreaks stay in the body</p>".into(),
    }
    .to_message();

    let (headers, body) = message.split_once("\r\n\r\n").unwrap();
    let lines: Vec<_> = headers.split("\r\n").collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "To: a@example.com Bcc: x@example.com");
    assert_eq!(lines[2], "Subject: Performance regression in evil X-Injected: yes #1");
    assert!(!headers.lines().any(|l| l.starts_with("X-Injected")));
    assert!(body.contains("line\r\nbreaks"));
}
