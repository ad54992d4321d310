//! Notification Sender: render a template and hand it to the notifier.

use chrono::{DateTime, SecondsFormat, Utc};
use html_escape::encode_text;
use serde::Serialize;
use tracing::info;

use crate::context::JobContext;
use crate::error::JobError;
use crate::kinds::{Notification, NotificationPayload};
use crate::notifier::Email;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOutcome {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message_id: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

/// Subject, HTML body and text body for `notification`, stamped with `now`.
pub fn render(notification: &Notification, to: &str, now: DateTime<Utc>) -> Email {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let (subject, html, text) = match notification {
        Notification::ServiceDown {
            service,
            message,
            response_time,
            error_message,
        } => {
            let service = service.as_deref();
            let mut html = format!(
                "<h2>Service Down Alert</h2>\n<p><strong>Service:</strong> {}</p>\n<p><strong>Message:</strong> {}</p>\n",
                encode_text(service.unwrap_or("Unknown")),
                encode_text(message)
            );
            let mut text = format!(
                "Service Down Alert\n\nService: {}\nMessage: {message}\n",
                service.unwrap_or("Unknown")
            );
            if let Some(ms) = response_time {
                html.push_str(&format!("<p><strong>Response Time:</strong> {ms}ms</p>\n"));
                text.push_str(&format!("Response Time: {ms}ms\n"));
            }
            if let Some(err) = error_message {
                html.push_str(&format!("<p><strong>Error:</strong> {}</p>\n", encode_text(err)));
                text.push_str(&format!("Error: {err}\n"));
            }
            html.push_str(&format!("<p><em>Timestamp: {stamp}</em></p>"));
            text.push_str(&format!("\nTimestamp: {stamp}"));
            (
                format!("Alert: {} is Down", service.unwrap_or("Service")),
                html,
                text,
            )
        }
        Notification::DiskUsage {
            disk_usage_percent,
            message,
        } => (
            format!("Alert: Disk Usage at {disk_usage_percent}%"),
            format!(
                "<h2>High Disk Usage Alert</h2>\n<p><strong>Disk Usage:</strong> {disk_usage_percent}%</p>\n<p><strong>Message:</strong> {}</p>\n<p><em>Timestamp: {stamp}</em></p>",
                encode_text(message)
            ),
            format!(
                "High Disk Usage Alert\n\nDisk Usage: {disk_usage_percent}%\nMessage: {message}\n\nTimestamp: {stamp}"
            ),
        ),
        Notification::Custom { message } => {
            let short: String = message.chars().take(50).collect();
            (
                format!("C-Net Alert: {short}"),
                format!(
                    "<h2>C-Net Alert</h2>\n<p>{}</p>\n<p><em>Timestamp: {stamp}</em></p>",
                    encode_text(message)
                ),
                format!("C-Net Alert\n\n{message}\n\nTimestamp: {stamp}"),
            )
        }
    };

    Email {
        to: to.to_owned(),
        subject,
        html,
        text,
    }
}

pub async fn send(
    ctx: &JobContext,
    payload: &NotificationPayload,
) -> Result<NotificationOutcome, JobError> {
    let recipient = payload
        .recipient
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| ctx.operator_email.clone());
    let now = Utc::now();
    let email = render(&payload.notification, &recipient, now);

    let message_id = ctx.notifier.send(&email).await?;
    info!(
        kind = payload.notification.kind(),
        recipient = %recipient,
        message_id = %message_id,
        "notification sent"
    );

    Ok(NotificationOutcome {
        success: true,
        kind: payload.notification.kind(),
        message_id,
        recipient,
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn service_down_includes_optional_fields() {
        let email = render(
            &Notification::ServiceDown {
                service: Some("Plex".into()),
                message: "Service Plex is now down".into(),
                response_time: Some(5003),
                error_message: Some("connection refused".into()),
            },
            "ops@c-net.local",
            at(),
        );
        assert_eq!(email.subject, "Alert: Plex is Down");
        assert!(email.text.contains("Response Time: 5003ms"));
        assert!(email.text.contains("Error: connection refused"));
        assert!(email.text.ends_with("Timestamp: 2026-03-01T12:00:00.000Z"));
        assert!(email.html.contains("<strong>Service:</strong> Plex"));
    }

    #[test]
    fn service_down_without_details() {
        let email = render(
            &Notification::ServiceDown {
                service: None,
                message: "down".into(),
                response_time: None,
                error_message: None,
            },
            "ops@c-net.local",
            at(),
        );
        assert_eq!(email.subject, "Alert: Service is Down");
        assert!(!email.text.contains("Response Time"));
        assert!(email.text.contains("Service: Unknown"));
    }

    #[test]
    fn custom_subject_is_truncated_and_html_escaped() {
        let message = format!("<b>{}</b>", "x".repeat(80));
        let email = render(
            &Notification::Custom {
                message: message.clone(),
            },
            "ops@c-net.local",
            at(),
        );
        assert_eq!(email.subject.chars().count(), "C-Net Alert: ".len() + 50);
        assert!(email.html.contains("&lt;b&gt;"));
        assert!(email.text.contains(&message));
    }

    #[test]
    fn markup_in_alert_fields_is_neutralised() {
        let email = render(
            &Notification::ServiceDown {
                service: Some("<script>alert(1)</script>".into()),
                message: "Tom & Jerry <img src=x>".into(),
                response_time: None,
                error_message: Some("</p><a href=evil>".into()),
            },
            "ops@c-net.local",
            at(),
        );
        assert!(!email.html.contains("<script>"));
        assert!(!email.html.contains("<img"));
        assert!(!email.html.contains("<a href"));
        assert!(email.html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(email.html.contains("Tom &amp; Jerry &lt;img src=x&gt;"));
        // plain text stays verbatim
        assert!(email.text.contains("Tom & Jerry <img src=x>"));
    }

    #[test]
    fn disk_usage_subject() {
        let email = render(
            &Notification::DiskUsage {
                disk_usage_percent: 92.5,
                message: "pve01 rootfs".into(),
            },
            "ops@c-net.local",
            at(),
        );
        assert_eq!(email.subject, "Alert: Disk Usage at 92.5%");
    }
}
