//! Rendering of alarm batches into mail, chat bot and webhook payloads.

use crate::core::{Alarm, Application, EventRecord, MailChannelConfig};
use crate::notification::error::ChannelError;
use chrono::{DateTime, TimeZone};
use handlebars::Handlebars;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;

pub const DEFAULT_MAIL_SUBJECT: &str = "OpenRASP alarm";
pub const TEST_SUBJECT_MARKER: &str = "[TEST EMAIL] ";

const MAIL_TEMPLATE_NAME: &str = "mail";
const DEFAULT_MAIL_TEMPLATE: &str = r#"<html>
<body>
<p>Application <b>{{app_name}}</b> reported the following attack events:</p>
<table border="1" cellspacing="0" cellpadding="4">
<tr><th>Time</th><th>Source</th><th>Target</th><th>Type</th><th>Result</th></tr>
{{#each alarms}}
<tr><td>{{this.event_time}}</td><td>{{this.attack_source}}</td><td>{{this.target}}</td><td>{{this.attack_type}}</td><td>{{this.intercept_state}}</td></tr>
{{/each}}
</table>
{{#if total}}<p>{{total}} more events are not listed in this mail.</p>{{/if}}
<p>Details: <a href="{{detailed_link}}">{{detailed_link}}</a></p>
</body>
</html>
"#;

/// A rendered mail, ready to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    /// Header block, blank line and HTML body.
    pub data: String,
}

/// The JSON body posted to webhook receivers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload<'a> {
    pub app_id: &'a str,
    pub data: &'a [EventRecord],
}

#[derive(Serialize)]
struct MailTemplateParams<'a> {
    /// Events counted but not listed.
    total: i64,
    alarms: &'a [EventRecord],
    detailed_link: String,
    app_name: &'a str,
}

/// Turns an alarm into the payload each channel sends.
///
/// Rendering is pure: the same application, alarm and timestamp always
/// produce the same output.
pub struct AlarmRenderer {
    panel_base: String,
    templates: Handlebars<'static>,
}

impl AlarmRenderer {
    /// Creates a renderer using the built-in mail template.
    pub fn new(panel_base: &str) -> Result<Self, ChannelError> {
        Self::with_mail_template(panel_base, DEFAULT_MAIL_TEMPLATE)
    }

    /// Creates a renderer whose mail digest comes from a Handlebars file.
    pub fn from_template_file(panel_base: &str, path: &Path) -> Result<Self, ChannelError> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            ChannelError::Render(format!(
                "failed to read mail template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::with_mail_template(panel_base, &template)
    }

    fn with_mail_template(panel_base: &str, template: &str) -> Result<Self, ChannelError> {
        let mut templates = Handlebars::new();
        templates
            .register_template_string(MAIL_TEMPLATE_NAME, template)
            .map_err(|e| ChannelError::Render(format!("invalid mail template: {e}")))?;
        Ok(Self {
            panel_base: panel_base.trim_end_matches('/').to_string(),
            templates,
        })
    }

    /// The dashboard page listing the application's attack events.
    pub fn dashboard_link(&self, app: &Application) -> String {
        format!("{}/#/events/{}", self.panel_base, app.id)
    }

    /// Renders the mail digest with its header block.
    pub fn render_mail(
        &self,
        app: &Application,
        conf: &MailChannelConfig,
        alarm: &Alarm,
        sender_name: &str,
    ) -> Result<MailMessage, ChannelError> {
        let mut subject = if conf.subject.is_empty() {
            DEFAULT_MAIL_SUBJECT.to_string()
        } else {
            conf.subject.clone()
        };
        if alarm.is_test {
            subject.insert_str(0, TEST_SUBJECT_MARKER);
        }

        let body = self
            .templates
            .render(
                MAIL_TEMPLATE_NAME,
                &MailTemplateParams {
                    total: alarm.batch.elided(),
                    alarms: &alarm.batch.records,
                    detailed_link: self.dashboard_link(app),
                    app_name: &app.name,
                },
            )
            .map_err(|e| ChannelError::Render(e.to_string()))?;

        let subject = header_value(&subject);
        let from = format_address(&header_value(sender_name), &header_value(&conf.username));
        let to = header_value(&conf.recv_addr.join(","));
        let headers = [
            ("From", from.as_str()),
            ("To", to.as_str()),
            ("Content-Type", "text/html; charset=UTF-8"),
            ("Subject", subject.as_str()),
        ];

        let mut data = String::new();
        for (key, value) in headers {
            data.push_str(&format!("{}: {}\r\n", key, value));
        }
        data.push_str("\r\n");
        for line in body.lines() {
            data.push_str(line);
            data.push_str("\r\n");
        }

        Ok(MailMessage {
            from: conf.username.clone(),
            recipients: conf.recv_addr.clone(),
            subject,
            data,
        })
    }

    /// Renders the plain-text chat bot message.
    pub fn render_chatbot_text<Tz>(&self, app: &Application, alarm: &Alarm, now: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if alarm.is_test {
            format!(
                "OpenRASP test message from app: {}, time: {}",
                app.name,
                now.to_rfc3339()
            )
        } else {
            format!(
                "Time: {}, alarm from OpenRASP\n{} alarms from app: {}, details: {}",
                now.to_rfc3339(),
                alarm.batch.total,
                app.name,
                self.dashboard_link(app)
            )
        }
    }

    /// Builds the webhook body.
    pub fn webhook_payload<'a>(&self, app: &'a Application, alarm: &'a Alarm) -> WebhookPayload<'a> {
        WebhookPayload {
            app_id: &app.id,
            data: &alarm.batch.records,
        }
    }
}

/// Replaces control characters so a value cannot end its header line.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Formats a mailbox as `"name" <address>`.
fn format_address(name: &str, address: &str) -> String {
    if name.is_empty() {
        format!("<{}>", address)
    } else {
        format!("\"{}\" <{}>", name.replace('"', ""), address)
    }
}
