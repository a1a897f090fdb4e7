#![allow(dead_code)]
//! Shared fixtures for the integration tests.

pub mod app;

use alarmwatch::core::{AlarmBatch, Application, EventRecord};
use serde_json::json;

/// An application with the given channels switched on and otherwise empty
/// channel blocks.
pub fn create_test_app(id: &str, mail: bool, chatbot: bool, webhook: bool) -> Application {
    let mut app = Application {
        id: id.to_string(),
        name: format!("{id} service"),
        ..Default::default()
    };
    app.email_alarm_conf.enable = mail;
    app.ding_alarm_conf.enable = chatbot;
    app.http_alarm_conf.enable = webhook;
    app
}

pub fn attack_record(source: &str, attack_type: &str) -> EventRecord {
    json!({
        "event_time": "2025-07-08 21:03:52",
        "attack_source": source,
        "target": "shop.example.com",
        "attack_type": attack_type,
        "intercept_state": "block"
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

pub fn attack_batch(total: i64, samples: usize) -> AlarmBatch {
    let records = (0..samples)
        .map(|i| attack_record(&format!("10.0.0.{}", i + 1), "sql"))
        .collect();
    AlarmBatch::new(total, records)
}
