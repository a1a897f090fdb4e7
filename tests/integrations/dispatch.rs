//! Dispatching through the real channels against local fake servers.

use alarmwatch::config::Config;
use alarmwatch::core::{test_alarm_record, Application, ChannelKind};
use alarmwatch::internal_metrics::Metrics;
use alarmwatch::notification::dispatcher::AlarmDispatcher;
use alarmwatch::notification::error::ChannelError;
use alarmwatch::notification::test_utils::{FakeSmtpOptions, FakeSmtpServer, RecordingChannel};
use alarmwatch::scheduler::AlarmScheduler;
use alarmwatch::source::test_utils::{ScriptedAlarmSource, StaticRepository};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{attack_batch, create_test_app};

fn config_for(gateway: &MockServer) -> Config {
    let mut config = Config::default();
    config.alarm.panel_server_url = "https://panel.example.com/".to_string();
    config.channels.chatbot_base_url = gateway.uri();
    config.channels.http_timeout_seconds = 2;
    config.channels.mail_dial_timeout_seconds = 2;
    config.channels.mail_session_timeout_seconds = 5;
    config
}

fn dispatcher_for(gateway: &MockServer) -> AlarmDispatcher {
    AlarmDispatcher::from_config(&config_for(gateway), Metrics::disabled()).unwrap()
}

fn with_webhook(mut app: Application, url: String) -> Application {
    app.http_alarm_conf.recv_addr = vec![url];
    app
}

fn with_chatbot(mut app: Application) -> Application {
    app.ding_alarm_conf.agent_id = "1000002".into();
    app.ding_alarm_conf.corp_id = "corp-1".into();
    app.ding_alarm_conf.corp_secret = "s3cret".into();
    app.ding_alarm_conf.recv_user = vec!["ops".into()];
    app
}

fn with_mail(mut app: Application, server_addr: String) -> Application {
    app.email_alarm_conf.server_addr = server_addr;
    app.email_alarm_conf.username = "alarm@example.com".into();
    app.email_alarm_conf.recv_addr = vec!["ops@example.com".into()];
    app
}

/// An address nothing listens on.
fn closed_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn test_webhook_only_app_receives_sample_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app = with_webhook(
        create_test_app("app-1", false, false, true),
        format!("{}/hook", server.uri()),
    );
    let batch = attack_batch(3, 2);
    let records = batch.records.clone();

    let report = dispatcher_for(&server).dispatch(&app, batch, false).await;

    assert!(report.into_result().is_ok());
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, json!({"app_id": "app-1", "data": records}));
}

#[tokio::test]
async fn test_rejected_token_stops_before_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gettoken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errcode": 40001, "errmsg": "bad secret"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/message/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = with_chatbot(create_test_app("app-1", false, true, false));
    let report = dispatcher_for(&server).dispatch(&app, attack_batch(1, 1), false).await;

    match report.into_result() {
        Err(ChannelError::TokenExchangeFailed { reason, .. }) => assert!(reason.contains("bad secret")),
        other => panic!("expected TokenExchangeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mail_without_recipients_is_rejected_before_connecting() {
    let gateway = MockServer::start().await;
    let smtp = FakeSmtpServer::start(FakeSmtpOptions::default()).await;

    let mut app = with_mail(create_test_app("app-1", true, false, false), smtp.addr.to_string());
    app.email_alarm_conf.recv_addr.clear();

    let report = dispatcher_for(&gateway).dispatch(&app, attack_batch(1, 1), false).await;

    assert!(matches!(report.into_result(), Err(ChannelError::ConfigInvalid(_))));
    // Nobody connected, so the fake server is still waiting.
    assert!(tokio::time::timeout(std::time::Duration::from_millis(100), smtp.finish())
        .await
        .is_err());
}

#[tokio::test]
async fn test_test_alarm_mail_is_marked_and_carries_canned_record() {
    let gateway = MockServer::start().await;
    let smtp = FakeSmtpServer::start(FakeSmtpOptions::default()).await;
    let app = with_mail(create_test_app("app-1", true, false, false), smtp.addr.to_string());

    let report = dispatcher_for(&gateway).dispatch(&app, attack_batch(50, 10), true).await;
    assert!(report.into_result().is_ok());

    let transcript = smtp.finish().await;
    assert_eq!(transcript.messages.len(), 1);
    let message = &transcript.messages[0];
    assert!(message.contains("Subject: [TEST EMAIL] OpenRASP alarm\r\n"));
    assert!(message.contains("To: ops@example.com\r\n"));
    assert!(message.contains("220.181.57.191"));
    assert!(!message.contains("10.0.0.1"), "the real batch is ignored");
    assert!(transcript.commands.iter().any(|c| c == "RCPT TO:<ops@example.com>"));
}

#[tokio::test]
async fn test_failed_mail_does_not_block_chatbot_and_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gettoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "access_token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/message/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_test_app("app-1", true, true, true);
    let app = with_mail(app, closed_addr());
    let app = with_chatbot(app);
    let app = with_webhook(app, format!("{}/hook", server.uri()));

    let report = dispatcher_for(&server).dispatch(&app, attack_batch(2, 2), false).await;

    assert_eq!(report.outcomes.len(), 3);
    let failed: Vec<_> = report.failures().map(|(kind, _)| kind).collect();
    assert_eq!(failed, vec![ChannelKind::Mail]);
    assert!(matches!(
        report.failures().next(),
        Some((_, ChannelError::DialFailed { .. }))
    ));
}

#[tokio::test]
async fn test_test_alarm_sends_canned_record_to_every_channel() {
    let channels = [
        RecordingChannel::new(ChannelKind::Mail),
        RecordingChannel::new(ChannelKind::ChatBot),
        RecordingChannel::new(ChannelKind::Webhook),
    ];
    let dispatcher = AlarmDispatcher::new(
        channels.iter().map(|c| Arc::new(c.clone()) as _).collect(),
        Metrics::disabled(),
    );
    let app = create_test_app("app-1", true, true, true);

    let report = dispatcher.dispatch(&app, attack_batch(7, 3), true).await;

    assert!(report.is_success());
    for channel in &channels {
        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.batch.records, vec![test_alarm_record().clone()]);
    }
}

#[tokio::test]
async fn test_scheduler_tick_posts_webhook_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let app = with_webhook(
        create_test_app("shop", false, false, true),
        format!("{}/hook", server.uri()),
    );
    let config = config_for(&server);
    let mut scheduler = AlarmScheduler::new(
        &config.alarm,
        Arc::new(StaticRepository::new(vec![app])),
        Arc::new(ScriptedAlarmSource::new().with_batch("shop", attack_batch(4, 2))),
        Arc::new(AlarmDispatcher::from_config(&config, Metrics::disabled()).unwrap()),
        Metrics::disabled(),
    )
    .with_watermark(1_000);

    let report = scheduler.run_tick(2_000).await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.channel_failures, 0);
    assert_eq!(scheduler.watermark(), 2_001);
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["app_id"], "shop");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
