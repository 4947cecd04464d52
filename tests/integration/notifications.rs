//! Notification routing through the pipeline

use std::sync::Arc;

use module_monitoring::config::parse_config;
use module_monitoring::notify::{Channel, WebhookNotifier};
use module_monitoring::storage::MemoryStorage;
use module_monitoring::{Monitoring, Severity};
use pretty_assertions::assert_eq;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{FLUSH_TIMEOUT, RecordingNotifier, stored_events};

/// Wait for the pipeline off the async worker threads
async fn drained(monitoring: Monitoring) -> Monitoring {
    tokio::task::spawn_blocking(move || {
        assert!(monitoring.wait_flushed(FLUSH_TIMEOUT));
        monitoring
    })
    .await
    .unwrap()
}

async fn finish(monitoring: Monitoring) {
    tokio::task::spawn_blocking(move || monitoring.shutdown())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configured_webhook_receives_email_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = parse_config(&format!(
        r#"{{
            "module": "checkout",
            "machine": "box-1",
            "counters": {{ "update_interval_ms": 0 }},
            "notifications": [
                {{ "channel": "email", "target": {{ "webhook": {{ "url": "{}/hook" }} }} }}
            ]
        }}"#,
        server.uri()
    ))
    .unwrap();

    let monitoring = Monitoring::from_config(&config).await.unwrap();
    let gateway = monitoring.create_monitoring("gateway").unwrap();
    gateway
        .register(Severity::ERROR, "timeout", "no email bit")
        .unwrap();
    gateway
        .register(Severity::ERROR.with_email(), "gateway down", "502 from upstream")
        .unwrap();

    let monitoring = drained(monitoring).await;
    finish(monitoring).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["channel"], "email");
    assert_eq!(body["component"], "checkout.gateway");
    assert_eq!(body["title"], "gateway down");
    assert_eq!(body["machine"], "box-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_notification_does_not_lose_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("mailer down"))
        .mount(&server)
        .await;

    let monitoring = Monitoring::builder("checkout")
        .machine("box-1")
        .counter_interval(None)
        .storage(Arc::new(MemoryStorage::new()))
        .notifier(Channel::Sms, Arc::new(WebhookNotifier::new(server.uri())))
        .build()
        .unwrap();

    for i in 0..5 {
        monitoring
            .register(Severity::FATAL.with_sms(), &format!("outage {i}"), "")
            .unwrap();
    }

    let monitoring = drained(monitoring).await;
    let events = tokio::task::spawn_blocking(move || {
        let events = stored_events(&monitoring);
        monitoring.shutdown();
        events
    })
    .await
    .unwrap();

    assert_eq!(events.len(), 5);
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
}

#[test]
fn test_channels_fan_out_by_severity_bits() {
    let plain = Arc::new(RecordingNotifier::default());
    let email = Arc::new(RecordingNotifier::default());
    let sms = Arc::new(RecordingNotifier::default());

    let monitoring = Monitoring::builder("checkout")
        .machine("box-1")
        .counter_interval(None)
        .notifier(Channel::Plain, plain.clone())
        .notifier(Channel::Email, email.clone())
        .notifier(Channel::Sms, sms.clone())
        .build()
        .unwrap();

    monitoring.register(Severity::WARNING, "quiet", "").unwrap();
    monitoring
        .register(Severity::WARNING.with_notify(), "noted", "")
        .unwrap();
    monitoring
        .register(Severity::ERROR.with_email(), "mailed", "")
        .unwrap();
    monitoring
        .register(Severity::FATAL.with_email().with_sms(), "paged", "")
        .unwrap();
    assert_eq!(stored_events(&monitoring).len(), 4);
    monitoring.shutdown();

    let titles = |sink: &RecordingNotifier| -> Vec<String> {
        sink.received.lock().iter().map(|(_, t)| t.clone()).collect()
    };
    assert_eq!(titles(&plain), vec!["noted", "mailed", "paged"]);
    assert_eq!(titles(&email), vec!["mailed", "paged"]);
    assert_eq!(titles(&sms), vec!["paged"]);
}
