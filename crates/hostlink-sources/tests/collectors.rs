//! Built-in collectors running under the agent runtime

use hostlink_core::config::AgentConfig;
use hostlink_core::record::Record;
use hostlink_core::{AgentRuntime, EventBuffer};
use hostlink_sources::default_factories;
use hostlink_sources::system::SYSTEM_ENVIRONMENT_SCHEMA;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

async fn wait_for(runtime: &AgentRuntime, schema: &str) -> Vec<Record> {
    let token = CancellationToken::new();
    let mut seen = Vec::new();
    for _ in 0..200 {
        seen.extend(runtime.buffer().next(&token));
        if seen.iter().any(|r| r.schema() == schema) {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {schema} record within timeout; saw {seen:?}");
}

#[tokio::test]
async fn test_runtime_runs_configured_collectors() {
    let port = free_udp_port();
    let config = AgentConfig::from_toml(&format!(
        r#"
        [output]
        interval = "1h"

        [[sources]]
        type = "systeminformation"
        interval = "1h"

        [[sources]]
        type = "UdpListener"
        port = {port}

        [[sources]]
        type = "ProcessInformation"
        enabled = false
        "#
    ))
    .unwrap();

    let runtime = AgentRuntime::builder(config)
        .factories(default_factories())
        .build();
    runtime.start();

    let names = runtime.service_names();
    assert!(names.iter().any(|n| n == "SystemInformation"));
    assert!(names.iter().any(|n| n == "UdpListener"));

    wait_for(&runtime, SYSTEM_ENVIRONMENT_SCHEMA).await;

    // The listener binds on its own task; resend until a record shows up
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let payload = br#"{"Schema":"App.Event","Data":{"user id":"42","attempt":1}}"#;
    let token = CancellationToken::new();
    let mut received = None;
    for _ in 0..50 {
        client.send_to(payload, ("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        received = runtime
            .buffer()
            .next(&token)
            .into_iter()
            .find(|r| r.schema() == "App.Event");
        if received.is_some() {
            break;
        }
    }

    let record = received.expect("datagram turned into a record");
    assert_eq!(
        record.get("user_id").and_then(|v| v.as_str()),
        Some("42")
    );
    assert_eq!(record.get("attempt").and_then(|v| v.as_i64()), Some(1));

    runtime.stop().await;
}

#[tokio::test]
async fn test_unknown_source_type_is_skipped() {
    let config = AgentConfig::from_toml(
        r#"
        [output]
        interval = "1h"

        [[sources]]
        type = "EtwListener"

        [[sources]]
        type = "DiskInformation"
        interval = "1h"
        "#,
    )
    .unwrap();

    let runtime = AgentRuntime::builder(config)
        .factories(default_factories())
        .build();
    runtime.start();

    let names = runtime.service_names();
    assert!(names.iter().any(|n| n == "DiskInformation"));
    assert!(!names.iter().any(|n| n.eq_ignore_ascii_case("EtwListener")));

    runtime.stop().await;
}
