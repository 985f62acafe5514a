//! Messaging against an in-process bridge.

mod common;

use std::time::Duration;

use anyhow::Result;
use eventbus_client::{
    DeliveryOptions, Envelope, EnvelopeType, Error, EventBusClient, JsonCodec, Codec, Message,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use common::{
    FakeBridge, WAIT, body_of_encoded_size, init_tracing, request_body_of_encoded_size,
};

async fn connected(bridge: &FakeBridge, max_frame_size: usize) -> Result<EventBusClient> {
    let client = EventBusClient::from_options(
        bridge
            .options()
            .with_max_frame_size(max_frame_size)
            .with_auto_reconnect(false),
    )?;
    client.connect().await?;
    Ok(client)
}

#[tokio::test]
async fn frames_up_to_the_limit_are_sent() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 1024).await?;

    client.send("server_addr", body_of_encoded_size("server_addr", 128)).await?;
    let received = bridge.next().await;
    assert_eq!(received.size, 128);
    assert_eq!(received.envelope.address, "server_addr");

    client
        .send("server_addr", body_of_encoded_size("server_addr", 1024 - 8))
        .await?;
    assert_eq!(bridge.next().await.size, 1024 - 8);

    client
        .send("server_addr", body_of_encoded_size("server_addr", 1024))
        .await?;
    assert_eq!(bridge.next().await.size, 1024);

    Ok(())
}

#[tokio::test]
async fn oversized_frames_fail_locally() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 1024).await?;

    let err = client
        .send("server_addr", body_of_encoded_size("server_addr", 1024 + 8))
        .await
        .expect_err("oversized");
    assert!(matches!(err, Error::FrameTooLarge { size: 1032, max: 1024 }));

    let err = client
        .send("server_addr", body_of_encoded_size("server_addr", 1024 + 1))
        .await
        .expect_err("one byte over");
    assert!(matches!(err, Error::FrameTooLarge { size: 1025, .. }));

    // Nothing reached the bridge; the connection is still usable.
    sleep(Duration::from_millis(100)).await;
    assert!(bridge.try_next().is_none());
    assert!(client.is_connected());

    client.send("server_addr", "small").await?;
    assert_eq!(bridge.next().await.envelope.body, json!("small"));

    Ok(())
}

#[tokio::test]
async fn requests_up_to_the_limit_are_answered() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 1024).await?;

    for total in [128, 1024 - 8, 1024] {
        let body = request_body_of_encoded_size("echo", total);
        let reply = client.request("echo", body.as_str()).await?;
        assert_eq!(reply.body(), &json!(body));

        let sent = bridge.next().await;
        assert_eq!(sent.size, total);
        assert!(sent.envelope.reply_address.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn oversized_requests_fail_locally() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 1024).await?;

    let err = client
        .request("echo", request_body_of_encoded_size("echo", 1024 + 8))
        .await
        .expect_err("oversized");
    assert!(matches!(err, Error::FrameTooLarge { size: 1032, max: 1024 }));

    let err = client
        .request("echo", request_body_of_encoded_size("echo", 1024 + 1))
        .await
        .expect_err("one byte over");
    assert!(matches!(err, Error::FrameTooLarge { size: 1025, max: 1024 }));

    sleep(Duration::from_millis(100)).await;
    assert!(bridge.try_next().is_none());
    assert_eq!(client.request("echo", "small").await?.body(), &json!("small"));
    Ok(())
}

#[tokio::test]
async fn request_receives_reply() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let reply = client
        .request_with_options(
            "echo",
            json!({"n": 7}),
            DeliveryOptions::new().with_header("tenant", "acme"),
        )
        .await?;
    assert_eq!(reply.body(), &json!({"n": 7}));
    assert_eq!(reply.header("tenant"), Some("acme"));

    let sent = bridge.next().await.envelope;
    assert_eq!(sent.kind, EnvelopeType::Send);
    assert!(sent.reply_address.is_some());

    Ok(())
}

#[tokio::test]
async fn concurrent_requests_are_correlated() -> Result<()> {
    init_tracing();
    let bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let requests = (0..20).map(|n| {
        let client = client.clone();
        tokio::spawn(async move { client.request("echo", n).await })
    });

    for (n, handle) in requests.enumerate() {
        let reply = handle.await??;
        assert_eq!(reply.body_as::<usize>()?, n);
    }
    Ok(())
}

#[tokio::test]
async fn bridge_failure_reaches_requester() -> Result<()> {
    init_tracing();
    let bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let err = client.request("fail", "x").await.expect_err("failure");
    match err {
        Error::Reply {
            failure_code,
            failure_type,
            message,
        } => {
            assert_eq!(failure_code, 500);
            assert_eq!(failure_type, "RECIPIENT_FAILURE");
            assert_eq!(message, "failed on purpose");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn unanswered_request_times_out() -> Result<()> {
    init_tracing();
    let bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let err = client
        .request_with_timeout("nobody", "x", Duration::from_millis(100))
        .await
        .expect_err("timeout");
    assert!(err.is_timeout());
    assert!(matches!(err, Error::ReplyTimeout { timeout_ms: 100, .. }));
    Ok(())
}

#[tokio::test]
async fn consumer_receives_published_messages() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let registration = client
        .consumer("news", move |message| {
            let _ = tx.send(message);
        })
        .await?;
    assert_eq!(bridge.next_of(EnvelopeType::Register).await.envelope.address, "news");

    client.publish("news", json!({"headline": "hi"})).await?;
    let message = timeout(WAIT, rx.recv()).await?.expect("message");
    assert_eq!(message.address(), "news");
    assert_eq!(message.body(), &json!({"headline": "hi"}));

    assert!(client.unregister(registration).await?);
    assert_eq!(
        bridge.next_of(EnvelopeType::Unregister).await.envelope.address,
        "news"
    );
    Ok(())
}

#[tokio::test]
async fn oversized_consumer_address_fails_locally() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 64).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let address = "a".repeat(100);
    let err = client
        .consumer(&address, move |message| {
            let _ = tx.send(message);
        })
        .await
        .expect_err("register envelope too large");
    assert!(matches!(err, Error::FrameTooLarge { max: 64, .. }));

    // Nothing was registered on the bridge and no handler was kept.
    sleep(Duration::from_millis(100)).await;
    assert!(bridge.try_next().is_none());
    assert!(rx.try_recv().is_err());
    assert!(client.is_connected());
    Ok(())
}

#[tokio::test]
async fn consumer_can_reply() -> Result<()> {
    init_tracing();
    let mut bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    let replier = client.downgrade();
    client
        .consumer("greeter", move |message| {
            let Some(replier) = replier.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let name = message.body().as_str().unwrap_or_default().to_string();
                let _ = replier.reply(&message, format!("hello {name}")).await;
            });
        })
        .await?;
    let _ = bridge.next_of(EnvelopeType::Register).await;

    bridge.push(json!({
        "type": "rec",
        "address": "greeter",
        "replyAddress": "bridge-reply-1",
        "body": "bus",
    }));

    let answer = bridge.next_of(EnvelopeType::Send).await.envelope;
    assert_eq!(answer.address, "bridge-reply-1");
    assert_eq!(answer.body, json!("hello bus"));
    Ok(())
}

#[tokio::test]
async fn late_reply_is_dropped() -> Result<()> {
    init_tracing();
    let bridge = FakeBridge::start().await;
    let client = connected(&bridge, 65_536).await?;

    // Nobody waits for this address; the client logs and carries on.
    bridge.push(json!({"type": "rec", "address": "stale-reply", "body": 1}));

    let reply = client.request("echo", "still works").await?;
    assert_eq!(reply.body(), &json!("still works"));
    Ok(())
}

#[test]
fn envelope_size_helper_is_exact() {
    let body = body_of_encoded_size("server_addr", 128);
    let encoded = JsonCodec
        .encode(&Envelope::send("server_addr", json!(body)))
        .expect("encode");
    assert_eq!(encoded.len(), 128);
}
