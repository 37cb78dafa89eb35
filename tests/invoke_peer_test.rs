use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lenz_bridge::bootstrap::{Bootstrap, ImportMap};
use lenz_bridge::ipc::{BaseUrlResolver, InvokeError, InvokePayload, InvokeResult, InvokeTransport};
use lenz_bridge::params;
use lenz_bridge::peer::{start_peer, InvokeRouter, PeerConfig, PeerHandle};
use reqwest::Client;
use serde_json::{json, Value};

fn router() -> InvokeRouter {
    InvokeRouter::with_builtins()
        .handle("math.add", |call| {
            let sum: i64 = call
                .params
                .iter()
                .filter_map(|param| match param {
                    lenz_bridge::ipc::InvokeParam::Json(value) => value.as_i64(),
                    lenz_bridge::ipc::InvokeParam::Binary(_) => None,
                })
                .sum();
            InvokeResult::json(json!(sum))
        })
        .handle("fs.read", |_| InvokeResult::error("no such file"))
        .handle("whoami", |call| InvokeResult::json(json!(call.window_id)))
        .handle("a", |_| InvokeResult::json(json!("plain a")))
        .handle("a?b", |call| InvokeResult::json(json!(call.method)))
        .handle_async("slow.echo", |call| async move {
            let delay = match call.params.first() {
                Some(lenz_bridge::ipc::InvokeParam::Json(value)) => value.as_u64().unwrap_or(0),
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            InvokeResult::json(json!(delay))
        })
}

async fn spawn_peer() -> Result<(PeerHandle, InvokeTransport)> {
    let resolver = Arc::new(BaseUrlResolver::new(url::Url::parse("http://127.0.0.1/")?));
    let handle = start_peer(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        PeerConfig {
            router: router(),
            bootstrap: Bootstrap::new(ImportMap::new(), resolver.as_ref()),
            asset_root: None,
        },
    )
    .await?;
    let transport = InvokeTransport::new("main", Arc::new(BaseUrlResolver::new(handle.base_url()?)));
    Ok((handle, transport))
}

#[tokio::test]
async fn async_invoke_round_trips_json() -> Result<()> {
    let (handle, transport) = spawn_peer().await?;

    let pong = transport.invoke_async("bridge.ping", params![]).await?;
    assert_eq!(pong, InvokePayload::Json(json!("pong")));

    let sum: i64 = transport.invoke_async_json("math.add", params![2, 40]).await?;
    assert_eq!(sum, 42);

    let who: String = transport.invoke_async_json("whoami", params![]).await?;
    assert_eq!(who, "main");

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn async_invoke_carries_binary_both_ways() -> Result<()> {
    let (handle, transport) = spawn_peer().await?;

    let payload = transport
        .invoke_async("bridge.echo", params![vec![0u8, 159, 146, 150]])
        .await?;
    assert_eq!(payload, InvokePayload::Binary(vec![0, 159, 146, 150]));

    // A buffer next to other params goes as a JSON array of bytes.
    let mixed = transport
        .invoke_async("bridge.echo", params!["name", vec![1u8, 2]])
        .await?;
    assert_eq!(mixed, InvokePayload::Json(json!(["name", [1, 2]])));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn host_errors_reject_with_their_message() -> Result<()> {
    let (handle, transport) = spawn_peer().await?;

    let err = transport.invoke_async("fs.read", params!["/missing"]).await.unwrap_err();
    assert_eq!(err.host_detail().map(|d| d.message()), Some("no such file".to_string()));
    assert_eq!(err.to_string(), "InvokeError: no such file");

    let unknown = transport.invoke_async("no.such.method", params![]).await.unwrap_err();
    assert!(matches!(unknown, InvokeError::Host(_)));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn method_names_reach_the_peer_intact() -> Result<()> {
    let (handle, transport) = spawn_peer().await?;

    let method: String = transport.invoke_async_json("a?b", params![]).await?;
    assert_eq!(method, "a?b");

    let err = transport.invoke_async("..", params![]).await.unwrap_err();
    assert!(matches!(err, InvokeError::Request(_)));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_complete_independently() -> Result<()> {
    let (handle, transport) = spawn_peer().await?;

    let slow = transport.invoke_async_json::<u64>("slow.echo", params![200]);
    let fast = transport.invoke_async_json::<u64>("slow.echo", params![0]);
    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow?, 200);
    assert_eq!(fast?, 0);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn requests_without_window_id_are_refused() -> Result<()> {
    let (handle, _transport) = spawn_peer().await?;
    let client = Client::new();

    let response = client
        .post(format!("http://{}/ipc/invoke/bridge.ping", handle.addr))
        .header("content-type", "application/json")
        .body("[]")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(response.headers().get("x-invoke-result").is_none());

    let response = client
        .post(format!("http://{}/ipc/invoke/bridge.ping", handle.addr))
        .header("x-window-id", "main")
        .header("content-type", "application/json")
        .body("{\"not\": \"an array\"}")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-invoke-result"], "Err");
    let message: Value = serde_json::from_str(&response.text().await?)?;
    assert!(message.is_string());

    handle.shutdown().await;
    Ok(())
}

#[test]
fn sync_invoke_blocks_until_answered() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let (handle, transport) = rt.block_on(spawn_peer())?;

    let pong = transport.invoke_sync("bridge.ping", params![])?;
    assert_eq!(pong.as_json(), Some(&json!("pong")));

    let delay: u64 = transport.invoke_sync_json("slow.echo", params![50])?;
    assert_eq!(delay, 50);

    let err = transport.invoke_sync("fs.read", params![]).unwrap_err();
    assert_eq!(err.to_string(), "InvokeError: no such file");

    drop(transport);
    rt.block_on(handle.shutdown());
    Ok(())
}
