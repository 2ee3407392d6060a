// tests/discord_delivery.rs
//
// DiscordNotifier against throwaway local HTTP listeners: stalled peers,
// rate limits and permanent failures.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use common::*;
use tremor_watch::dispatch::{DispatchSummary, Dispatcher};
use tremor_watch::notify::{discord::DiscordNotifier, Notifier};

/// Read one request (headers plus `content-length` body) as lossy text.
async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let len = text[..end]
                .lines()
                .find_map(|l| {
                    let l = l.to_ascii_lowercase();
                    l.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Serves the canned responses in order, one per connection, then 200s.
async fn scripted_server(responses: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        let mut i = 0usize;
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let req = read_request(&mut sock).await;
            log.lock().unwrap().push(req);
            let rsp = responses.get(i).copied().unwrap_or(
                "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
            );
            i += 1;
            let _ = sock.write_all(rsp.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    (base, seen)
}

#[tokio::test]
async fn stalled_peer_is_retried_within_the_delivery_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            // Never answer.
            held.push(sock);
        }
    });

    let deadline = Duration::from_secs(3);
    let notifier = DiscordNotifier::new("test-token".into())
        .with_api_base(&base)
        .with_delivery_budget(deadline);
    assert!(notifier.attempt_timeout() < deadline);

    let store = memory_store().await;
    store.set_channel(GUILD_A, CHANNEL_A).await.unwrap();
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(notifier), deadline);

    let summary = dispatcher
        .dispatch(&[quake("stall", minutes_ago(1), 4.8)])
        .await
        .unwrap();
    assert!(matches!(summary, DispatchSummary::Delivered { succeeded: 0, .. }));
    assert!(
        connections.load(Ordering::SeqCst) >= 2,
        "expected a retry, saw {} connection(s)",
        connections.load(Ordering::SeqCst)
    );
    assert!(store.is_tracked("stall").await);
}

#[tokio::test]
async fn rate_limit_waits_for_retry_after_then_succeeds() {
    let (base, seen) = scripted_server(vec![
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    ])
    .await;
    let notifier = DiscordNotifier::new("test-token".into())
        .with_api_base(&base)
        .with_delivery_budget(Duration::from_secs(10));

    let t0 = Instant::now();
    notifier
        .send(CHANNEL_A, &quake("q1", minutes_ago(1), 5.0))
        .await
        .unwrap();
    // Retry-After: 0 beats the 500ms backoff.
    assert!(t0.elapsed() < Duration::from_millis(450), "{:?}", t0.elapsed());

    let reqs = seen.lock().unwrap().clone();
    assert_eq!(reqs.len(), 2);
    let first = reqs[0].to_ascii_lowercase();
    assert!(first.starts_with(&format!("post /channels/{CHANNEL_A}/messages")), "{first}");
    assert!(first.contains("authorization: bot test-token"));
    assert!(first.contains("\"embeds\""));
}

#[tokio::test]
async fn missing_channel_fails_without_retry() {
    let (base, seen) = scripted_server(vec![
        "HTTP/1.1 404 Not Found\r\nContent-Length: 25\r\nConnection: close\r\n\r\n{\"message\":\"Unknown Ch\"}\n",
    ])
    .await;
    let notifier = DiscordNotifier::new("test-token".into())
        .with_api_base(&base)
        .with_delivery_budget(Duration::from_secs(10));

    let err = notifier
        .send(CHANNEL_A, &quake("q1", minutes_ago(1), 5.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    assert_eq!(seen.lock().unwrap().len(), 1);
}
