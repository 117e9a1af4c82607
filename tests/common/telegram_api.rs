//! A local stand-in for the Telegram Bot API
//!
//! Answers `getMe`, `deleteWebhook` and `getUpdates` (always empty, after a
//! short long-poll delay) so a real `Dispatcher` can start and stop offline.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How long `getUpdates` holds the request before answering.
const POLL_DELAY: Duration = Duration::from_millis(50);

pub struct MockTelegramApi {
    pub url: reqwest::Url,
    get_updates: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl MockTelegramApi {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock api");
        let addr = listener.local_addr().expect("mock api address");
        let get_updates = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&get_updates);
        let app = Router::new().fallback(move |uri: Uri| {
            let counter = Arc::clone(&counter);
            async move { Json(answer(&uri, &counter).await) }
        });

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: reqwest::Url::parse(&format!("http://{}/", addr)).expect("mock api url"),
            get_updates,
            server,
        }
    }

    /// Number of `getUpdates` calls served so far.
    pub fn get_updates_calls(&self) -> usize {
        self.get_updates.load(Ordering::SeqCst)
    }
}

impl Drop for MockTelegramApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn answer(uri: &Uri, get_updates: &AtomicUsize) -> Value {
    let method = uri.path().rsplit('/').next().unwrap_or_default().to_ascii_lowercase();

    let result = match method.as_str() {
        "getme" => json!({
            "id": 1,
            "is_bot": true,
            "first_name": "Mini App",
            "username": "miniapp_test_bot",
            "can_join_groups": true,
            "can_read_all_group_messages": false,
            "supports_inline_queries": false,
            "can_connect_to_business": false,
            "has_main_web_app": false
        }),
        "getupdates" => {
            get_updates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(POLL_DELAY).await;
            json!([])
        }
        _ => json!(true),
    };

    json!({ "ok": true, "result": result })
}
