#![allow(dead_code)]

pub mod mock_upstream;

use bytes::Bytes;
use chat_relay::relay_state::RelayState;
use chat_relay::secrets::Credentials;
use chat_relay::session::HistoryWindow;
use chat_relay::upstream::{RetryConfig, UpstreamClient};
use serde_json::Value;
use std::time::Duration;

pub const TEST_BACKOFF: Duration = Duration::from_millis(100);

/// Relay state with a short retry delay. `None` leaves credentials unset.
pub fn create_test_state(upstream_url: Option<&str>) -> RelayState {
    create_test_state_with_window(upstream_url, HistoryWindow::Unbounded)
}

pub fn create_test_state_with_window(
    upstream_url: Option<&str>,
    window: HistoryWindow,
) -> RelayState {
    let upstream = UpstreamClient::new(
        Duration::from_secs(5),
        RetryConfig {
            max_retries: 2,
            backoff: TEST_BACKOFF,
        },
    )
    .expect("Failed to build upstream client in test");
    let credentials =
        upstream_url.map(|url| Credentials::new("test-key", url).expect("valid test credentials"));
    RelayState::with_parts(upstream, credentials, window)
}

/// Split an SSE body into its `data:` payloads. `[DONE]` is kept as a string.
pub fn parse_sse_frames(body: &Bytes) -> Vec<Value> {
    let text = String::from_utf8_lossy(body);
    assert!(
        text.is_empty() || text.ends_with("\n\n"),
        "body must end on a record boundary: {:?}",
        text
    );
    text.split("\n\n")
        .filter(|record| !record.is_empty())
        .map(|record| {
            let data = record
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("record without data prefix: {:?}", record));
            if data == "[DONE]" {
                Value::String(data.to_string())
            } else {
                serde_json::from_str(data).expect("downstream frame is JSON")
            }
        })
        .collect()
}

/// An upstream SSE line carrying one content fragment.
pub fn delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
    )
}

pub fn sse_body(fragments: &[&str], done: bool) -> String {
    let mut body: String = fragments.iter().map(|f| delta(f)).collect();
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}
