use crate::io_struct::{ChatCompletionRequest, ChatFrame};
use crate::secrets::Credentials;
use crate::session::{HistoryWindow, SessionStore};
use crate::translator::{self, GENERIC_ERROR_MESSAGE};
use crate::upstream::{RetryConfig, UpstreamClient, UpstreamError};
use actix_web::HttpResponse;
use actix_web::http::header::{CACHE_CONTROL, CONNECTION};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_ERROR_MESSAGE: &str =
    "API credentials not configured. Please provide an API key and endpoint.";
pub const AUTH_ERROR_MESSAGE: &str = "Authentication failed. Please check your API credentials.";
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// No-activity timeout for upstream reads, in seconds.
    pub timeout: u64,
    pub max_history_turns: Option<usize>,
    pub secrets_file: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            workers: 1,
            timeout: 60,
            max_history_turns: None,
            secrets_file: None,
            api_key: None,
            api_endpoint: None,
            retry: RetryConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Credentials from explicit values first, then a secrets file. Failure is
    /// logged and yields `None`; the relay then answers with a configuration
    /// error per request.
    pub fn load_credentials(&self) -> Option<Credentials> {
        let loaded = match (&self.api_key, &self.api_endpoint) {
            (Some(key), Some(endpoint)) => Credentials::new(key.as_str(), endpoint),
            _ => Credentials::discover(self.secrets_file.as_deref()),
        };
        match loaded {
            Ok(credentials) => {
                log::info!("API key found");
                log::info!("API endpoint: {}", credentials.api_endpoint());
                Some(credentials)
            }
            Err(e) => {
                log::error!("Failed to load credentials: {}", e);
                log::error!("Chat requests will fail until an API key and endpoint are provided");
                None
            }
        }
    }
}

/// Shared by every request handler through `web::Data`.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub sessions: Arc<SessionStore>,
    pub upstream: UpstreamClient,
    pub credentials: Option<Credentials>,
    pub history_window: HistoryWindow,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(Duration::from_secs(config.timeout), config.retry.clone())?;
        Ok(Self {
            sessions: Arc::new(SessionStore::new()),
            upstream,
            credentials: config.load_credentials(),
            history_window: HistoryWindow::from_max_turns(config.max_history_turns),
        })
    }

    pub fn with_parts(
        upstream: UpstreamClient,
        credentials: Option<Credentials>,
        history_window: HistoryWindow,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            upstream,
            credentials,
            history_window,
        }
    }

    /// Run one chat turn for `session_id` and stream the reply. The session
    /// stays locked until the reply stream finishes or is dropped.
    pub async fn chat(&self, session_id: &str, message: &str) -> HttpResponse {
        let session = self.sessions.get_or_create(session_id);
        let mut history = session.lock_owned().await;
        history.push_user(message);

        let payload = ChatCompletionRequest::new(self.history_window.apply(history.turns()));

        let Some(credentials) = &self.credentials else {
            log::error!("API credentials not configured");
            return event_stream(frames([
                ChatFrame::Error(CONFIG_ERROR_MESSAGE.to_string()),
                ChatFrame::Sentinel,
            ]));
        };

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                log::error!("Failed to encode upstream payload: {}", e);
                return error_response(GENERIC_ERROR_MESSAGE);
            }
        };
        let headers = match credentials.auth_headers() {
            Ok(headers) => headers,
            Err(e) => {
                log::error!("Failed to build upstream headers: {}", e);
                return error_response(GENERIC_ERROR_MESSAGE);
            }
        };

        log::info!("Starting upstream call for session {}", session_id);
        let upstream = match self
            .upstream
            .send(&credentials.completions_url(), &headers, body)
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                log::error!("Chat request for session {} failed: {}", session_id, e);
                return error_response(user_message(&e));
            }
        };

        let session_id = session_id.to_string();
        let translated = translator::translate(upstream, move |completion, text| {
            if completion.is_success() && !text.is_empty() {
                history.push_assistant(text);
                log::info!(
                    "Conversation {} updated, total messages: {}",
                    session_id,
                    history.len()
                );
            }
            // Dropping the guard here releases the session.
            drop(history);
        });
        event_stream(translated.map(|frame| frame.to_bytes()))
    }
}

/// User-safe text for an upstream failure.
pub fn user_message(err: &UpstreamError) -> &'static str {
    match err.status() {
        Some(StatusCode::UNAUTHORIZED) => AUTH_ERROR_MESSAGE,
        Some(StatusCode::TOO_MANY_REQUESTS) => RATE_LIMIT_MESSAGE,
        _ => GENERIC_ERROR_MESSAGE,
    }
}

fn frames<const N: usize>(frames: [ChatFrame; N]) -> impl Stream<Item = Bytes> {
    futures::stream::iter(frames.map(|frame| frame.to_bytes()))
}

fn error_response(message: &str) -> HttpResponse {
    event_stream(frames([ChatFrame::Error(message.to_string())]))
}

pub fn event_stream<S>(body: S) -> HttpResponse
where
    S: Stream<Item = Bytes> + 'static,
{
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header((CONNECTION, "keep-alive"))
        .streaming(body.map(Ok::<_, Infallible>))
}
