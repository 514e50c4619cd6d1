use super::sse_body;
use actix_web::dev::ServerHandle;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted upstream reply. The last reply repeats once the script runs out.
#[derive(Clone, Debug)]
pub enum MockReply {
    Status(u16, &'static str),
    /// Whole SSE body in one write.
    Sse(String),
    /// SSE body written chunk by chunk.
    Chunks(Vec<String>),
    /// Writes the chunks, then keeps the connection open without sending more.
    Hang(Vec<String>),
    /// Sends nothing at all for the given duration.
    Stall(Duration),
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub body: Value,
}

struct MockState {
    replies: Vec<MockReply>,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Stand-in for the completion API, serving `POST /v1/chat/completions`.
pub struct MockUpstream {
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: ServerHandle,
}

impl MockUpstream {
    pub async fn start(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "mock upstream needs at least one reply");
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = web::Data::new(MockState {
            replies,
            hits: hits.clone(),
            requests: requests.clone(),
        });

        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .route("/v1/chat/completions", web::post().to(completions))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("Failed to bind mock upstream");
        let port = server.addrs()[0].port();
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            url: format!("http://127.0.0.1:{}", port),
            hits,
            requests,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

async fn completions(req: HttpRequest, body: Bytes, state: web::Data<MockState>) -> HttpResponse {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(RecordedRequest {
        authorization: req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let reply = state
        .replies
        .get(n)
        .or(state.replies.last())
        .cloned()
        .expect("non-empty script");
    match reply {
        MockReply::Status(status, body) => {
            let status = actix_web::http::StatusCode::from_u16(status).expect("valid status");
            HttpResponse::build(status)
                .content_type("application/json")
                .body(body)
        }
        MockReply::Sse(body) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .body(body),
        MockReply::Chunks(chunks) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .streaming(futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
            )),
        MockReply::Hang(chunks) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .streaming(
                futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
                )
                .chain(futures::stream::pending()),
            ),
        MockReply::Stall(duration) => {
            actix_web::rt::time::sleep(duration).await;
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .body(sse_body(&[], true))
        }
    }
}
