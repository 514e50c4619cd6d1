use crate::io_struct::ChatReqInput;
use crate::relay_state::{RelayConfig, RelayState};
use actix_cors::Cors;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use serde_json::json;
use std::io::Write;

const INVALID_MESSAGE: &str = "Message is required";
const LOGGED_MESSAGE_CHARS: usize = 50;
const CORS_MAX_AGE_SECS: usize = 3600;

#[post("/api/chat")]
pub async fn chat(req: web::Json<ChatReqInput>, app_state: web::Data<RelayState>) -> HttpResponse {
    let Some(message) = req.message() else {
        log::warn!("Rejected chat request: invalid message");
        return HttpResponse::BadRequest().json(json!({ "error": INVALID_MESSAGE }));
    };
    let session_id = req.session_id();
    log::info!(
        "Received message from session {}: \"{}\"",
        session_id,
        preview(message)
    );
    app_state.chat(session_id, message).await
}

#[get("/api/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected chat request body: {}", err);
    let response = HttpResponse::BadRequest().json(json!({ "error": INVALID_MESSAGE }));
    InternalError::from_response(err, response).into()
}

/// Routes and extractor config shared by the server and tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(chat)
        .service(health);
}

/// Any origin may call the API; the browser UI is served separately.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allow_any_method()
        .allow_any_header()
        .max_age(CORS_MAX_AGE_SECS)
}

fn preview(message: &str) -> String {
    match message.char_indices().nth(LOGGED_MESSAGE_CHARS) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();
}

/// Route panics through the logger. actix restarts a worker that panics, so
/// the process keeps serving.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        log::error!("Uncaught panic at {}: {}", location, info);
    }));
}

pub async fn startup(config: RelayConfig, relay_state: RelayState) -> std::io::Result<()> {
    let app_state = web::Data::new(relay_state);

    log::info!("Starting server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(cors())
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .workers(config.workers.max(1))
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}
