use chat_relay::relay_state::{RelayConfig, RelayState};
use chat_relay::server;
use chat_relay::upstream::RetryConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local chat relay for an OpenAI-compatible completion API", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Host address to bind the server to")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000, help = "Port number to listen on")]
    port: u16,

    #[arg(long, default_value_t = 1, help = "Number of event-loop workers")]
    workers: usize,

    #[arg(
        long,
        default_value_t = 60,
        help = "Seconds without upstream activity before an attempt is abandoned"
    )]
    timeout: u64,

    #[arg(
        long,
        help = "Forward at most this many recent turns upstream (default: full history)"
    )]
    max_history_turns: Option<usize>,

    #[arg(long, help = "Secrets file with `... API Key = ...` and `... API endpoint = ...` lines")]
    secrets_file: Option<PathBuf>,

    #[arg(long, env = "CHAT_RELAY_API_KEY", hide_env_values = true, requires = "api_endpoint")]
    api_key: Option<String>,

    #[arg(long, env = "CHAT_RELAY_API_ENDPOINT", requires = "api_key")]
    api_endpoint: Option<String>,

    #[arg(long, default_value = "info", help = "Log level: error, warn, info, debug or trace")]
    log_level: log::LevelFilter,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            host: self.host,
            port: self.port,
            workers: self.workers,
            timeout: self.timeout,
            max_history_turns: self.max_history_turns,
            secrets_file: self.secrets_file,
            api_key: self.api_key,
            api_endpoint: self.api_endpoint,
            retry: RetryConfig::default(),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    server::init_logging(args.log_level);
    server::install_panic_hook();

    let config = args.into_config();
    let relay_state = RelayState::new(&config)?;
    server::startup(config, relay_state).await?;
    Ok(())
}
