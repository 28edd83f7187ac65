//! HTTP server for the scoped query API.
//! Plain tokio sockets; request parsing and routing live in `edu_query::api`.

use edu_query::api::{handle_request, read_request, HttpResponse};
use edu_query::config::AppConfig;
use edu_query::QueryAssistant;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Budget for receiving one whole request.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if config.openai_api_key.is_some() {
        info!("OpenAI API key found, natural-language questions go to {}", config.openai_model);
    } else {
        warn!("OpenAI API key not found, questions are answered from keyword templates");
    }

    let assistant = Arc::new(QueryAssistant::from_config(&config)?);
    info!(
        "Loaded {} users, filter strategy {:?}",
        assistant.users().len(),
        assistant.filter_strategy()
    );

    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Server listening on http://{}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&assistant)));
    }
}

async fn handle_connection(mut stream: TcpStream, assistant: Arc<QueryAssistant>) {
    let response = match read_request(&mut stream, READ_TIMEOUT).await {
        Ok(Some(request)) => handle_request(&assistant, &request).await,
        Ok(None) => HttpResponse::json(400, &serde_json::json!({"error": "Malformed request"})),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            HttpResponse::json(413, &serde_json::json!({"error": e.to_string()}))
        }
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            warn!("Dropping stalled client: {}", e);
            HttpResponse::json(408, &serde_json::json!({"error": e.to_string()}))
        }
        Err(e) => {
            warn!("Failed to read request: {}", e);
            return;
        }
    };

    if let Err(e) = stream.write_all(response.to_http().as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}
