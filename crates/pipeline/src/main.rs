//! gmf-pipeline: disease profile -> Synthea module CLI entrypoint.

use std::io::Write;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gmf_pipeline::agent::{ModuleAgent, ProfileAgent};
use gmf_pipeline::ai::{ClaudeClient, ModelBackend};
use gmf_pipeline::config::Config;
use gmf_pipeline::orchestrator::{AgentEvent, Orchestrator};
use gmf_pipeline::session::SessionState;
use gmf_pipeline::tools::ToolSet;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    let Some(api_key) = config.anthropic_api_key.clone() else {
        tracing::error!("ANTHROPIC_API_KEY not set; cannot run the pipeline");
        std::process::exit(1);
    };
    if config.ncbi_api_key.is_some() {
        tracing::info!("NCBI API key configured for PubMed requests");
    }
    tracing::info!(
        repair_attempts = config.repair_attempts,
        "Validate-repair loop configured"
    );

    // Wire the stages
    let backend: Arc<dyn ModelBackend> =
        Arc::new(ClaudeClient::new(api_key, config.model.clone()));
    let tools = Arc::new(ToolSet::new(&config));
    let orchestrator = Orchestrator::new(
        Box::new(ProfileAgent::new(backend.clone(), tools)),
        Box::new(ModuleAgent::new(backend, config.repair_attempts)),
    );

    let mut state = SessionState::new();
    tracing::info!(session = %state.id(), "Created session");

    println!("Disease profile + Synthea module pipeline (CLI mode). Type 'exit' to quit.\n");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush().expect("Failed to flush stdout");

        let input = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => break, // EOF
            Err(e) => {
                tracing::error!("Failed to read input: {e}");
                break;
            }
        };

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let (tx, mut rx) = mpsc::channel(64);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::ToolCall { stage, name, .. } => {
                        tracing::info!(stage, tool = %name, "Tool call");
                    }
                    AgentEvent::ToolResult {
                        stage,
                        name,
                        content,
                    } => {
                        tracing::debug!(stage, tool = %name, bytes = content.len(), "Tool result");
                    }
                    AgentEvent::Final { stage, .. } => {
                        tracing::debug!(stage, "Final emission");
                    }
                }
            }
        });

        let result = tokio::select! {
            result = orchestrator.run(&input, &mut state, tx) => Some(result),
            _ = shutdown_signal() => None,
        };
        let _ = printer.await;

        let Some(result) = result else {
            tracing::info!("Run cancelled by shutdown signal");
            break;
        };

        match result {
            Ok(module_json) => {
                println!("\nagent>");
                println!("{module_json}");
                println!();
            }
            Err(e) => {
                tracing::error!("Pipeline run failed: {e}");
            }
        }
    }

    println!("Bye!");
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, aborting current run");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, aborting current run");
        }
    }
}
