//! TIPJAR Bot Entry Point
//!
//! Reads inbound events as JSON lines from stdin and writes replies to
//! stdout through the console gateway. Stops on end of input or Ctrl-C.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use tipjar_bot::{bootstrap, handle_event, init_tracing, BotConfig, ConsoleGateway, InboundEvent, StartupError};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = BotConfig::from_env();
    init_tracing(config.log_format)?;

    let bot = bootstrap(&config, Arc::new(ConsoleGateway::new()))?;
    tracing::info!("TIPJAR bot ready; reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match InboundEvent::parse(&line) {
                    Ok(event) => {
                        handle_event(&bot, &event).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed event"),
                },
                Ok(None) => {
                    tracing::info!("End of input");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    let population = bot.shutdown().await;
    tracing::info!(
        populated = population.populated,
        superseded = population.superseded,
        failures = population.failures,
        purged = population.purged,
        "Shutdown complete"
    );
    Ok(())
}
