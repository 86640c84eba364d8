use anyhow::Context;
use binance_link::core::config::ExchangeConfig;
use binance_link::core::types::KlineInterval;
use binance_link::exchanges::binance::{build_streams, UpdateCategory};
use std::time::Duration;
use std::borrow::Cow;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Streams depth, klines and the user data stream for BTCUSDT and prints
/// what arrives. Credentials come from `BINANCE_API_KEY`/`BINANCE_SECRET_KEY`
/// or from the JSON key file named by `BINANCE_KEY_FILE`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("BINANCE_KEY_FILE") {
        Ok(path) => ExchangeConfig::from_key_file(&path)
            .with_context(|| format!("loading key file {}", path))?,
        Err(_) => load_env_config()?,
    };

    let (rest, streams) = build_streams(&config)?;

    match rest.sync_server_time().await {
        Ok(offset) => info!(offset_ms = offset, "Clock synchronised"),
        Err(e) => warn!("Could not sync server time: {}", e),
    }

    let mut updates = streams.subscribe();
    streams.open_depth("btcusdt")?;
    streams.open_klines("btcusdt", KlineInterval::Minutes1)?;
    streams.open_user_data()?;

    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update.category {
                    UpdateCategory::EndpointDataReceived => {
                        println!("{}", update.message.chars().take(120).collect::<String>());
                    }
                    category => {
                        debug!("{}", update.message);
                        let key = streams.listen_key();
                        let message = redact(&update.message, key.as_deref());
                        if category.is_error() {
                            warn!("{}", message);
                        } else {
                            info!("{}", message);
                        }
                    }
                }
            }
        }
    }

    for entry in streams.list_active() {
        info!(stream = %entry.identity, frames = entry.frames_received, "Active at shutdown");
    }
    streams.shutdown().await;
    Ok(())
}

/// Status messages name the listen key; show only its first 8 characters
fn redact<'a>(message: &'a str, listen_key: Option<&str>) -> Cow<'a, str> {
    match listen_key {
        Some(key) if key.len() > 8 && message.contains(key) => {
            Cow::Owned(message.replace(key, &format!("{}...", key.get(..8).unwrap_or(key))))
        }
        _ => Cow::Borrowed(message),
    }
}

#[cfg(feature = "env-file")]
fn load_env_config() -> anyhow::Result<ExchangeConfig> {
    ExchangeConfig::from_env_file("BINANCE").context("reading BINANCE_* credentials")
}

#[cfg(not(feature = "env-file"))]
fn load_env_config() -> anyhow::Result<ExchangeConfig> {
    ExchangeConfig::from_env("BINANCE").context("reading BINANCE_* credentials")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_listen_key() {
        let key = "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1";
        let message = format!("New listen key received. ({})", key);
        assert_eq!(redact(&message, Some(key)), "New listen key received. (pqia91ma...)");
        assert_eq!(redact("Keep alive.", Some(key)), "Keep alive.");
        assert_eq!(redact(&message, None), message);
    }
}
