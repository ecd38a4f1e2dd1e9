//! kafgate binary.
//!
//! `kafgate serve` runs the HTTP bridge; `kafgate echo` runs a Kafka
//! echo responder for manual end-to-end verification.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kafgate_connector::broker::{BrokerProducer as _, ReplyConsumer as _};
use kafgate_connector::kafka::{KafkaProducer, KafkaReplyConsumer};
use kafgate_connector::Connector;
use kafgate_core::config::{BridgeConfig, KafkaConfig};
use kafgate_core::message::Message;
use kafgate_core::serializer::SerializerRegistry;

/// HTTP request/reply bridge for Kafka.
#[derive(Parser)]
#[command(name = "kafgate")]
#[command(about = "HTTP request/reply bridge for Kafka")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge.
    Serve {
        /// Path to the configuration file.
        #[arg(short, long, value_name = "FILE", default_value = "kafgate.yaml")]
        config: PathBuf,

        /// Enable verbose logging.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Consume request envelopes from a topic and echo their payloads
    /// back on the reply topic, keyed alike.
    Echo {
        /// Kafka broker URL.
        #[arg(long)]
        url: String,

        /// Topic to listen on.
        #[arg(long)]
        topic: String,

        /// Topic to reply on.
        #[arg(long)]
        reply: String,

        /// Incoming topic partition.
        #[arg(long, default_value_t = 0)]
        partition: i32,

        /// Reply topic partition.
        #[arg(long = "reply-partition", default_value_t = 0)]
        reply_partition: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, verbose } => serve(config, verbose).await,
        Commands::Echo {
            url,
            topic,
            reply,
            partition,
            reply_partition,
        } => echo(url, topic, reply, partition, reply_partition).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug,hyper=info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

async fn serve(config_path: PathBuf, verbose: bool) -> anyhow::Result<()> {
    init_tracing(verbose);
    info!("kafgate starting");

    let config = BridgeConfig::load_from(&config_path)?;
    config.validate(&SerializerRegistry::with_builtins())?;

    info!(
        config = %config_path.display(),
        address = %config.server.http.address(),
        endpoints = config.endpoints.len(),
        "configuration loaded"
    );

    let connector = Arc::new(Connector::kafka(&config)?);

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel_on_signal.cancel();
    });

    if let Err(err) = kafgate_gateway::run(&config, Arc::clone(&connector), cancel).await {
        error!(error = %err, "gateway error");
        let _ = connector.close().await;
        return Err(err.into());
    }

    if let Err(err) = connector.close().await {
        error!(error = %err, "connector did not close cleanly");
    }

    info!("shutdown complete");
    Ok(())
}

async fn echo(
    url: String,
    topic: String,
    reply: String,
    partition: i32,
    reply_partition: i32,
) -> anyhow::Result<()> {
    init_tracing(false);

    let kafka = KafkaConfig {
        kafka_url: url,
        batch_size: Some(1),
        batch_timeout: None,
        reply_timeout: None,
    };

    let producer = KafkaProducer::new(&kafka)?;
    let mut consumer =
        KafkaReplyConsumer::connect(&kafka, &topic, partition, SystemTime::now())?;

    info!(topic = %topic, reply = %reply, "echo responder running");

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_on_signal.cancel();
    });

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            incoming = consumer.next() => {
                let record = match incoming {
                    Ok(record) => record,
                    Err(err) => {
                        error!(error = %err, "failed to read message");
                        continue;
                    }
                };

                info!(key = %record.key, bytes = record.payload.len(), "echoing");

                // Reply with the decoded envelope payload when the value
                // parses as one, the raw value otherwise.
                let response = match serde_json::from_slice::<Message>(&record.payload) {
                    Ok(envelope) => envelope.payload,
                    Err(_) => record.payload,
                };

                if let Err(err) = producer
                    .write(&reply, reply_partition, record.key.as_bytes(), &response)
                    .await
                {
                    error!(error = %err, "failed to publish echo reply");
                }
            }
        }
    }

    producer.close().await.ok();
    info!("echo responder stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
