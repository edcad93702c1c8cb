//! NEARPAY Node Binary

use clap::{Parser, Subcommand};
use nearpay_core::{NodeConfig, Transaction};
use nearpay_node::NodeBuilder;
use nearpay_p2p::{send_payment, Payment};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nearpay-node")]
#[command(about = "NEARPAY Node - Short-range payment submission")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept payments until interrupted
    Listen {
        /// Listen address, overrides the configuration file
        #[arg(long)]
        addr: Option<String>,

        /// Note attached to every acknowledgment
        #[arg(long)]
        ack_memo: Option<String>,
    },

    /// Send a payment to a listening node
    Send {
        /// Address of the receiving node
        #[arg(long)]
        addr: SocketAddr,

        /// Hex-encoded transaction, may be repeated
        #[arg(long = "tx", required = true)]
        transactions: Vec<String>,

        /// Hex-encoded payment context
        #[arg(long, default_value = "")]
        context: String,

        /// Note for the receiver
        #[arg(long)]
        memo: Option<String>,
    },

    /// Write the default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    init_logging(&config.log_level);

    match cli.command {
        Commands::Listen { addr, ack_memo } => {
            let mut builder = NodeBuilder::new().config(config);

            if let Some(addr) = addr {
                builder = builder.listen_addr(&addr);
            }
            if ack_memo.is_some() {
                builder = builder.ack_memo(ack_memo);
            }

            let summary = builder.build().start().await?;
            info!("Relayed {} transactions", summary.relayed);
        }

        Commands::Send {
            addr,
            transactions,
            context,
            memo,
        } => {
            let transactions = transactions
                .iter()
                .map(|raw| Transaction::from_hex(raw))
                .collect::<Result<Vec<_>, _>>()?;

            let mut payment = Payment::new(hex::decode(&context)?, transactions);
            if let Some(memo) = memo {
                payment = payment.with_memo(memo);
            }

            let client_config = config.client.clone();
            let answer = tokio::task::spawn_blocking(move || {
                send_payment(addr, &payment, &client_config)
            })
            .await??;

            match answer {
                Some(ack) => {
                    println!("Payment acknowledged");
                    if let Some(memo) = ack.memo {
                        println!("Memo: {}", memo);
                    }
                }
                None => println!("Payment refused (no acknowledgment)"),
            }
        }

        Commands::Config { output } => {
            config.save(&output)?;
            println!("Configuration saved to: {}", output.display());
        }
    }

    Ok(())
}
