//! promptrelay - streaming chat-completion relay
//!
//! Forwards chat requests to an upstream provider with a pooled credential
//! and streams the generated text back, answering known demo prompts locally.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptrelay::config::Config;
use promptrelay::intercept::Interceptor;

#[derive(Parser)]
#[command(name = "promptrelay")]
#[command(about = "Streaming chat-completion relay with credential pooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// List the effective interception rules in evaluation order
    Rules {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("promptrelay={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Shorten long canned text for one-line listing.
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);

            tracing::info!(config = %config, key_source = %key_source, "Loaded configuration");
            for warning in cfg.warnings() {
                tracing::warn!("{}", warning);
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            promptrelay::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let (cfg, key_source) = Config::from_file_with_env(&config)?;
            let interceptor = Interceptor::from_config(&cfg.interceptor)?;

            println!("Configuration OK: {}", config);
            println!("  listen:        {}", cfg.server.listen);
            println!("  upstream:      {}", cfg.upstream.endpoint());
            println!("  timeout:       {}ms", cfg.upstream.timeout_ms);
            println!("  default key:   {}", key_source);
            println!(
                "  password gate: {}",
                if cfg.auth.required_password().is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!("  intercept:     {} rules", interceptor.len());
            for warning in cfg.warnings() {
                println!("  warning:       {}", warning);
            }
            Ok(())
        }

        Commands::Rules { config } => {
            init_tracing("warn");
            let (cfg, _) = Config::from_file_with_env(&config)?;
            let interceptor = Interceptor::from_config(&cfg.interceptor)?;

            for (index, rule) in interceptor.rules().iter().enumerate() {
                println!("{:>3}. {}", index + 1, preview(&rule.needle, 60));
                println!("     -> {}", preview(&rule.response, 72));
            }
            Ok(())
        }
    }
}
