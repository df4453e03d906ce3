//! bilibot main binary.

mod config;
mod sink;

use bili_client::{BiliClient, VideoFetcher};
use bili_core::{Analyzer, ContentFetch, GroupMessage, MediaDownload, ResolveShortLink};
use clap::{Parser, Subcommand};
use config::BotConfig;
use sink::ConsoleSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "bilibot", version, about = "Bilibili link analysis bot")]
struct Cli {
    /// Path to the config file. Default: ~/.bilibot/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one message as if it arrived in a group chat, printing the reply.
    Analyze {
        text: String,
        /// Conversation id the message is attributed to.
        #[arg(long, default_value_t = 0)]
        group: i64,
    },
    /// Recognize a content reference offline, without touching the network.
    Classify { text: String },
    /// Validate config and log the effective settings.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Analyze { text, group } => analyze(cli.config, group, text).await,
        Command::Classify { text } => {
            classify_offline(&text);
            Ok(())
        }
        Command::Doctor => doctor(cli.config).await,
    }
}

async fn analyze(config_path: Option<PathBuf>, group: i64, text: String) -> anyhow::Result<()> {
    let cfg = BotConfig::load(config_path).await?;
    let client = BiliClient::new(&cfg.analysis.cookie)?;

    let fetch: Arc<dyn ContentFetch> = Arc::new(client.clone());
    let resolver: Arc<dyn ResolveShortLink> = Arc::new(client.clone());
    let media: Option<Arc<dyn MediaDownload>> = if cfg.analysis.send_video {
        Some(Arc::new(VideoFetcher::new(
            client,
            &cfg.analysis.tmp_path,
            cfg.analysis.duration_sec_limit,
        )))
    } else {
        None
    };

    let analyzer = Analyzer::new(
        cfg.analyzer_config(),
        fetch,
        resolver,
        media,
        Arc::new(ConsoleSink),
    );

    analyzer
        .on_group_message(GroupMessage {
            conversation_id: group,
            text,
            received_at: chrono::Utc::now(),
        })
        .await;
    Ok(())
}

fn classify_offline(text: &str) {
    match bili_core::classify(text) {
        Some(hit) => {
            println!("type: {}", hit.content_type.as_str());
            println!("query: {}", hit.api_url);
            if let Some(cvid) = &hit.cvid {
                println!("cvid: {cvid}");
            }
        }
        None => println!("no match"),
    }
}

async fn doctor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let cfg = BotConfig::load(Some(path.clone())).await?;
    tracing::info!(
        config_path = %path.display(),
        enable = cfg.analysis.enable,
        skip_video_analysis = cfg.analysis.skip_video_analysis,
        display_image = cfg.analysis.display_image,
        send_video = cfg.analysis.send_video,
        duration_sec_limit = cfg.analysis.duration_sec_limit,
        tmp_path = %cfg.analysis.tmp_path,
        reanalysis_time_seconds = cfg.analysis.reanalysis_time_seconds,
        cookie_set = !cfg.analysis.cookie.is_empty(),
        "config ok"
    );
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,bilibot=debug,bili_core=debug,bili_client=debug"),
    };
    let log_format = std::env::var("BILIBOT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported BILIBOT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }
    Ok(())
}
