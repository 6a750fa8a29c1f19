use anyhow::{bail, Context};
use clap::Parser;
use radiocast::pauser::{DEFAULT_PAUSE_TICK, DEFAULT_PAUSE_TIMEOUT};
use radiocast::{
    AppState, AutoPauser, Credentials, FfmpegSegmenter, HttpTrackFetcher, Radio, StationClient,
    Stream,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "radiocast", version, about = "HLS radio gateway for a track-delivery API")]
struct Cli {
    /// Upstream account username (or e-mail address)
    #[arg(short = 'u', long)]
    username: String,

    /// Upstream account password
    #[arg(short = 'p', long)]
    password: String,

    /// Base URL of the track-delivery API
    #[arg(long)]
    api_base: String,

    /// HTTP listening port
    #[arg(short = 'P', long, default_value_t = 8080)]
    port: u16,

    /// Stations to expose, as "display_name:music_token" (repeatable)
    #[arg(short = 's', long = "station", value_parser = parse_station)]
    stations: Vec<StationSpec>,

    /// Name of the default station
    #[arg(short = 'd', long)]
    default_station: Option<String>,

    /// Segmenter command
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,
}

#[derive(Debug, Clone)]
struct StationSpec {
    name: String,
    music_token: String,
}

fn parse_station(value: &str) -> Result<StationSpec, String> {
    match value.split_once(':') {
        Some((name, token)) if !name.is_empty() && !token.is_empty() => Ok(StationSpec {
            name: name.to_string(),
            music_token: token.to_string(),
        }),
        _ => Err("expected \"display_name:music_token\"".to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radiocast=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.stations.is_empty() {
        bail!("missing station definitions (-s name:token)");
    }

    let segmenter = FfmpegSegmenter::new().with_command(&cli.ffmpeg);
    if !segmenter.installed() {
        bail!("{} not installed or cannot be found", cli.ffmpeg);
    }

    let client = Arc::new(
        StationClient::connect(
            cli.api_base.clone(),
            Credentials {
                username: cli.username.clone(),
                password: cli.password.clone(),
            },
        )
        .await
        .context("upstream login failed")?,
    );

    let (report_tx, mut report_rx) = mpsc::channel(16);
    let mut radios = HashMap::new();

    for spec in &cli.stations {
        let station_id = client
            .create_station(&spec.music_token)
            .await
            .with_context(|| format!("station creation failed for {}", spec.name))?;

        let fetcher = Arc::new(HttpTrackFetcher::new(segmenter.clone())?);
        let name = spec.name.clone();
        let stream = Stream::builder(station_id, client.clone(), fetcher)
            .uri_rewriter(move |track, index| {
                format!("/stations/{name}/tracks/{track}/segments/{index}.ts")
            })
            .build();

        stream
            .start(report_tx.clone())
            .await
            .with_context(|| format!("failed to start stream for {}", spec.name))?;

        let (pauser, handle) = AutoPauser::new(
            Arc::new(stream.clone()),
            DEFAULT_PAUSE_TIMEOUT,
            DEFAULT_PAUSE_TICK,
        );
        let pauser_report = report_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = pauser.run().await {
                let _ = pauser_report.send(err).await;
            }
        });

        info!(station = %spec.name, stream = %stream.id(), "station ready");
        radios.insert(spec.name.clone(), Radio {
            stream,
            pauser: handle,
        });
    }

    let default_station = cli
        .default_station
        .clone()
        .or_else(|| cli.stations.first().map(|s| s.name.clone()));
    let state = Arc::new(AppState::new(radios, default_station));
    let router = radiocast::server::router(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!(%addr, "listening");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!(%err, "http server terminated");
        }
    });

    if let Some(err) = report_rx.recv().await {
        error!(%err, "fatal stream error");
        bail!("fatal stream error: {err}");
    }
    Ok(())
}
