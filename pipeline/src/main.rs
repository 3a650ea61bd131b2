mod atlas;
mod handlers;
mod quant;
mod run;
mod source;

use std::path::PathBuf;
use tilewatch_common::config::Config;
use tracing::{error, info};

use handlers::FrameHandler;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config
            .stream
            .source_path
            .as_deref()
            .or(config.stream.source_url.as_deref())
            .unwrap_or("?"),
        queue_capacity = config.stream.queue_capacity,
        "starting tilewatch pipeline"
    );

    // A font asset that does not quantize cleanly would silently degrade
    // every future match, so a bad atlas halts startup.
    let atlas = match atlas::GlyphAtlas::build(&config.sprite) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to build glyph atlas");
            std::process::exit(1);
        }
    };
    info!(glyphs = atlas.len(), "glyph atlas ready");

    let quantizer = quant::Quantizer::new(&config.sprite.color_map);
    let engine = handlers::ocr::OcrEngine::new(atlas, quantizer);

    let mut chain: Vec<Box<dyn FrameHandler>> = vec![
        Box::new(handlers::extract::ScreenExtractor::new(config.screen.clone())),
        Box::new(handlers::ocr::OcrHandler::new(engine)),
        Box::new(handlers::timestamp::TimestampReader::new(
            config.timestamp.clone(),
        )),
    ];
    if let Some(compress) = &config.compress {
        match handlers::compress::ScreenCompressor::create(&compress.output) {
            Ok(h) => chain.push(Box::new(h)),
            Err(e) => {
                error!(path = compress.output, error = %e, "failed to open record stream");
                std::process::exit(1);
            }
        }
    }
    if let Some(textlog) = &config.textlog {
        match handlers::textlog::TextLog::create(&textlog.output) {
            Ok(h) => chain.push(Box::new(h)),
            Err(e) => {
                error!(path = textlog.output, error = %e, "failed to open text log");
                std::process::exit(1);
            }
        }
    }

    let (tx, rx) = tokio::sync::mpsc::channel(config.stream.queue_capacity);
    let stream_cfg = config.stream.clone();
    tokio::spawn(source::run_acquisition(stream_cfg, tx));

    run::process_frames(rx, chain, config.stream.ratelimit).await;
    info!("pipeline terminated");
}
