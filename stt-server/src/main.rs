mod config;
mod connection;
mod error;
mod framer;
mod hypothesis;
mod processor;
mod recognizer;
mod server;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use whisper_rs::{WhisperContext, WhisperContextParameters};

use config::{Args, Backend, Config};
use error::StartupError;
use recognizer::{Recognizer, WhisperRsRecognizer};
use shared_protocol::SAMPLE_RATE;

fn main() {
    let args = Args::parse();

    let config = match Config::from_args(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    if let Err(e) = run(config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), StartupError> {
    if config.backend != Backend::FasterWhisper {
        return Err(StartupError::Config(
            "only the faster-whisper-compatible whisper-rs backend is implemented".into(),
        ));
    }

    info!(model = %config.model, "loading whisper model");
    let ctx = load_model(&config.model).map_err(StartupError::Model)?;

    let language = config.language.clone();
    let translate = config.task == config::Task::Translate;

    warmup(&ctx, language.as_deref(), translate);

    server::run(config, move || -> anyhow::Result<WhisperRsRecognizer> {
        WhisperRsRecognizer::new(ctx.clone(), language.clone(), translate)
    })
}

/// Best-effort warm-up: runs one throwaway transcription over a couple of
/// seconds of silence so the first real client doesn't pay for lazy kernel
/// compilation / page-in. Not part of the engine's tested behavior; failures
/// are logged and otherwise ignored.
fn warmup(ctx: &Arc<WhisperContext>, language: Option<&str>, translate: bool) {
    let silence = vec![0.0f32; (SAMPLE_RATE as usize) * 2];
    match WhisperRsRecognizer::new(ctx.clone(), language.map(str::to_string), translate) {
        Ok(mut recognizer) => {
            if let Err(e) = recognizer.transcribe(&silence, "") {
                warn!(error = %e, "warm-up transcription failed, continuing anyway");
            } else {
                info!("warm-up transcription complete");
            }
        }
        Err(e) => warn!(error = %e, "could not create warm-up recognizer state"),
    }
}

fn load_model(path: &str) -> anyhow::Result<Arc<WhisperContext>> {
    let mut params = WhisperContextParameters::default();
    params.flash_attn(true);

    #[cfg(not(feature = "vulkan"))]
    info!("running on CPU");
    #[cfg(feature = "vulkan")]
    {
        info!("running with GPU acceleration (Vulkan)");
        params.use_gpu(true);
    }

    Ok(Arc::new(WhisperContext::new_with_params(path, params)?))
}
