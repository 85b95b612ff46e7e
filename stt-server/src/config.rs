use clap::{Parser, ValueEnum};
use shared_protocol::{DEFAULT_MAX_SINGLE_RECV_BYTES, PACKET_SIZE, SAMPLE_RATE};

use crate::error::StartupError;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Task {
    Transcribe,
    Translate,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Backend {
    FasterWhisper,
    OpenaiApi,
}

#[derive(Parser, Debug)]
#[command(name = "stt-server", about = "Streaming speech-to-text server")]
pub struct Args {
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    #[arg(long = "min-chunk-size", default_value_t = 1.0)]
    pub min_chunk_size: f64,

    #[arg(long, default_value = "large-v2")]
    pub model: String,

    #[arg(long = "lan", alias = "language", default_value = "auto")]
    pub lan: String,

    #[arg(long, value_enum, default_value_t = Task::Transcribe)]
    pub task: Task,

    #[arg(long, value_enum, default_value_t = Backend::FasterWhisper)]
    pub backend: Backend,

    #[arg(long, default_value_t = SAMPLE_RATE)]
    pub sampling_rate: u32,

    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,
}

/// Fully resolved, validated runtime configuration.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub min_chunk_size: f64,
    pub model: String,
    /// `None` means "auto" — language detection and an "en" output field.
    pub language: Option<String>,
    pub task: Task,
    pub backend: Backend,
    pub log_level: String,
    pub max_single_recv_bytes: usize,
    pub packet_size_bytes: usize,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, StartupError> {
        if args.sampling_rate != SAMPLE_RATE {
            return Err(StartupError::Config(format!(
                "sampling_rate must be {SAMPLE_RATE}, got {}",
                args.sampling_rate
            )));
        }
        if args.min_chunk_size <= 0.0 {
            return Err(StartupError::Config(
                "min_chunk_size must be positive".into(),
            ));
        }

        let language = match args.lan.as_str() {
            "" | "auto" => None,
            lan => Some(lan.to_string()),
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            min_chunk_size: args.min_chunk_size,
            model: args.model,
            language,
            task: args.task,
            backend: args.backend,
            log_level: args.log_level,
            max_single_recv_bytes: env_usize(
                "MAX_SINGLE_RECV_BYTES",
                DEFAULT_MAX_SINGLE_RECV_BYTES,
            )?,
            packet_size_bytes: env_usize("PACKET_SIZE_BYTES", PACKET_SIZE)?,
        })
    }

    /// Output `language` field per §6: the configured language, or "en" when
    /// auto-detecting or translating.
    pub fn output_language(&self) -> String {
        if self.task == Task::Translate {
            return "en".to_string();
        }
        self.language.clone().unwrap_or_else(|| "en".to_string())
    }
}

fn env_usize(var: &str, default: usize) -> Result<usize, StartupError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| StartupError::Config(format!("{var} must be a positive integer, got {raw:?}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(StartupError::Config(format!("{var} is not valid UTF-8")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["stt-server"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn auto_language_maps_to_none_and_en_output() {
        let cfg = Config::from_args(parse(&[])).unwrap();
        assert_eq!(cfg.language, None);
        assert_eq!(cfg.output_language(), "en");
    }

    #[test]
    fn explicit_language_is_kept_for_output() {
        let cfg = Config::from_args(parse(&["--lan", "de"])).unwrap();
        assert_eq!(cfg.language.as_deref(), Some("de"));
        assert_eq!(cfg.output_language(), "de");
    }

    #[test]
    fn translate_task_forces_english_output() {
        let cfg = Config::from_args(parse(&["--lan", "de", "--task", "translate"])).unwrap();
        assert_eq!(cfg.output_language(), "en");
    }

    #[test]
    fn rejects_non_16khz_sampling_rate() {
        let err = Config::from_args(parse(&["--sampling-rate", "8000"])).unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
    }
}
