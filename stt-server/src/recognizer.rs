use shared_protocol::Word;

/// A recognizer result: relative-timed words plus the recognizer's internal
/// segment boundaries, both relative to the start of the audio window that
/// produced them.
pub struct Hypothesis {
    pub words: Vec<Word>,
    pub segment_ends: Vec<f64>,
}

/// The external collaborator the streaming processor drives. Must be safe
/// to call repeatedly on overlapping, growing windows; any model-internal
/// state (e.g. a reusable decoder state) is the implementation's own
/// concern, not the processor's.
pub trait Recognizer {
    /// Transcribes `audio` (mono float32 @ 16kHz) using `prompt` as prior
    /// context. May take seconds.
    fn transcribe(&mut self, audio: &[f32], prompt: &str) -> anyhow::Result<Hypothesis>;

    /// Join string for committed words when building prompts: `""` when the
    /// recognizer's tokens already carry leading whitespace, `" "` otherwise.
    fn separator(&self) -> &'static str;
}

/// `whisper-rs`-backed recognizer. Model loading, GPU selection, and warmup
/// are the caller's responsibility (see `main::load_recognizer`); this type
/// only owns a loaded context and a reusable decode state.
pub struct WhisperRsRecognizer {
    ctx: std::sync::Arc<whisper_rs::WhisperContext>,
    state: whisper_rs::WhisperState,
    language: Option<String>,
    translate: bool,
}

impl WhisperRsRecognizer {
    pub fn new(
        ctx: std::sync::Arc<whisper_rs::WhisperContext>,
        language: Option<String>,
        translate: bool,
    ) -> anyhow::Result<Self> {
        let state = ctx.create_state()?;
        Ok(Self {
            ctx,
            state,
            language,
            translate,
        })
    }
}

impl Recognizer for WhisperRsRecognizer {
    fn transcribe(&mut self, audio: &[f32], prompt: &str) -> anyhow::Result<Hypothesis> {
        use whisper_rs::{FullParams, SamplingStrategy};

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(self.language.as_deref());
        params.set_translate(self.translate);
        params.set_token_timestamps(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_no_context(true);
        if !prompt.is_empty() {
            params.set_initial_prompt(prompt);
        }

        self.state.full(params, audio)?;

        let n_segments = self.state.full_n_segments();
        let mut words = Vec::new();
        let mut segment_ends = Vec::new();

        for i in 0..n_segments {
            let Some(segment) = self.state.get_segment(i) else {
                continue;
            };
            segment_ends.push(segment.end_timestamp() as f64 / 100.0);

            if segment.no_speech_probability() > 0.9 {
                continue; // trim candidates still need this boundary; words don't
            }

            let n_tokens = segment.n_tokens();
            for j in 0..n_tokens {
                let Some(token) = segment.get_token(j) else {
                    continue;
                };
                let data = token.token_data();
                if token.token_id() >= self.ctx.token_eot() {
                    continue; // special/control tokens carry no transcript text
                }
                let text = token.to_str_lossy()?.to_string();
                if text.trim().is_empty() {
                    continue;
                }
                words.push(Word::new(
                    data.t0 as f64 / 100.0,
                    data.t1 as f64 / 100.0,
                    text,
                ));
            }
        }

        Ok(Hypothesis {
            words,
            segment_ends,
        })
    }

    fn separator(&self) -> &'static str {
        "" // whisper-rs tokens already carry leading whitespace
    }
}

/// Test/offline double: replays a fixed sequence of hypotheses, one per
/// call, ignoring the audio and prompt. The last scripted run repeats once
/// `transcribe` is called more times than there are runs.
#[cfg(test)]
pub struct ScriptedRecognizer {
    runs: Vec<Hypothesis>,
    next: usize,
    separator: &'static str,
}

#[cfg(test)]
impl ScriptedRecognizer {
    pub fn new(runs: Vec<(Vec<Word>, Vec<f64>)>, separator: &'static str) -> Self {
        let runs = runs
            .into_iter()
            .map(|(words, segment_ends)| Hypothesis {
                words,
                segment_ends,
            })
            .collect();
        Self {
            runs,
            next: 0,
            separator,
        }
    }
}

#[cfg(test)]
impl Recognizer for ScriptedRecognizer {
    fn transcribe(&mut self, _audio: &[f32], _prompt: &str) -> anyhow::Result<Hypothesis> {
        let idx = self.next.min(self.runs.len().saturating_sub(1));
        let hyp = self.runs.get(idx).map_or(
            Hypothesis {
                words: Vec::new(),
                segment_ends: Vec::new(),
            },
            |h| Hypothesis {
                words: h.words.clone(),
                segment_ends: h.segment_ends.clone(),
            },
        );
        self.next += 1;
        Ok(hyp)
    }

    fn separator(&self) -> &'static str {
        self.separator
    }
}
