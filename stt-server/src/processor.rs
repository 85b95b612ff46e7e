use shared_protocol::{Word, SAMPLE_RATE};

use crate::hypothesis::HypothesisBuffer;
use crate::recognizer::Recognizer;

/// Fixed trimming threshold (seconds) for completed segments.
///
/// 15s bounds worst-case retranscription work per chunk; lower values cut
/// latency, higher values cut CPU/memory. Kept internal, not a runtime
/// option, so protocol timing stays deterministic across deployments.
pub(crate) const SEGMENT_TRIM_SEC: f64 = 15.0;

/// Maximum length (characters, including separating spaces) of the prompt
/// built from previously committed, already-trimmed text.
const MAX_PROMPT_CHARS: usize = 200;

/// An emitted output interval, or nothing if there was nothing to flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Flush {
    pub begin: f64,
    pub end: f64,
    pub text: String,
}

fn to_flush(words: &[Word], separator: &str) -> Option<Flush> {
    let (first, last) = (words.first()?, words.last()?);
    Some(Flush {
        begin: first.start,
        end: last.end,
        text: words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(separator),
    })
}

/// Owns the audio window and absolute time offset for one connection, and
/// drives the recognizer + hypothesis buffer across successive calls.
pub struct StreamingProcessor<R: Recognizer> {
    recognizer: R,
    audio: Vec<f32>,
    offset: f64,
    hypothesis: HypothesisBuffer,
    committed: Vec<Word>,
}

impl<R: Recognizer> StreamingProcessor<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            audio: Vec::new(),
            offset: 0.0,
            hypothesis: HypothesisBuffer::new(0.0),
            committed: Vec::new(),
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn window_duration(&self) -> f64 {
        self.audio.len() as f64 / SAMPLE_RATE as f64
    }

    pub fn committed(&self) -> &[Word] {
        &self.committed
    }

    pub fn insert_audio(&mut self, samples: &[f32]) {
        self.audio.extend_from_slice(samples);
    }

    /// Returns `(prompt, context)`: up to 200 chars of already-trimmed
    /// committed text (newest-first, then reversed) to prime the
    /// recognizer, and the still-in-window committed text kept only for
    /// logging.
    fn prompt(&self) -> (String, String) {
        let k = self
            .committed
            .iter()
            .position(|w| w.end > self.offset)
            .unwrap_or(self.committed.len());

        let mut prompt_words = Vec::new();
        let mut len = 0usize;
        for w in self.committed[..k].iter().rev() {
            len += w.text.len() + 1;
            if len > MAX_PROMPT_CHARS {
                break;
            }
            prompt_words.push(w.text.as_str());
        }
        prompt_words.reverse();

        let sep = self.recognizer.separator();
        let prompt = prompt_words.join(sep);
        let context = self.committed[k..]
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(sep);
        (prompt, context)
    }

    /// Runs one recognizer pass over the current window, updates the
    /// hypothesis buffer and committed log, trims if the window has grown
    /// past `SEGMENT_TRIM_SEC`, and returns the newly committed text (if
    /// any) ready to send.
    pub fn process_iter(&mut self) -> anyhow::Result<Option<Flush>> {
        let (prompt, context) = self.prompt();
        tracing::debug!(%prompt, %context, window_s = self.window_duration(), offset = self.offset, "transcribing");

        let hyp = self.recognizer.transcribe(&self.audio, &prompt)?;

        self.hypothesis.insert(&hyp.words, self.offset);
        let commit = self.hypothesis.flush();
        self.committed.extend(commit.iter().cloned());

        if self.window_duration() > SEGMENT_TRIM_SEC {
            self.chunk_completed_segment(&hyp.segment_ends);
        }

        Ok(to_flush(&commit, self.recognizer.separator()))
    }

    fn chunk_completed_segment(&mut self, segment_ends: &[f64]) {
        let Some(t) = self.committed.last().map(|w| w.end) else {
            return;
        };

        let mut ends: Vec<f64> = segment_ends.iter().map(|e| e + self.offset).collect();
        if ends.len() <= 1 {
            tracing::debug!("not enough segments to chunk");
            return;
        }

        let mut e = ends[ends.len() - 2];
        while ends.len() > 2 && e > t {
            ends.pop();
            e = ends[ends.len() - 2];
        }

        if e <= t {
            tracing::debug!(at = e, "segment chunked");
            self.chunk_at(e);
        } else {
            tracing::debug!("last segment not within committed area");
        }
    }

    fn chunk_at(&mut self, t: f64) {
        self.hypothesis.pop_committed(t);
        let drop_samples = (((t - self.offset) * SAMPLE_RATE as f64) as usize).min(self.audio.len());
        self.audio.drain(0..drop_samples);
        self.offset = t;
    }

    /// Flushes whatever the hypothesis buffer still holds unconfirmed, and
    /// advances `offset` past the remaining window. Call once, at EOF.
    pub fn finish(mut self) -> Option<Flush> {
        let tail = self.hypothesis.complete();
        let result = to_flush(&tail, self.recognizer.separator());
        self.offset += self.window_duration();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::ScriptedRecognizer;
    use shared_protocol::Word;

    fn w(start: f64, end: f64, text: &str) -> Word {
        Word::new(start, end, text)
    }

    fn silence(seconds: f64) -> Vec<f32> {
        vec![0.0; (seconds * SAMPLE_RATE as f64) as usize]
    }

    #[test]
    fn silence_emits_nothing() {
        let recognizer = ScriptedRecognizer::new(vec![(vec![], vec![])], " ");
        let mut proc = StreamingProcessor::new(recognizer);
        proc.insert_audio(&silence(2.0));
        let out = proc.process_iter().unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn stable_word_commits_on_second_matching_run() {
        let recognizer = ScriptedRecognizer::new(
            vec![
                (vec![w(0.2, 0.5, "hello")], vec![0.5]),
                (
                    vec![w(0.2, 0.5, "hello"), w(1.6, 1.9, "world")],
                    vec![0.5, 1.9],
                ),
            ],
            " ",
        );
        let mut proc = StreamingProcessor::new(recognizer);

        proc.insert_audio(&silence(1.5));
        assert!(proc.process_iter().unwrap().is_none());

        proc.insert_audio(&silence(1.5));
        let out = proc.process_iter().unwrap().unwrap();
        assert_eq!(out.begin, 0.2);
        assert_eq!(out.end, 0.5);
        assert_eq!(out.text, "hello");
    }

    #[test]
    fn revision_keeps_only_the_agreeing_prefix_and_flushes_the_rest_on_finish() {
        let recognizer = ScriptedRecognizer::new(
            vec![
                (vec![w(0.0, 0.3, "foo"), w(0.4, 0.6, "bar")], vec![0.3, 0.6]),
                (vec![w(0.0, 0.3, "foo"), w(0.4, 0.6, "baz")], vec![0.3, 0.6]),
            ],
            " ",
        );
        let mut proc = StreamingProcessor::new(recognizer);
        proc.insert_audio(&silence(1.0));
        assert!(proc.process_iter().unwrap().is_none());

        proc.insert_audio(&silence(1.0));
        let out = proc.process_iter().unwrap().unwrap();
        assert_eq!(out.text, "foo");

        let tail = proc.finish().unwrap();
        assert_eq!(tail.text, "baz");
    }

    #[test]
    fn prompt_only_pulls_from_trimmed_committed_text() {
        let recognizer = ScriptedRecognizer::new(vec![(vec![], vec![])], " ");
        let mut proc = StreamingProcessor::new(recognizer);
        proc.committed.push(w(0.0, 1.0, "alpha"));
        proc.committed.push(w(1.0, 2.0, "beta"));
        proc.offset = 1.5; // "alpha" and part of "beta" already scrolled out

        let (prompt, context) = proc.prompt();
        assert_eq!(prompt, "alpha");
        assert_eq!(context, "beta");
    }

    #[test]
    fn non_overlap_is_enforced_by_the_caller_using_last_end() {
        // The processor itself reports raw (begin, end); non-overlap
        // clamping against last_end is the server's `send_result`
        // responsibility (see server.rs), exercised there.
        let recognizer = ScriptedRecognizer::new(
            vec![(vec![w(1.48, 1.60, "x")], vec![1.60])],
            " ",
        );
        let mut proc = StreamingProcessor::new(recognizer);
        proc.insert_audio(&silence(2.0));
        let out = proc.process_iter().unwrap();
        assert!(out.is_none()); // first run, nothing confirmed yet
    }
}
