use shared_protocol::Word;

/// Maximum n-gram length considered when suppressing committed words that
/// reappear at the head of a fresh hypothesis after a trim.
const MAX_NGRAM: usize = 5;

/// The tail of the transcript still in flux: words seen but not yet
/// confirmed as stable across two consecutive recognizer runs.
///
/// A word commits only once it appears at the same position in two
/// consecutive hypotheses over overlapping windows (`insert` then `flush`).
/// This gives at-most-once emission with strong resistance to revision.
pub struct HypothesisBuffer {
    committed_in_buffer: Vec<Word>,
    buffer: Vec<Word>,
    new: Vec<Word>,
    last_committed_time: f64,
    last_committed_word: Option<String>,
}

impl HypothesisBuffer {
    pub fn new(start_offset: f64) -> Self {
        Self {
            committed_in_buffer: Vec::new(),
            buffer: Vec::new(),
            new: Vec::new(),
            last_committed_time: start_offset,
            last_committed_word: None,
        }
    }

    pub fn last_committed_word(&self) -> Option<&str> {
        self.last_committed_word.as_deref()
    }

    /// Rebases `words` onto the absolute timeline at `offset`, keeps only
    /// those past `last_committed_time - 0.1`, and suppresses a leading
    /// n-gram (1..=5 tokens) that duplicates the tail of the committed log.
    pub fn insert(&mut self, words: &[Word], offset: f64) {
        let rebased: Vec<Word> = words.iter().map(|w| w.rebased(offset)).collect();
        self.new = rebased
            .into_iter()
            .filter(|w| w.start > self.last_committed_time - 0.1)
            .collect();

        let Some(first) = self.new.first() else {
            return;
        };
        if (first.start - self.last_committed_time).abs() >= 1.0 {
            return;
        }
        if self.committed_in_buffer.is_empty() {
            return;
        }

        let cn = self.committed_in_buffer.len();
        let nn = self.new.len();
        let max_n = cn.min(nn).min(MAX_NGRAM);
        for i in 1..=max_n {
            let committed_tail = &self.committed_in_buffer[cn - i..];
            let new_head = &self.new[..i];
            if committed_tail.iter().map(|w| &w.text).eq(new_head.iter().map(|w| &w.text)) {
                tracing::debug!(n = i, "suppressing duplicate n-gram after trim");
                self.new.drain(..i);
                break;
            }
        }
    }

    /// Returns the longest common (by text) prefix between `new` and the
    /// previous insertion's tail (`buffer`), commits it, and rotates
    /// `buffer <- new`.
    pub fn flush(&mut self) -> Vec<Word> {
        let mut commit = Vec::new();
        while let Some(n) = self.new.first() {
            let Some(b) = self.buffer.first() else {
                break;
            };
            if n.text != b.text {
                break;
            }
            let n = self.new.remove(0);
            self.buffer.remove(0);
            self.last_committed_time = n.end;
            self.last_committed_word = Some(n.text.clone());
            commit.push(n);
        }
        self.buffer = std::mem::take(&mut self.new);
        self.committed_in_buffer.extend(commit.iter().cloned());
        commit
    }

    /// Drops committed words from the n-gram lookback window whose `end`
    /// has fallen at or before `t` (i.e., audio now trimmed away).
    pub fn pop_committed(&mut self, t: f64) {
        self.committed_in_buffer.retain(|w| w.end > t);
    }

    /// The tail proposed by the last insertion but never confirmed.
    pub fn complete(&self) -> Vec<Word> {
        self.buffer.clone()
    }
}
