use std::collections::HashMap;
use std::sync::Mutex;

use dispatch_core::types::{DialogId, ResponderId};

/// Per-(dialog, responder) ordered buffer of user text fragments (§4.2).
///
/// Volatile — intended for debounce aggregation only, never persisted
/// directly (the drained, joined text is what gets persisted, by the
/// caller, as a `TranscriptEntry`).
#[derive(Default)]
pub struct AskAccumulator {
    buffers: Mutex<HashMap<(DialogId, ResponderId), Vec<String>>>,
}

impl AskAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `ask` to the buffer for `(dialog_id, responder_id)` if doing so
    /// would keep the total code-point count at or under `limit`.
    ///
    /// Whitespace is trimmed first; an empty (or all-whitespace) fragment is
    /// a no-op that still reports success — nothing to accumulate, nothing
    /// rejected.
    pub fn push(
        &self,
        dialog_id: DialogId,
        responder_id: ResponderId,
        ask: &str,
        limit: u32,
    ) -> bool {
        let trimmed = ask.trim();
        if trimmed.is_empty() {
            return true;
        }

        let mut buffers = self.buffers.lock().unwrap();
        let key = (dialog_id, responder_id);
        let existing = buffers.entry(key.clone()).or_default();

        let sum: usize = existing.iter().map(|s| s.chars().count()).sum();
        let incoming = trimmed.chars().count();
        if sum + incoming > limit as usize {
            return false;
        }

        existing.push(trimmed.to_string());
        true
    }

    /// Remove and return the accumulated fragments for `(dialog_id, responder_id)`.
    pub fn drain(&self, dialog_id: DialogId, responder_id: ResponderId) -> Vec<String> {
        let mut buffers = self.buffers.lock().unwrap();
        buffers.remove(&(dialog_id, responder_id)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(n: u64) -> DialogId {
        DialogId(n)
    }
    fn r(s: &str) -> ResponderId {
        ResponderId(s.to_string())
    }

    #[test]
    fn empty_and_whitespace_push_is_a_no_op_success() {
        let acc = AskAccumulator::new();
        assert!(acc.push(d(1), r("a"), "", 10));
        assert!(acc.push(d(1), r("a"), "   ", 10));
        assert!(acc.drain(d(1), r("a")).is_empty());
    }

    #[test]
    fn push_accumulates_up_to_limit() {
        let acc = AskAccumulator::new();
        assert!(acc.push(d(1), r("a"), "aa", 5)); // 2
        assert!(acc.push(d(1), r("a"), "bb", 5)); // 4
        assert!(acc.push(d(1), r("a"), "c", 5)); // 5 == limit, ok
        assert!(!acc.push(d(1), r("a"), "d", 5)); // 6 > limit, rejected
        assert_eq!(acc.drain(d(1), r("a")), vec!["aa", "bb", "c"]);
    }

    #[test]
    fn rejected_push_leaves_buffer_unchanged() {
        let acc = AskAccumulator::new();
        assert!(acc.push(d(1), r("a"), "12345", 5));
        assert!(!acc.push(d(1), r("a"), "x", 5));
        assert_eq!(acc.drain(d(1), r("a")), vec!["12345"]);
    }

    #[test]
    fn drain_removes_and_resets_the_buffer() {
        let acc = AskAccumulator::new();
        acc.push(d(1), r("a"), "hi", 10);
        assert_eq!(acc.drain(d(1), r("a")), vec!["hi"]);
        assert!(acc.drain(d(1), r("a")).is_empty());
    }

    #[test]
    fn code_points_not_bytes_are_counted() {
        let acc = AskAccumulator::new();
        // 3 multi-byte chars — 3 code points, well under a byte-based cap of 5
        // but would also pass here; the point is ensuring we count chars, not bytes.
        assert!(acc.push(d(1), r("a"), "日本語", 3));
        assert!(!acc.push(d(1), r("a"), "x", 3));
    }

    #[test]
    fn buffers_are_independent_per_dialog_and_responder() {
        let acc = AskAccumulator::new();
        acc.push(d(1), r("a"), "x", 10);
        acc.push(d(1), r("b"), "y", 10);
        acc.push(d(2), r("a"), "z", 10);
        assert_eq!(acc.drain(d(1), r("a")), vec!["x"]);
        assert_eq!(acc.drain(d(1), r("b")), vec!["y"]);
        assert_eq!(acc.drain(d(2), r("a")), vec!["z"]);
    }
}
