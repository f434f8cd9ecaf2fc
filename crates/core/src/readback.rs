//! Streaming hand-off between the worker and the caller.
//!
//! A single-producer single-consumer queue of (text, token) frames plus a
//! one-shot status record. The worker appends and finalizes; the caller
//! polls. All access is serialized by one internal mutex, so the buffer
//! can sit inside a shared resource bundle without further coordination.

use std::sync::Mutex;

use crate::engine::TokenId;

#[derive(Default)]
struct Inner {
    frames: Vec<String>,
    ids: Vec<TokenId>,
    cursor: usize,
    finished: bool,
    status: Option<String>,
}

#[derive(Default)]
pub struct ReadbackBuffer {
    inner: Mutex<Inner>,
}

impl ReadbackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one frame. Writes after finalization are dropped; the
    /// status record is the last word.
    pub fn write(&self, text: &str, token: TokenId) {
        let mut inner = self.lock();
        if inner.finished {
            return;
        }
        inner.frames.push(text.to_string());
        inner.ids.push(token);
    }

    /// Record the final status and seal the buffer. First caller wins;
    /// later calls are no-ops, which makes finalization idempotent across
    /// the worker and the cancellation path.
    pub fn finish(&self, status: String) {
        let mut inner = self.lock();
        if inner.finished {
            return;
        }
        inner.finished = true;
        inner.status = Some(status);
    }

    /// Next unread frame, or `None` when the caller has caught up.
    pub fn read_next(&self) -> Option<(String, TokenId)> {
        let mut inner = self.lock();
        if inner.cursor >= inner.frames.len() {
            return None;
        }
        let frame = (inner.frames[inner.cursor].clone(), inner.ids[inner.cursor]);
        inner.cursor += 1;
        Some(frame)
    }

    pub fn read_status(&self) -> Option<String> {
        self.lock().status.clone()
    }

    /// Finished *and* fully drained.
    pub fn is_finished(&self) -> bool {
        let inner = self.lock();
        inner.finished && inner.cursor >= inner.frames.len()
    }

    /// Whether the status record has been written, regardless of unread
    /// frames.
    pub fn is_finalized(&self) -> bool {
        self.lock().finished
    }

    pub fn frames_written(&self) -> usize {
        self.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_read_in_write_order() {
        let buf = ReadbackBuffer::new();
        buf.write("a", 1);
        buf.write("b", 2);

        assert_eq!(buf.read_next(), Some(("a".to_string(), 1)));
        assert_eq!(buf.read_next(), Some(("b".to_string(), 2)));
        assert_eq!(buf.read_next(), None);
    }

    #[test]
    fn not_finished_until_status_and_drained() {
        let buf = ReadbackBuffer::new();
        buf.write("a", 1);
        assert!(!buf.is_finished());

        buf.finish("{}".to_string());
        // Status set but one frame still unread.
        assert!(!buf.is_finished());
        assert!(buf.is_finalized());

        buf.read_next();
        assert!(buf.is_finished());
    }

    #[test]
    fn status_visible_before_drain() {
        let buf = ReadbackBuffer::new();
        buf.write("a", 1);
        buf.finish("done".to_string());
        assert_eq!(buf.read_status().as_deref(), Some("done"));
    }

    #[test]
    fn first_finish_wins() {
        let buf = ReadbackBuffer::new();
        buf.finish("first".to_string());
        buf.finish("second".to_string());
        assert_eq!(buf.read_status().as_deref(), Some("first"));
    }

    #[test]
    fn writes_after_finish_are_dropped() {
        let buf = ReadbackBuffer::new();
        buf.write("kept", 1);
        buf.finish("{}".to_string());
        buf.write("dropped", 2);

        assert_eq!(buf.frames_written(), 1);
        assert_eq!(buf.read_next(), Some(("kept".to_string(), 1)));
        assert_eq!(buf.read_next(), None);
        assert!(buf.is_finished());
    }

    #[test]
    fn empty_buffer_finishes_immediately_after_status() {
        let buf = ReadbackBuffer::new();
        assert!(!buf.is_finished());
        buf.finish("{}".to_string());
        assert!(buf.is_finished());
    }
}
