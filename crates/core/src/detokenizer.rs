//! Streaming token-to-text conversion that only ever emits complete
//! codepoints.
//!
//! Token pieces are byte strings and routinely split multi-byte UTF-8
//! sequences; the detokenizer buffers the incomplete tail until the
//! remaining bytes arrive.

use crate::engine::{Model, TokenId};

#[derive(Default)]
pub struct StreamingDetokenizer {
    buffer: Vec<u8>,
}

impl StreamingDetokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token and return the longest valid UTF-8 prefix of the
    /// accumulated bytes. May be empty while a codepoint is split across
    /// pieces.
    pub fn process_token(&mut self, model: &dyn Model, token: TokenId, parse_special: bool) -> String {
        let piece = model.token_to_piece(token, parse_special);
        self.push_bytes(&piece)
    }

    /// Raw-byte variant of [`process_token`](Self::process_token).
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        self.buffer.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buffer) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.buffer.clear();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.push_str(
                        std::str::from_utf8(&self.buffer[..valid_len]).unwrap_or_default(),
                    );
                    match err.error_len() {
                        // Incomplete sequence at the tail: keep it buffered.
                        None => {
                            self.buffer.drain(..valid_len);
                            break;
                        }
                        // Invalid bytes mid-stream: replace and move on.
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.buffer.drain(..valid_len + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Drain whatever is still buffered, lossily. Called at slot
    /// termination so a trailing fragment is not dropped.
    pub fn flush(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        out
    }

    pub fn has_incomplete(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
