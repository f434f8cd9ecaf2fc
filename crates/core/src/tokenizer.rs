//! Thin tokenization facade over the engine model, shared by the
//! processor's submit path and by frontend endpoints.

use std::sync::Arc;

use crate::engine::{EngineError, Model, TokenId};

#[derive(Clone)]
pub struct Tokenizer {
    model: Arc<dyn Model>,
}

impl Tokenizer {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    pub fn encode(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError> {
        self.model.tokenize(text, add_special, parse_special)
    }

    pub fn decode(&self, tokens: &[TokenId], parse_special: bool) -> String {
        self.model.detokenize(tokens, parse_special)
    }

    /// Decode with an upper bound on the rendered byte length, truncated
    /// at a character boundary.
    pub fn decode_bounded(&self, tokens: &[TokenId], max_bytes: usize, parse_special: bool) -> String {
        let mut text = self.decode(tokens, parse_special);
        if text.len() > max_bytes {
            let mut cut = max_bytes;
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        text
    }

    pub fn is_eog(&self, token: TokenId) -> bool {
        self.model.is_eog(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockModel;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new(Arc::new(MockModel::new()))
    }

    #[test]
    fn encode_decode_roundtrip() {
        let tok = tokenizer();
        let text = "Hello, world!";
        let ids = tok.encode(text, false, false).expect("encode");
        assert!(!ids.is_empty());
        assert_eq!(tok.decode(&ids, false), text);
    }

    #[test]
    fn roundtrip_preserves_utf8() {
        let tok = tokenizer();
        let text = "héllo 😀";
        let ids = tok.encode(text, false, false).expect("encode");
        assert_eq!(tok.decode(&ids, false), text);
    }

    #[test]
    fn add_special_prepends_bos() {
        let tok = tokenizer();
        let model = MockModel::new();
        let ids = tok.encode("x", true, false).expect("encode");
        assert_eq!(ids[0], model.bos());
    }

    #[test]
    fn bounded_decode_respects_char_boundaries() {
        let tok = tokenizer();
        // 'é' is two bytes; a 3-byte budget cannot split it.
        let ids = tok.encode("aéb", false, false).expect("encode");
        let text = tok.decode_bounded(&ids, 2, false);
        assert_eq!(text, "a");
        let text = tok.decode_bounded(&ids, 3, false);
        assert_eq!(text, "aé");
    }

    #[test]
    fn eog_detection() {
        let tok = tokenizer();
        let model = MockModel::new();
        assert!(tok.is_eog(model.eos()));
        assert!(tok.is_eog(model.eot()));
        assert!(!tok.is_eog(b'a' as TokenId));
    }
}
