//! Shared bundle of the per-request streaming resources.
//!
//! The caller creates the bundle, keeps one handle for reading, and hands
//! a second handle to the processor with the request. Whichever side
//! drops last frees the pair, so the worker can finalize a buffer whose
//! caller has already walked away, and vice versa.

use std::sync::{Arc, Mutex};

use crate::readback::ReadbackBuffer;
use crate::sampling::SamplerChain;

pub struct GenerationResources {
    readback: ReadbackBuffer,
    sampler: Mutex<Box<dyn SamplerChain>>,
}

impl GenerationResources {
    /// Bundle a fresh readback buffer with the caller's sampler chain.
    pub fn new(sampler: Box<dyn SamplerChain>) -> Arc<Self> {
        Arc::new(Self {
            readback: ReadbackBuffer::new(),
            sampler: Mutex::new(sampler),
        })
    }

    pub fn readback(&self) -> &ReadbackBuffer {
        &self.readback
    }

    /// Run `f` with exclusive access to the sampler chain. Only the
    /// worker samples, but the lock keeps the bundle uniformly shareable.
    pub fn with_sampler<R>(&self, f: impl FnOnce(&mut dyn SamplerChain) -> R) -> R {
        let mut guard = self.sampler.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TokenId;
    use crate::sampling::TokenCandidates;

    struct CountingChain(usize);

    impl SamplerChain for CountingChain {
        fn apply(&mut self, _candidates: &mut TokenCandidates) {
            self.0 += 1;
        }

        fn accept(&mut self, _token: TokenId) {}
    }

    #[test]
    fn bundle_shares_buffer_and_sampler() {
        let resources = GenerationResources::new(Box::new(CountingChain(0)));
        let worker_handle = Arc::clone(&resources);

        worker_handle.readback().write("x", 7);
        assert_eq!(resources.readback().read_next(), Some(("x".to_string(), 7)));

        let mut candidates = TokenCandidates::from_logits(&[0.0]);
        worker_handle.with_sampler(|s| s.apply(&mut candidates));
    }

    #[test]
    fn buffer_outlives_either_handle() {
        let caller = GenerationResources::new(Box::new(CountingChain(0)));
        let worker = Arc::clone(&caller);
        drop(caller);

        worker.readback().finish("{}".to_string());
        assert!(worker.readback().is_finished());
    }
}
