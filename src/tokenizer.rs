//! Token counting against the target embedding model's tokenizer.
//!
//! Counts must use the same scheme as the model consuming the text, or the
//! chunker's size discipline silently breaks at the API boundary. When the
//! `tiktoken` feature is enabled, encoders are resolved per model id and
//! cached; otherwise (or when no encoder can be resolved) a conservative
//! character-based estimate is used, which over-estimates rather than
//! under-estimates so chunks stay under hard limits either way.

use std::sync::Arc;

#[cfg(feature = "tiktoken")]
use parking_lot::Mutex;
#[cfg(feature = "tiktoken")]
use rustc_hash::FxHashMap;
#[cfg(feature = "tiktoken")]
use tiktoken_rs::CoreBPE;

#[derive(Default)]
pub struct TokenCounter {
    #[cfg(feature = "tiktoken")]
    encoders: Mutex<FxHashMap<String, Arc<CoreBPE>>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter, ready to hand to the chunker and embedding guard.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Token count of `text` under `model`'s tokenizer, falling back to
    /// [`TokenCounter::estimate`] when no encoder is available.
    pub fn count(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        #[cfg(feature = "tiktoken")]
        {
            if let Some(bpe) = self.encoder_for(model) {
                return bpe.encode_with_special_tokens(text).len();
            }
        }
        #[cfg(not(feature = "tiktoken"))]
        {
            let _ = model;
        }
        Self::estimate(text)
    }

    /// Conservative fallback: `ceil(chars / 4)`. Over-estimates for typical
    /// prose, which is the safe direction for a size guard.
    pub fn estimate(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    #[cfg(feature = "tiktoken")]
    fn encoder_for(&self, model: &str) -> Option<Arc<CoreBPE>> {
        let mut cache = self.encoders.lock();
        if let Some(bpe) = cache.get(model) {
            return Some(bpe.clone());
        }
        // Unknown model ids (non-OpenAI embedding models) get the cl100k
        // vocabulary, which is close enough for boundary decisions.
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok()?;
        let bpe = Arc::new(bpe);
        cache.insert(model.to_string(), bpe.clone());
        Some(bpe)
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish()
    }
}
