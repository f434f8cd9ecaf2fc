//! Parameter structs for model loading, context creation, and the
//! processor itself.
//!
//! These mirror the knobs the native engine exposes; engine
//! implementations consume them verbatim. Fields default to the engine's
//! conventional values so a config file only needs to name what it
//! changes.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    None,
    #[default]
    Layer,
    Row,
}

/// KV cache element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheQuant {
    #[default]
    F16,
    Q8_0,
    Q4_0,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelParams {
    pub path: PathBuf,
    #[serde(default)]
    pub gpu_layers: i32,
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub tensor_split: Vec<f32>,
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    /// Elevate the loader thread priority for interactive use.
    #[serde(default)]
    pub realtime: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextParams {
    pub ctx_len: usize,
    pub n_batch: usize,
    pub n_ubatch: usize,
    /// Maximum number of distinct sequences the context must hold; the
    /// processor maps one slot onto each.
    pub n_seq_max: usize,
    pub n_threads: usize,
    pub flash_attn: bool,
    /// 0 keeps the model's trained frequency base.
    pub rope_freq_base: f32,
    pub use_yarn: bool,
    pub k_quant: CacheQuant,
    pub v_quant: CacheQuant,
    pub defrag_threshold: f32,
    pub offload_kqv: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            ctx_len: 4096,
            n_batch: 2048,
            n_ubatch: 512,
            n_seq_max: 4,
            n_threads: 0,
            flash_attn: false,
            rope_freq_base: 0.0,
            use_yarn: false,
            k_quant: CacheQuant::F16,
            v_quant: CacheQuant::F16,
            defrag_threshold: -1.0,
            offload_kqv: true,
        }
    }
}

/// Knobs of the worker itself.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub n_slots: usize,
    pub enable_defrag: bool,
    /// Used-cell fraction that triggers a defragment while every slot is
    /// idle.
    pub defrag_idle_threshold: f32,
    /// Higher bar while slots are busy, to avoid stalling decodes.
    pub defrag_active_threshold: f32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            n_slots: 4,
            enable_defrag: false,
            defrag_idle_threshold: 0.6,
            defrag_active_threshold: 0.9,
        }
    }
}

fn default_true() -> bool {
    true
}
