//! Client model names and the provider models they select.
//!
//! Lookup is case-insensitive. Names absent from the table are forwarded to
//! the provider unchanged.

use serde::Serialize;

pub const SONNET_37_THINK: &str = "claude-3.7-sonnet-think";
pub const SONNET_4_THINK: &str = "claude-4-sonnet-think";

/// `(client alias, provider model)` pairs.
const MODEL_TABLE: &[(&str, &str)] = &[
    ("claude-3.7-sonnet", SONNET_37_THINK),
    ("claude-3-7-sonnet", SONNET_37_THINK),
    ("claude-3.7", SONNET_37_THINK),
    ("claude-3-sonnet", SONNET_37_THINK),
    ("claude-sonnet", SONNET_37_THINK),
    ("claude-4-sonnet", SONNET_4_THINK),
    ("claude-4", SONNET_4_THINK),
    ("claude-sonnet-4", SONNET_4_THINK),
];

/// Provider model for a client-supplied name.
#[must_use]
pub fn map_model_name(model: &str) -> String {
    let normalized = model.to_ascii_lowercase();
    MODEL_TABLE
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map_or_else(|| model.to_string(), |(_, target)| (*target).to_string())
}

/// One entry of the `/v1/models` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub model_type: &'static str,
    pub object: &'static str,
    pub owned_by: &'static str,
    /// Provider model the alias resolves to.
    pub provider_model: String,
}

/// Every known alias plus the provider models themselves, sorted by id.
#[must_use]
pub fn known_models() -> Vec<ModelEntry> {
    let mut ids: Vec<(&str, &str)> = MODEL_TABLE.to_vec();
    ids.push((SONNET_37_THINK, SONNET_37_THINK));
    ids.push((SONNET_4_THINK, SONNET_4_THINK));
    ids.sort_unstable();
    ids.into_iter()
        .map(|(id, target)| ModelEntry {
            id: id.to_string(),
            model_type: "model",
            object: "model",
            owned_by: "sider",
            provider_model: target.to_string(),
        })
        .collect()
}
