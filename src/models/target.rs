// Monitored target (one remote host exposing /api/stats)

use serde::{Deserialize, Serialize};

/// Static description of one polled host. Loaded from `[[targets]]` at startup and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Stable id; namespaces storage keys and view element ids.
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
}
