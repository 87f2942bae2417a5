use serde::{Deserialize, Serialize};
use std::fmt;

/// Regression families trained for every ticker.
///
/// Declaration order is the listing order: it decides iteration order,
/// output key order and tie-breaks during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Single recurrent (LSTM) layer over `steps x features` windows.
    #[serde(rename = "LSTM")]
    Sequential,
    /// Dense ReLU layer over flattened windows.
    #[serde(rename = "MLP")]
    FeedForward,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::Sequential, ModelFamily::FeedForward];

    /// Name used in forecast output.
    pub fn label(self) -> &'static str {
        match self {
            ModelFamily::Sequential => "LSTM",
            ModelFamily::FeedForward => "MLP",
        }
    }

    /// Key used in the parameter cache.
    pub fn cache_key(self) -> &'static str {
        match self {
            ModelFamily::Sequential => "lstm",
            ModelFamily::FeedForward => "mlp",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
