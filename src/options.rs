use serde::{Deserialize, Serialize};

const DEFAULT_MAX_LONG_DIGITS: usize = 10_000;
const DEFAULT_SKIP_CONTEXT: usize = 20;

/// Decoder configuration.
///
/// Every field has a default, so a partial JSON document such as
/// `{"strict": true}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeOptions {
    /// Treat unknown opcodes and a non-singleton final stack as errors
    /// instead of recording them in the report.
    pub strict: bool,
    /// Longest accepted LONG/INT decimal token.
    pub max_long_digits: usize,
    /// Bytes after a skipped opcode captured in the report.
    pub skip_context: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_long_digits: DEFAULT_MAX_LONG_DIGITS,
            skip_context: DEFAULT_SKIP_CONTEXT,
        }
    }
}

impl DecodeOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
