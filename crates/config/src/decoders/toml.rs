//! TOML decoder

use crate::core::Decoder;

/// Decodes TOML documents
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlDecoder;

impl Decoder for TomlDecoder {
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, String> {
        let text = std::str::from_utf8(data).map_err(|e| format!("invalid UTF-8: {e}"))?;
        toml::from_str(text).map_err(|e| e.to_string())
    }
}
