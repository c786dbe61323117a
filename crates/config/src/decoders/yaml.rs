//! YAML decoder

use crate::core::Decoder;

/// Decodes YAML documents
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDecoder;

impl Decoder for YamlDecoder {
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, String> {
        // an empty document decodes to an empty map rather than null
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_yaml::from_slice(data).map_err(|e| e.to_string())
    }
}
