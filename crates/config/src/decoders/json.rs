//! JSON decoder

use crate::core::Decoder;

/// Decodes JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, String> {
        serde_json::from_slice(data).map_err(|e| e.to_string())
    }
}
