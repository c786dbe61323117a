//! Override-union merge of configuration trees

use crate::core::path::join;
use crate::core::{ConfigError, ConfigResult, ValueKind};
use serde_json::Value;
use std::sync::Arc;

/// Merge strategy: union `src` into `dst`, `src` taking precedence.
pub type MergeFn = Arc<dyn Fn(&mut Value, Value) -> ConfigResult<()> + Send + Sync>;

/// Deep merge where incoming fields override existing ones.
///
/// Maps merge recursively, fields absent from `src` are left untouched,
/// scalars and arrays are replaced wholesale, and null on either side is
/// overridden. A map meeting a non-map at the same path is a merge error.
pub fn deep_merge(dst: &mut Value, src: Value) -> ConfigResult<()> {
    merge_at(dst, src, "")
}

fn merge_at(dst: &mut Value, src: Value, path: &str) -> ConfigResult<()> {
    match (dst, src) {
        (Value::Object(dst_obj), Value::Object(src_obj)) => {
            for (key, value) in src_obj {
                if let Some(existing) = dst_obj.get_mut(&key) {
                    merge_at(existing, value, &join(path, &key))?;
                } else {
                    dst_obj.insert(key, value);
                }
            }
            Ok(())
        }
        (dst, src)
            if dst.is_null() || src.is_null() || (!dst.is_object() && !src.is_object()) =>
        {
            *dst = src;
            Ok(())
        }
        (dst, src) => Err(ConfigError::merge(
            if path.is_empty() { "<root>" } else { path },
            format!(
                "cannot merge {} into {}",
                ValueKind::of(&src),
                ValueKind::of(dst)
            ),
        )),
    }
}
