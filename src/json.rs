use std::collections::HashSet;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Map, Value as Json};

use crate::error::RenderError;
use crate::types::{Dict, Value, MAX_DEPTH};

/// Render a decoded graph as JSON.
///
/// Values without a direct JSON counterpart become single-key marker
/// objects: `@t` tuple, `@b` base64 bytes, `@d` dict with non-text keys
/// (as `[key, value]` pairs), `@cls` global reference, `@ref` persistent
/// reference, `@long` a long that lost bits past 64. A container reached
/// again while it is still being rendered becomes `{"@cycle": <kind>}`;
/// containers that are merely shared are rendered at every occurrence.
/// Nesting deeper than [`MAX_DEPTH`] is an error.
pub fn to_json(val: &Value) -> Result<Json, RenderError> {
    Renderer::default().render(val, 0)
}

#[derive(Default)]
struct Renderer {
    /// Containers on the current path from the root.
    active: HashSet<*const ()>,
}

impl Renderer {
    fn render(&mut self, val: &Value, depth: usize) -> Result<Json, RenderError> {
        if depth > MAX_DEPTH {
            return Err(RenderError::TooDeep(MAX_DEPTH));
        }
        let (key, kind) = match val {
            Value::List(items) => (Rc::as_ptr(items) as *const (), "list"),
            Value::Tuple(items) => (Rc::as_ptr(items) as *const Value as *const (), "tuple"),
            Value::Dict(pairs) => (Rc::as_ptr(pairs) as *const (), "dict"),
            scalar => return Ok(scalar_to_json(scalar)),
        };
        if !self.active.insert(key) {
            return Ok(cycle_marker(kind));
        }
        let rendered = match val {
            Value::List(items) => self.render_seq(&items.borrow(), depth + 1).map(Json::Array),
            Value::Tuple(items) => self.render_seq(items, depth + 1).map(tuple_marker),
            Value::Dict(pairs) => self.render_dict(&pairs.borrow(), depth + 1),
            scalar => Ok(scalar_to_json(scalar)),
        };
        self.active.remove(&key);
        rendered
    }

    fn render_seq(&mut self, items: &[Value], depth: usize) -> Result<Vec<Json>, RenderError> {
        let mut arr = Vec::with_capacity(items.len());
        for item in items {
            arr.push(self.render(item, depth)?);
        }
        Ok(arr)
    }

    fn render_dict(&mut self, dict: &Dict, depth: usize) -> Result<Json, RenderError> {
        if dict.iter().all(|(k, _)| k.as_text().is_some()) {
            let mut map = Map::new();
            for (k, v) in dict.iter() {
                if let Some(k) = k.as_text() {
                    map.insert(k.to_string(), self.render(v, depth)?);
                }
            }
            return Ok(Json::Object(map));
        }
        let mut arr = Vec::with_capacity(dict.len());
        for (k, v) in dict.iter() {
            arr.push(Json::Array(vec![self.render(k, depth)?, self.render(v, depth)?]));
        }
        Ok(json!({ "@d": arr }))
    }
}

fn cycle_marker(kind: &str) -> Json {
    json!({ "@cycle": kind })
}

fn tuple_marker(items: Vec<Json>) -> Json {
    json!({ "@t": items })
}

fn scalar_to_json(val: &Value) -> Json {
    match val {
        Value::Int { value, .. } => json!(*value),
        Value::Long {
            value,
            overflowed: false,
        } => json!(*value),
        Value::Long {
            value,
            overflowed: true,
        } => json!({ "@long": *value }),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text { value, .. } => Json::String(value.clone()),
        Value::Bytes { data, .. } => json!({ "@b": BASE64.encode(data) }),
        Value::Global { module, name } => json!({ "@cls": [module, name] }),
        Value::PersistentRef { id, payload } => json!({
            "@ref": {
                "id": id,
                "payload": BASE64.encode(payload),
            }
        }),
        // Mark never survives a successful decode.
        Value::None | Value::Mark | Value::List(_) | Value::Tuple(_) | Value::Dict(_) => Json::Null,
    }
}
