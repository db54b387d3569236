//! Payload assembly for capture requests.
//!
//! Computed fields are written first; caller options are applied afterwards.
//! A caller value for an existing key replaces it in place, new keys are
//! appended, so the serialized order is always computed fields followed by
//! caller additions.

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Ordered string-keyed option map.
pub type Options = JsonMap<String, JsonValue>;

/// Incremental builder for an ordered request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBuilder {
    fields: Options,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a computed field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Apply caller options at the top level; caller values win.
    pub fn merge(mut self, caller: Option<&Options>) -> Self {
        if let Some(caller) = caller {
            for (key, value) in caller {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Store caller options as a single nested object under `key`. Nothing
    /// is written when no options were supplied.
    pub fn nest(mut self, key: &str, caller: Option<&Options>) -> Self {
        if let Some(caller) = caller {
            self.fields
                .insert(key.to_string(), JsonValue::Object(caller.clone()));
        }
        self
    }

    pub fn build(self) -> Options {
        self.fields
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.fields)
    }
}

/// Merge `caller` over `base`.
pub fn build(base: Options, caller: Option<&Options>) -> Options {
    RequestBuilder { fields: base }.merge(caller).build()
}

/// Convert any serializable value into [`Options`]. Values that do not
/// serialize to a JSON object are rejected.
pub fn options_from<T: Serialize + ?Sized>(value: &T) -> Result<Options, serde_json::Error> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(Options::new()),
        other => Err(serde::ser::Error::custom(format!(
            "options must serialize to an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: JsonValue) -> Options {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn keys(options: &Options) -> Vec<&str> {
        options.keys().map(String::as_str).collect()
    }

    #[test]
    fn caller_value_overrides_computed_in_place() {
        let base = options(json!({ "name": "A" }));
        let caller = options(json!({ "name": "B", "extra": 1 }));

        let merged = build(base, Some(&caller));

        assert_eq!(JsonValue::Object(merged.clone()), json!({ "name": "B", "extra": 1 }));
        assert_eq!(keys(&merged), ["name", "extra"]);
    }

    #[test]
    fn computed_order_is_preserved_before_caller_additions() {
        let caller = options(json!({ "widths": [375, 1280], "url": "https://override.test" }));

        let merged = RequestBuilder::new()
            .field("clientInfo", "percy-rs/0.1.0")
            .field("environmentInfo", "chromiumoxide; rust")
            .field("url", "https://example.test")
            .field("name", "Home")
            .merge(Some(&caller))
            .build();

        assert_eq!(
            keys(&merged),
            ["clientInfo", "environmentInfo", "url", "name", "widths"]
        );
        assert_eq!(merged["url"], "https://override.test");
    }

    #[test]
    fn missing_caller_options_leave_payload_untouched() {
        let merged = RequestBuilder::new()
            .field("name", "A")
            .merge(None)
            .nest("options", None)
            .build();
        assert_eq!(keys(&merged), ["name"]);
    }

    #[test]
    fn nested_options_do_not_touch_computed_fields() {
        let caller = options(json!({ "sessionId": "forged", "freezeAnimation": true }));

        let payload = RequestBuilder::new()
            .field("sessionId", "real")
            .nest("options", Some(&caller))
            .into_value();

        assert_eq!(payload["sessionId"], "real");
        assert_eq!(payload["options"]["sessionId"], "forged");
        assert_eq!(payload["options"]["freezeAnimation"], true);
    }

    #[test]
    fn options_from_struct_keeps_field_order() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SnapshotOptions {
            widths: Vec<u32>,
            min_height: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            percy_css: Option<String>,
        }

        let opts = options_from(&SnapshotOptions {
            widths: vec![1280],
            min_height: 1024,
            percy_css: None,
        })
        .unwrap();

        assert_eq!(keys(&opts), ["widths", "minHeight"]);
    }

    #[test]
    fn options_from_rejects_scalars() {
        assert!(options_from(&42).is_err());
        assert!(options_from(&Option::<u8>::None).unwrap().is_empty());
    }
}
