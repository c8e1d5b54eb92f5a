use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

/// Non-empty UTF-8 value stored under `key`, from either `data` or `stringData`.
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|value| String::from_utf8(value.0.clone()).ok());
    let from_string_data = || {
        secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
    };
    from_data.or_else(from_string_data).filter(|value| !value.is_empty())
}

pub fn secret_data<'a>(entries: impl IntoIterator<Item = (&'a str, String)>) -> BTreeMap<String, ByteString> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), ByteString(value.into_bytes())))
        .collect()
}
