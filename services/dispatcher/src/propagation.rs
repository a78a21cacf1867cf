//! Correlation and W3C trace-context headers for outbound messages.
//!
//! Every function here is pure: the input map is never mutated and an
//! existing value is never overwritten, so applying any of them twice gives
//! the same result as applying it once.

use uuid::Uuid;

use crate::domain::types::{CORRELATION_ID_HEADER, Headers, TRACEPARENT_HEADER};

/// Return `headers` with a `traceparent` entry, generating one if missing.
pub fn ensure_tracing(headers: &Headers) -> Headers {
    ensure_entry(headers, TRACEPARENT_HEADER, generate_traceparent)
}

/// Return `headers` with a `correlationId` entry, generating a UUID if missing.
pub fn ensure_correlation_id(headers: &Headers) -> Headers {
    ensure_entry(headers, CORRELATION_ID_HEADER, || Uuid::new_v4().to_string())
}

/// Correlation id and trace context together, as attached to every publish.
pub fn propagate(headers: &Headers) -> Headers {
    ensure_tracing(&ensure_correlation_id(headers))
}

fn ensure_entry(headers: &Headers, key: &str, generate: impl FnOnce() -> String) -> Headers {
    let mut out = headers.clone();
    out.entry(key.to_owned()).or_insert_with(generate);
    out
}

/// `00-<trace-id>-<parent-id>-01`: version 00, random ids, sampled flag set.
pub fn generate_traceparent() -> String {
    let trace_id = Uuid::new_v4().simple().to_string();
    let parent_id = &Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace_id}-{parent_id}-01")
}

/// Shape check for a version-00 `traceparent` value.
pub fn is_valid_traceparent(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    let [version, trace_id, parent_id, flags] = parts.as_slice() else {
        return false;
    };
    let lower_hex = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    };
    *version == "00"
        && lower_hex(trace_id, 32)
        && lower_hex(parent_id, 16)
        && lower_hex(flags, 2)
        && trace_id.bytes().any(|b| b != b'0')
        && parent_id.bytes().any(|b| b != b'0')
}
