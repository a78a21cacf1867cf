//! Environment-variable readers used by service `from_env` constructors.

use std::str::FromStr;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read a required variable. Panics with the variable name when it is missing;
/// only call this during startup.
pub fn required(key: &str) -> String {
    process_env(key).unwrap_or_else(|| panic!("{key} must be set"))
}

/// Read and parse a variable, falling back to `default` when it is unset or
/// does not parse.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    parse_or_in(process_env, key, default)
}

/// Read a variable that may be absent. Blank values count as absent.
pub fn optional(key: &str) -> Option<String> {
    optional_in(process_env, key)
}

pub fn string_or(key: &str, default: &str) -> String {
    process_env(key).unwrap_or_else(|| default.to_owned())
}

/// Boolean switch. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn flag(key: &str, default: bool) -> bool {
    flag_in(process_env, key, default)
}

fn parse_or_in<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable env var, using default");
            default
        }),
        None => default,
    }
}

fn optional_in(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn flag_in(lookup: impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            tracing::warn!(key, value = %raw, "unparsable boolean env var, using default");
            default
        }
    }
}
