//! `${VAR}` / `${VAR:-default}` expansion applied to the raw config text.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"))
}

/// Replace every placeholder using `lookup`. Unset variables without a
/// default expand to the empty string.
pub fn substitute_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder()
        .replace_all(input, |caps: &Captures<'_>| {
            let expr = &caps[1];
            let (name, default) = match expr.split_once(":-") {
                Some((name, default)) => (name, default),
                None => (expr, ""),
            };
            lookup(name.trim()).unwrap_or_else(|| default.to_string())
        })
        .into_owned()
}

/// Expand placeholders from the process environment.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}
