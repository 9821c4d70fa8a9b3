//! `${VAR}` substitution for config files.
//!
//! Recognised forms:
//! - `${VAR}`: value of `VAR`, an error when unset
//! - `${VAR:-fallback}`: `fallback` when `VAR` is unset or empty
//! - `$$`: a literal `$`
//!
//! A bare `$` not followed by `{` or `$` is left untouched so broker
//! passwords and regexes survive unchanged.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("variable reference pattern is valid")
});

/// Substitute references using the process environment.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Substitute references using `lookup`. Every unresolved name is
/// collected so a single run reports all of them.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();

    let output = VAR_REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let fallback = caps.get(2).map(|m| m.as_str());

        match (lookup(name), fallback) {
            (Some(value), Some(fallback)) if value.is_empty() => fallback.to_string(),
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                missing.push(format!("${{{name}}} is not set"));
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(output.into_owned())
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_substitutes_set_variable() {
        let out = interpolate_with("brokers: ${BROKERS}", lookup(&[("BROKERS", "k1:9092")]));
        assert_eq!(out.unwrap(), "brokers: k1:9092");
    }

    #[test]
    fn test_fallback_for_unset_and_empty() {
        let env = lookup(&[("EMPTY", "")]);
        assert_eq!(interpolate_with("${UNSET:-a}", &env).unwrap(), "a");
        assert_eq!(interpolate_with("${EMPTY:-b}", &env).unwrap(), "b");
    }

    #[test]
    fn test_all_missing_reported() {
        let errors = interpolate_with("${A} and ${B}", lookup(&[])).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("${A}"));
        assert!(errors[1].contains("${B}"));
    }

    #[test]
    fn test_escapes_and_bare_dollar() {
        let out = interpolate_with("cost: $$5, pattern: ^a$", lookup(&[])).unwrap();
        assert_eq!(out, "cost: $5, pattern: ^a$");
    }

    #[test]
    fn test_reads_process_environment() {
        // PATH is set in every test environment.
        assert!(!interpolate("${PATH}").unwrap().is_empty());
    }
}
