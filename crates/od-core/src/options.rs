//! Tunnel option resolution
//!
//! Options are free-form text passed to the tunnel process. `${NAME}`
//! placeholders are replaced from the job environment; unknown names are
//! left exactly as written.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::JobId;

/// Flag carrying the tunnel identifier
pub const TUNNEL_IDENTIFIER_FLAG: &str = "--tunnel-identifier";

/// Short form of [`TUNNEL_IDENTIFIER_FLAG`]
pub const TUNNEL_IDENTIFIER_SHORT_FLAG: &str = "-i";

/// Pattern for `${NAME}` placeholders
#[allow(clippy::expect_used)]
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static UNSAFE_IDENTIFIER_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("constant regex pattern is valid"));

/// Options for one job, resolved exactly once at setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    /// Options as configured
    pub raw: String,
    /// Identifier prepended to the options, if one was generated
    pub generated_identifier: Option<String>,
    /// Options handed to the tunnel process
    pub resolved: String,
}

impl TunnelOptions {
    /// Identifier the tunnel will register under, if any
    pub fn tunnel_identifier(&self) -> Option<String> {
        self.generated_identifier
            .clone()
            .or_else(|| extract_tunnel_identifier(&self.resolved))
    }
}

/// Replace `${NAME}` placeholders with values from `env`
pub fn substitute_placeholders(input: &str, env: &HashMap<String, String>) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            env.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Resolve a job's options
///
/// When an identifier is given, `--tunnel-identifier <id> ` is prepended
/// before placeholders are substituted.
pub fn resolve_options(
    raw: &str,
    env: &HashMap<String, String>,
    identifier: Option<String>,
) -> TunnelOptions {
    let prefixed = match &identifier {
        Some(id) => format!("{} {} {}", TUNNEL_IDENTIFIER_FLAG, id, raw),
        None => raw.to_string(),
    };

    TunnelOptions {
        raw: raw.to_string(),
        resolved: substitute_placeholders(&prefixed, env),
        generated_identifier: identifier,
    }
}

/// Fresh identifier for one job: its project name plus a random suffix
pub fn generate_tunnel_identifier(job: &JobId) -> String {
    let project = UNSAFE_IDENTIFIER_CHARS.replace_all(&job.project, "_");
    format!("{}-{}-{}", project, job.number, uuid::Uuid::new_v4().simple())
}

/// Read the identifier out of an options string (`--tunnel-identifier X` or `-i X`)
pub fn extract_tunnel_identifier(options: &str) -> Option<String> {
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == TUNNEL_IDENTIFIER_FLAG || token == TUNNEL_IDENTIFIER_SHORT_FLAG {
            return tokens.next().map(str::to_string);
        }
        if let Some(value) = token.strip_prefix("--tunnel-identifier=") {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[parameterized(
        no_placeholders = { "-v --no-ssl-bump-domains all", "-v --no-ssl-bump-domains all" },
        known = { "-i ${BUILD_NUMBER}", "-i 42" },
        unknown = { "-x ${NOPE}", "-x ${NOPE}" },
        mixed = { "${BUILD_NUMBER}-${NOPE}-${BUILD_NUMBER}", "42-${NOPE}-42" },
        adjacent = { "${A}${BUILD_NUMBER}", "a42" },
        unterminated = { "-x ${BUILD_NUMBER", "-x ${BUILD_NUMBER" },
        empty = { "", "" },
    )]
    fn substitutes(input: &str, expected: &str) {
        let vars = env(&[("BUILD_NUMBER", "42"), ("A", "a")]);
        assert_eq!(resolve_options(input, &vars, None).resolved, expected);
    }

    #[test]
    fn test_placeholder_spans_are_independent() {
        let vars = env(&[("A", "1")]);
        assert_eq!(substitute_placeholders("${A} } ${B}", &vars), "1 } ${B}");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let vars = env(&[("BUILD_NUMBER", "42")]);
        let once = resolve_options("-i ${BUILD_NUMBER} ${NOPE}", &vars, None);
        let twice = resolve_options(&once.resolved, &vars, None);
        assert_eq!(once.resolved, twice.resolved);
    }

    #[test]
    fn test_identifier_prefix() {
        let vars = env(&[("PORT", "8080")]);
        let options = resolve_options("-P ${PORT}", &vars, Some("job-abc".to_string()));

        assert_eq!(options.resolved, "--tunnel-identifier job-abc -P 8080");
        assert_eq!(options.raw, "-P ${PORT}");
        assert_eq!(options.tunnel_identifier().as_deref(), Some("job-abc"));
    }

    #[test]
    fn test_identifier_placeholder_is_substituted_after_prefixing() {
        let vars = env(&[("SUFFIX", "x")]);
        let options = resolve_options("", &vars, Some("id-${SUFFIX}".to_string()));
        assert_eq!(options.resolved, "--tunnel-identifier id-x ");
    }

    #[test]
    fn test_generated_identifiers_are_unique() {
        let job = JobId::new("web tests/main", 7);
        let a = generate_tunnel_identifier(&job);
        let b = generate_tunnel_identifier(&job);

        assert_ne!(a, b);
        assert!(a.starts_with("web_tests_main-7-"));
        assert!(!a.contains(char::is_whitespace));
    }

    #[parameterized(
        long = { "-v --tunnel-identifier abc -P 1", Some("abc") },
        short = { "-i abc", Some("abc") },
        equals = { "--tunnel-identifier=abc", Some("abc") },
        dangling = { "-v -i", None },
        absent = { "-v", None },
    )]
    fn extracts_identifier(options: &str, expected: Option<&str>) {
        assert_eq!(extract_tunnel_identifier(options).as_deref(), expected);
    }
}
