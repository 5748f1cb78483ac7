//! Request eligibility classification
//!
//! Deliberately narrow: only same-origin GET requests for scripts and
//! stylesheets are intercepted. Markup, images and API responses have
//! different correctness and freshness requirements and always go straight
//! to the origin.

use crate::types::PolicyConfig;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Structural gate: script and stylesheet extensions on the URL path.
static SCRIPT_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(js|mjs|css)$").unwrap());

/// Policy patterns compiled once when the policy is set, not per request.
///
/// A pattern that fails to compile is dropped and matches nothing:
/// malformed policy input degrades, it does not fail requests.
#[derive(Debug, Clone, Default)]
pub struct PolicyMatchers {
    cacheable: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PolicyMatchers {
    pub fn compile(policy: &PolicyConfig) -> Self {
        Self {
            cacheable: compile_all(&policy.cacheable_patterns),
            exclude: compile_all(&policy.exclude_patterns),
        }
    }
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(_) => {
                debug!(pattern, "Dropping malformed policy pattern");
                None
            }
        })
        .collect()
}

/// Whether a request is eligible for cache interception.
///
/// All gates are necessary: GET method, same origin as the serving origin,
/// no exclude-pattern match, and a cacheable-pattern match on a
/// script/stylesheet path. Exclusion is checked before cacheability.
pub fn is_interceptable(
    method: &str,
    url: &str,
    serving_origin: &Url,
    matchers: &PolicyMatchers,
) -> bool {
    if !method.eq_ignore_ascii_case("GET") {
        return false;
    }

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    if parsed.origin() != serving_origin.origin() {
        return false;
    }

    if matchers.exclude.iter().any(|re| re.is_match(url)) {
        debug!(url, "Request excluded by policy pattern");
        return false;
    }

    if !SCRIPT_STYLE_RE.is_match(parsed.path()) {
        return false;
    }

    matchers.cacheable.iter().any(|re| re.is_match(parsed.path()))
}
