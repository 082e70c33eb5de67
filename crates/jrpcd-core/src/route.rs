//! Route table: ordered rules mapping calls to backend lists.
//!
//! A rule selects requests either by method name membership or by a
//! wildcard pattern over the request fingerprint. Rules are consulted in
//! declaration order and the first match wins; the server appends a
//! terminal `default=match:*` rule so every well-formed request matches.

use std::collections::{HashMap, HashSet};

use crate::{
    backend::Backend,
    codec::RpcRequest,
    config::ConfigError,
};

/// Terminal rule appended after all user routes.
pub const TERMINAL_ROUTE: &str = "default=match:*";

/// How a route selects requests.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Matches when the lower-cased method name is a member.
    Methods(HashSet<String>),
    /// Matches when the pattern accepts the request fingerprint.
    /// `*` matches any run of characters, `?` a single character.
    Pattern(String),
}

/// A parsed route spec before backend names are resolved.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub backends: Vec<String>,
    pub selector: Selector,
}

/// A route with its backend list resolved against the registry.
#[derive(Debug, Clone)]
pub struct Route {
    pub backends: Vec<Backend>,
    pub selector: Selector,
}

impl Route {
    pub fn matches(&self, request: &RpcRequest) -> bool {
        match &self.selector {
            Selector::Methods(methods) => methods.contains(request.method()),
            Selector::Pattern(pattern) => {
                pattern == "*" || wildcard_match(pattern, request.fingerprint())
            }
        }
    }
}

/// Parses a `backendlist=rules` route spec.
///
/// The whole spec is folded to lowercase. `rules` is either
/// `match:<pattern>` or a comma-separated method list. Backend and method
/// lists are trimmed and de-duplicated with order preserved.
pub fn parse_route(spec: &str) -> Result<RouteSpec, ConfigError> {
    let lowered = spec.to_ascii_lowercase();

    let invalid = || ConfigError::InvalidRoute { spec: spec.to_string() };

    let (names, rules) = lowered.split_once('=').ok_or_else(invalid)?;
    if names.is_empty()
        || rules.is_empty()
        || !names.bytes().all(|b| b.is_ascii_alphanumeric() || b == b',')
    {
        return Err(invalid());
    }

    let backends = dedup(tokens(names));
    if backends.is_empty() {
        return Err(ConfigError::MissingRouteBackends { spec: spec.to_string() });
    }

    let selector = match rules.strip_prefix("match:") {
        Some(pattern) => Selector::Pattern(pattern.trim().to_string()),
        None => Selector::Methods(dedup(tokens(rules)).into_iter().collect()),
    };

    Ok(RouteSpec { backends, selector })
}

/// Builds the route table from specs, appending the terminal rule and
/// resolving backend names against the registry.
pub fn build_routes(
    specs: &[String],
    backends: &HashMap<String, Backend>,
) -> Result<Vec<Route>, ConfigError> {
    let terminal = TERMINAL_ROUTE.to_string();
    let mut routes = Vec::with_capacity(specs.len() + 1);

    for spec in specs.iter().chain(std::iter::once(&terminal)) {
        if spec.is_empty() {
            continue;
        }

        let parsed = parse_route(spec)?;
        let mut resolved = Vec::with_capacity(parsed.backends.len());
        for name in &parsed.backends {
            let backend = backends.get(name).ok_or_else(|| ConfigError::UnknownRouteBackend {
                spec: spec.clone(),
                name: name.clone(),
            })?;
            resolved.push(backend.clone());
        }

        routes.push(Route { backends: resolved, selector: parsed.selector });
    }

    Ok(routes)
}

fn tokens(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Glob-style match supporting `*` (any run) and `?` (single character).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last star swallow one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
