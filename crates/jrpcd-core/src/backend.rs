//! Registry of named upstream JSON-RPC endpoints.

use std::collections::HashMap;

use url::Url;

use crate::config::ConfigError;

/// Name given to a backend registered from a bare URL spec.
pub const DEFAULT_BACKEND: &str = "default";

/// One upstream JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub url: Url,
}

/// Parses a `name=url` or bare `url` backend spec.
///
/// Names are alphanumeric tokens, folded to lowercase; a spec without a
/// name prefix registers under [`DEFAULT_BACKEND`]. The URL part must
/// parse as an absolute URL.
pub fn parse_backend(spec: &str) -> Result<Backend, ConfigError> {
    let (name, raw_url) = match spec.split_once('=') {
        Some((name, rest))
            if !name.is_empty()
                && !rest.is_empty()
                && name.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            (name.to_ascii_lowercase(), rest)
        }
        _ => (DEFAULT_BACKEND.to_string(), spec),
    };

    let url = Url::parse(raw_url).map_err(|source| ConfigError::InvalidBackendUrl {
        spec: spec.to_string(),
        source,
    })?;

    Ok(Backend { name, url })
}

/// Parses backend specs into a registry, skipping empty entries.
///
/// Registering the same name twice is a fatal configuration error, and a
/// backend named `default` must be present.
pub fn parse_backends(specs: &[String]) -> Result<HashMap<String, Backend>, ConfigError> {
    let mut backends = HashMap::new();

    for spec in specs {
        if spec.is_empty() {
            continue;
        }

        let backend = parse_backend(spec)?;
        if backends.contains_key(&backend.name) {
            return Err(ConfigError::DuplicateBackend(backend.name));
        }
        backends.insert(backend.name.clone(), backend);
    }

    if !backends.contains_key(DEFAULT_BACKEND) {
        return Err(ConfigError::MissingDefaultBackend);
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_backend() {
        let backend = parse_backend("geth=http://10.0.0.1:8545").unwrap();
        assert_eq!(backend.name, "geth");
        assert_eq!(backend.url.as_str(), "http://10.0.0.1:8545/");
    }

    #[test]
    fn bare_url_registers_as_default() {
        let backend = parse_backend("http://localhost:8545").unwrap();
        assert_eq!(backend.name, DEFAULT_BACKEND);
    }

    #[test]
    fn name_is_case_folded() {
        let backend = parse_backend("Archive1=http://localhost:8545").unwrap();
        assert_eq!(backend.name, "archive1");
    }

    #[test]
    fn url_with_query_equals_is_a_bare_url() {
        // The '=' belongs to the query string, not a name prefix.
        let backend = parse_backend("http://localhost:8545/?key=value").unwrap();
        assert_eq!(backend.name, DEFAULT_BACKEND);
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            parse_backend("geth=not a url"),
            Err(ConfigError::InvalidBackendUrl { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let specs = vec![
            "default=http://a".to_string(),
            "default=http://b".to_string(),
        ];
        assert!(matches!(
            parse_backends(&specs),
            Err(ConfigError::DuplicateBackend(name)) if name == "default"
        ));
    }

    #[test]
    fn requires_default_backend() {
        let specs = vec!["geth=http://a".to_string()];
        assert!(matches!(
            parse_backends(&specs),
            Err(ConfigError::MissingDefaultBackend)
        ));
    }

    #[test]
    fn skips_empty_specs() {
        let specs = vec![String::new(), "http://a".to_string()];
        let backends = parse_backends(&specs).unwrap();
        assert_eq!(backends.len(), 1);
    }
}
