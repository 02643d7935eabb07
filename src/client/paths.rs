//! Module path normalization.
//!
//! Hot contexts and the update coordinator must agree on module ids exactly,
//! so every id goes through these helpers.

use url::Url;

use crate::error::{HmrError, Result};

const RESOLVE_BASE: &str = "http://localhost";

/// The path component of a module url: `http://host/src/a.js?x=1` -> `/src/a.js`.
pub fn module_id_from_url(full_url: &str) -> Result<String> {
    let url = Url::parse(full_url).map_err(|e| HmrError::invalid_url(full_url, e))?;
    Ok(url.path().to_string())
}

/// Resolve a dependency specifier against the importing module's id.
pub fn resolve_dependency(base_id: &str, specifier: &str) -> Result<String> {
    let base = Url::parse(RESOLVE_BASE)
        .and_then(|origin| origin.join(base_id))
        .map_err(|e| HmrError::invalid_url(base_id, e))?;
    let resolved = base
        .join(specifier)
        .map_err(|e| HmrError::invalid_url(specifier, e))?;
    Ok(resolved.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_from_url() {
        assert_eq!(
            module_id_from_url("http://localhost:8080/src/app.js?mtime=1").unwrap(),
            "/src/app.js"
        );
        assert!(module_id_from_url("/relative.js").is_err());
    }

    #[test]
    fn test_resolve_dependency() {
        assert_eq!(resolve_dependency("/a.js", "./b.js").unwrap(), "/b.js");
        assert_eq!(resolve_dependency("/src/ui/a.js", "../lib/b.js").unwrap(), "/src/lib/b.js");
        assert_eq!(resolve_dependency("/src/a.js", "/vendor/c.js").unwrap(), "/vendor/c.js");
        assert_eq!(resolve_dependency("/src/a.js", "d.js").unwrap(), "/src/d.js");
        assert_eq!(
            resolve_dependency("/src/a.js", "http://cdn.example.com/x/e.js").unwrap(),
            "/x/e.js"
        );
    }
}
