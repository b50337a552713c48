use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Query parameters for a resource request. A `BTreeMap` keeps the
/// serialized order stable, so the same logical request always yields
/// the same URL and therefore the same cache key.
pub type Params = BTreeMap<String, String>;

/// Build the fully-qualified URL of a REST resource.
///
/// The result is used both as the request URL and as the cache key:
/// `{base}/{resource}[/{id}][?k1=v1&k2=v2...]`, parameters sorted by key.
///
/// - `resource` may contain several segments (`teams/42/customers`)
/// - `id` is a single path segment and is percent-encoded as such
/// - a trailing slash on `base` is ignored
pub fn resource_url(base: &str, resource: &str, id: Option<&str>, params: &Params) -> Result<String> {
    let mut url = url::Url::parse(base)?;
    if url.cannot_be_a_base() {
        return Err(Error::UrlParse(format!("not a base URL: {base}")));
    }

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::UrlParse(format!("not a base URL: {base}")))?;
        segments.pop_if_empty();
        segments.extend(resource.split('/').filter(|s| !s.is_empty()));
        if let Some(id) = id {
            segments.push(id);
        }
    }

    url.set_query(None);
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }

    Ok(url.to_string())
}

/// Prefix a resource path with the tenant scope, if any.
pub fn scoped_path(team_id: Option<&str>, path: &str) -> String {
    let path = path.trim_matches('/');
    match team_id {
        Some(team) if !team.is_empty() => format!("teams/{team}/{path}"),
        _ => path.to_string(),
    }
}

/// Parse a `key=value` pair (CLI `--param` arguments).
pub fn parse_param(input: &str) -> Result<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::UrlParse(format!(
            "expected key=value parameter, got: {input}"
        ))),
    }
}

/// Read a single query parameter back out of a URL.
pub fn query_param(input: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(input).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_list_url() {
        let url = resource_url("https://api.example.com", "customers", None, &Params::new()).unwrap();
        assert_eq!(url, "https://api.example.com/customers");
    }

    #[test]
    fn test_element_url() {
        let url =
            resource_url("https://api.example.com", "customers", Some("1"), &Params::new()).unwrap();
        assert_eq!(url, "https://api.example.com/customers/1");
    }

    #[test]
    fn test_base_with_path_and_trailing_slash() {
        let url = resource_url("https://api.example.com/v1/", "customers", None, &Params::new()).unwrap();
        assert_eq!(url, "https://api.example.com/v1/customers");
    }

    #[test]
    fn test_params_are_sorted() {
        let mut p = Params::new();
        p.insert("since".into(), "0".into());
        p.insert("limit".into(), "100".into());
        let url = resource_url("https://api.example.com", "delta", None, &p).unwrap();
        assert_eq!(url, "https://api.example.com/delta?limit=100&since=0");
    }

    #[test]
    fn test_same_params_same_key_regardless_of_insertion_order() {
        let a = params(&[("b", "2"), ("a", "1")]);
        let b = params(&[("a", "1"), ("b", "2")]);
        assert_eq!(
            resource_url("https://api.example.com", "items", None, &a).unwrap(),
            resource_url("https://api.example.com", "items", None, &b).unwrap()
        );
    }

    #[test]
    fn test_id_is_encoded_as_one_segment() {
        let url =
            resource_url("https://api.example.com", "files", Some("a/b c"), &Params::new()).unwrap();
        assert_eq!(url, "https://api.example.com/files/a%2Fb%20c");
    }

    #[test]
    fn test_multi_segment_resource() {
        let url =
            resource_url("https://api.example.com", "/teams/42/customers/", None, &Params::new())
                .unwrap();
        assert_eq!(url, "https://api.example.com/teams/42/customers");
    }

    #[test]
    fn test_invalid_base() {
        assert!(resource_url("not a url", "items", None, &Params::new()).is_err());
        assert!(resource_url("mailto:someone@example.com", "items", None, &Params::new()).is_err());
    }

    #[test]
    fn test_scoped_path() {
        assert_eq!(scoped_path(Some("42"), "delta"), "teams/42/delta");
        assert_eq!(scoped_path(None, "/delta"), "delta");
        assert_eq!(scoped_path(Some(""), "customers"), "customers");
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("status=open").unwrap(),
            ("status".to_string(), "open".to_string())
        );
        assert_eq!(
            parse_param("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_query_param() {
        let url = "https://api.example.com/delta?limit=300&next=abc&since=5";
        assert_eq!(query_param(url, "next").as_deref(), Some("abc"));
        assert_eq!(query_param(url, "missing"), None);
    }
}
