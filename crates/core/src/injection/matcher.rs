//! Request matching against patch conditions
//!
//! Each dimension narrows independently: methods are a whitelist, paths
//! match on prefix, headers on exact equality of the listed entries. An
//! empty dimension matches everything, so `MatchConditions::any()` is a
//! true wildcard.

use canopy_domain::{MatchConditions, PatchRequest};

/// Whether `request` satisfies `conditions`.
pub fn request_matches(conditions: &MatchConditions, request: &PatchRequest) -> bool {
    if !conditions.methods.is_empty()
        && !conditions.methods.iter().any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        return false;
    }

    if !conditions.path_prefixes.is_empty()
        && !conditions.path_prefixes.iter().any(|p| request.path.starts_with(p.as_str()))
    {
        return false;
    }

    for (name, expected) in &conditions.headers {
        match request.headers.get(name) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn request(method: &str, path: &str) -> PatchRequest {
        PatchRequest::new(method, path)
    }

    /// Validates empty conditions match any request.
    #[test]
    fn test_wildcard_conditions() {
        let conditions = MatchConditions::any();
        assert!(request_matches(&conditions, &request("GET", "/anything")));
        assert!(request_matches(&conditions, &request("DELETE", "/else")));
    }

    /// Validates the method whitelist is case-insensitive.
    #[test]
    fn test_method_whitelist() {
        let conditions = MatchConditions {
            methods: vec!["POST".to_string(), "put".to_string()],
            ..MatchConditions::default()
        };

        assert!(request_matches(&conditions, &request("post", "/api")));
        assert!(request_matches(&conditions, &request("PUT", "/api")));
        assert!(!request_matches(&conditions, &request("GET", "/api")));
    }

    /// Validates path prefix matching.
    #[test]
    fn test_path_prefixes() {
        let conditions = MatchConditions {
            path_prefixes: vec!["/api/orders".to_string()],
            ..MatchConditions::default()
        };

        assert!(request_matches(&conditions, &request("GET", "/api/orders/42")));
        assert!(!request_matches(&conditions, &request("GET", "/api/users")));
    }

    /// Validates header conditions require exact values for every entry.
    #[test]
    fn test_header_equality() {
        let mut headers = BTreeMap::new();
        headers.insert("x-canary".to_string(), "on".to_string());
        let conditions = MatchConditions { headers, ..MatchConditions::default() };

        let mut matching = request("GET", "/api");
        matching.headers.insert("x-canary".to_string(), "on".to_string());
        assert!(request_matches(&conditions, &matching));

        let mut wrong_value = request("GET", "/api");
        wrong_value.headers.insert("x-canary".to_string(), "off".to_string());
        assert!(!request_matches(&conditions, &wrong_value));

        assert!(!request_matches(&conditions, &request("GET", "/api")));
    }
}
