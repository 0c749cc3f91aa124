//! Endpoint category normalization.
//!
//! Rate limits bucket by route shape, not by concrete URL: two requests for
//! different chapters of different books land in the same category. UUID and
//! numeric path segments collapse to a placeholder; query strings are
//! dropped.

use uuid::Uuid;

/// Placeholder for identifier-like path segments.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Normalize a request path into an endpoint category.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);

    let mut category = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        category.push('/');
        if is_id_segment(segment) {
            category.push_str(ID_PLACEHOLDER);
        } else {
            category.push_str(segment);
        }
    }

    if category.is_empty() {
        "/".to_string()
    } else {
        category
    }
}

fn is_id_segment(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    Uuid::parse_str(segment).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_segments_collapse() {
        assert_eq!(
            normalize_endpoint("/api/books/42/chapters/7"),
            "/api/books/{id}/chapters/{id}"
        );
    }

    #[test]
    fn uuid_segments_collapse() {
        assert_eq!(
            normalize_endpoint("/api/pdfs/8f14e45f-ceea-467f-a347-25b92f7c8f3e/pages"),
            "/api/pdfs/{id}/pages"
        );
    }

    #[test]
    fn query_strings_are_dropped() {
        assert_eq!(
            normalize_endpoint("/api/search?q=rust&page=2"),
            "/api/search"
        );
    }

    #[test]
    fn plain_segments_survive() {
        assert_eq!(normalize_endpoint("/api/auth/login"), "/api/auth/login");
        assert_eq!(normalize_endpoint("api/auth/login/"), "/api/auth/login");
    }

    #[test]
    fn root_and_empty_paths() {
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint(""), "/");
        assert_eq!(normalize_endpoint("?x=1"), "/");
    }

    #[test]
    fn mixed_alphanumeric_segments_are_not_ids() {
        assert_eq!(
            normalize_endpoint("/api/v2/books/abc123"),
            "/api/v2/books/abc123"
        );
    }
}
