//! Property-based tests for header generation and conditional requests

use larder_http::{ConditionalHeaders, HeaderOptions, HttpCacheConfig, HttpCacheStrategy};
use proptest::prelude::*;

fn strategy() -> HttpCacheStrategy {
    HttpCacheStrategy::new(HttpCacheConfig::default()).unwrap()
}

fn resource_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "/static/[a-z]{1,10}\\.(css|js|woff2)",
        "/img/[a-z]{1,10}\\.(png|webp|svg)",
        "/api/items/[0-9]{1,5}",
        "/docs/[a-z]{1,10}\\.html",
        "/[a-z]{1,10}/",
    ]
}

proptest! {
    /// Property: identical content yields identical validators
    #[test]
    fn prop_same_content_same_validator(
        resource in resource_strategy(),
        content in ".{0,200}",
    ) {
        let http = strategy();
        let first = http.generate_cache_headers(&resource, &content, &HeaderOptions::default());
        let second = http.generate_cache_headers(&resource, &content, &HeaderOptions::default());

        prop_assert!(first.etag.is_some());
        prop_assert_eq!(&first.etag, &second.etag);
        prop_assert_eq!(&first.last_modified, &second.last_modified);
    }

    /// Property: different content yields a different validator
    #[test]
    fn prop_different_content_different_validator(
        resource in resource_strategy(),
        a in "[a-z]{1,50}",
        b in "[a-z]{1,50}",
    ) {
        prop_assume!(a != b);
        let http = strategy();
        let first = http.generate_cache_headers(&resource, &a, &HeaderOptions::default());
        let second = http.generate_cache_headers(&resource, &b, &HeaderOptions::default());
        prop_assert_ne!(first.etag, second.etag);
    }

    /// Property: presenting the issued validator for unchanged content is not modified
    #[test]
    fn prop_issued_validator_matches(
        resource in resource_strategy(),
        content in ".{1,200}",
    ) {
        let http = strategy();
        let headers = http.generate_cache_headers(&resource, &content, &HeaderOptions::default());
        let request = ConditionalHeaders {
            if_none_match: headers.etag.clone(),
            if_modified_since: None,
        };

        let result = http.check_conditional_request(&resource, &request);
        prop_assert!(result.not_modified);
        prop_assert_eq!(result.etag, headers.etag);
    }

    /// Property: no-cache resources always get strict directives and never match
    #[test]
    fn prop_no_cache_resources_never_cached(
        prefix in prop::sample::select(vec!["/api/auth/", "/admin/"]),
        rest in "[a-z]{0,12}",
        content in ".{0,100}",
    ) {
        let http = strategy();
        let resource = format!("{prefix}{rest}");
        let headers = http.generate_cache_headers(&resource, &content, &HeaderOptions {
            is_private: false,
            ttl: Some(600),
            must_revalidate: false,
        });

        prop_assert_eq!(headers.cache_control.as_str(), "no-cache, no-store, must-revalidate");
        prop_assert_eq!(headers.pragma.as_deref(), Some("no-cache"));
        prop_assert!(headers.etag.is_none());

        let request = ConditionalHeaders {
            if_none_match: Some("*".to_string()),
            if_modified_since: Some("Wed, 21 Oct 2099 07:28:00 GMT".to_string()),
        };
        prop_assert!(!http.check_conditional_request(&resource, &request).not_modified);
    }

    /// Property: emitted max-age never exceeds the configured ceiling
    #[test]
    fn prop_max_age_capped(ttl in 0u64..10_000_000, resource in resource_strategy()) {
        let mut config = HttpCacheConfig::default();
        config.max_age_secs = 86_400;
        let http = HttpCacheStrategy::new(config).unwrap();

        let headers = http.generate_cache_headers(&resource, "x", &HeaderOptions {
            ttl: Some(ttl),
            ..Default::default()
        });
        let expected = format!("max-age={}", ttl.min(86_400));
        prop_assert!(headers.cache_control.contains(&expected));
    }
}
