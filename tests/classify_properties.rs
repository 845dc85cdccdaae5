//! Property-based tests for error classification

use proptest::prelude::*;
use samenactief_recovery::classify::{
    classify, classify_with, Classifier, DutchCatalog, ErrorKind, NETWORK_MARKERS,
};

const STATUS_KINDS: [ErrorKind; 5] = [
    ErrorKind::Unauthorized,
    ErrorKind::Forbidden,
    ErrorKind::NotFound,
    ErrorKind::RateLimited,
    ErrorKind::ServerError,
];

fn status_kind() -> impl Strategy<Value = ErrorKind> {
    prop::sample::select(STATUS_KINDS.to_vec())
}

/// Text with no digits, so it cannot carry a status code.
fn words() -> impl Strategy<Value = String> {
    "[a-zA-Z :.,!-]{0,40}"
}

fn randomize_case(text: &str, mask: &[bool]) -> String {
    text.chars()
        .zip(mask.iter().cycle())
        .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c })
        .collect()
}

fn mentions_network(text: &str) -> bool {
    let lower = text.to_lowercase();
    NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

proptest! {
    #[test]
    fn prop_status_code_anywhere_is_detected(
        kind in status_kind(),
        prefix in words(),
        suffix in words(),
    ) {
        let code = kind.status_code().unwrap();
        let message = format!("{}{}{}", prefix, code, suffix);

        prop_assert_eq!(classify(&message).kind, kind);
    }

    #[test]
    fn prop_earlier_status_wins(
        a in status_kind(),
        b in status_kind(),
        glue in words(),
    ) {
        let message = format!(
            "{} {} {}",
            b.status_code().unwrap(),
            glue,
            a.status_code().unwrap()
        );
        let first_in_order = STATUS_KINDS
            .iter()
            .copied()
            .find(|k| *k == a || *k == b)
            .unwrap();

        prop_assert_eq!(ErrorKind::detect(&message), first_in_order);
    }

    #[test]
    fn prop_status_beats_network_marker(
        kind in status_kind(),
        marker in prop::sample::select(NETWORK_MARKERS.to_vec()),
    ) {
        let message = format!("{}: {}", marker, kind.status_code().unwrap());
        prop_assert_eq!(ErrorKind::detect(&message), kind);
    }

    #[test]
    fn prop_network_marker_in_any_case(
        marker in prop::sample::select(NETWORK_MARKERS.to_vec()),
        mask in prop::collection::vec(any::<bool>(), 1..8),
        prefix in words(),
    ) {
        let message = format!("{} {}", prefix, randomize_case(marker, &mask));
        prop_assert_eq!(classify(&message).kind, ErrorKind::NetworkError);
    }

    #[test]
    fn prop_no_signal_is_unknown(message in words()) {
        prop_assume!(!mentions_network(&message));
        prop_assert_eq!(classify(&message).kind, ErrorKind::Unknown);
    }

    #[test]
    fn prop_classification_is_pure(message in ".{0,60}") {
        let first = classify(&message);
        let second = classify(&message);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(ErrorKind::detect(&message), first.kind);
    }

    #[test]
    fn prop_catalog_changes_text_not_kind(message in ".{0,60}") {
        prop_assert_eq!(
            classify(&message).kind,
            classify_with(&message, &DutchCatalog).kind
        );
    }

    #[test]
    fn prop_extra_markers_keep_precedence(kind in status_kind(), prefix in words()) {
        let classifier = Classifier::new().with_network_marker("connection refused");
        let message = format!("{} connection refused {}", prefix, kind.status_code().unwrap());

        prop_assert_eq!(classifier.detect(&message), kind);
    }
}

#[test]
fn test_rate_limited_scenario() {
    let category = classify(&"Request failed: 429 Too Many Requests");

    assert_eq!(category.kind, ErrorKind::RateLimited);
    assert_eq!(category.help_reference, None);
    assert!(category.is_retryable());
}

#[test]
fn test_std_io_error_is_classified_by_message() {
    let error = std::io::Error::other("NetworkError when attempting to fetch resource.");
    assert_eq!(classify(&error).kind, ErrorKind::NetworkError);
}
