//! Classification of failed operations into user-facing categories.
//!
//! The classifier is a pure, total function: every error maps to exactly one
//! [`ErrorKind`], and the display text is looked up in a [`Catalog`].
//!
//! # Examples
//!
//! ```rust
//! use samenactief_recovery::classify::{classify, ErrorKind};
//!
//! let category = classify(&"Request failed: 429 Too Many Requests");
//! assert_eq!(category.kind, ErrorKind::RateLimited);
//! assert_eq!(category.help_reference, None);
//! ```
//!
//! # Detection order
//!
//! The first matching signal wins:
//!
//! 1. `401` → [`ErrorKind::Unauthorized`]
//! 2. `403` → [`ErrorKind::Forbidden`]
//! 3. `404` → [`ErrorKind::NotFound`]
//! 4. `429` → [`ErrorKind::RateLimited`]
//! 5. `500` → [`ErrorKind::ServerError`]
//! 6. a network-failure marker → [`ErrorKind::NetworkError`]
//! 7. anything else → [`ErrorKind::Unknown`]

mod catalog;

pub use catalog::{Catalog, CatalogEntry, DutchCatalog, EnglishCatalog};

use std::fmt;

/// Markers that identify a request that never reached the server.
///
/// Matched case-insensitively as substrings of the error message.
pub const NETWORK_MARKERS: &[&str] = &["network error", "networkerror", "failed to fetch"];

const STATUS_SIGNALS: &[(&str, ErrorKind)] = &[
    ("401", ErrorKind::Unauthorized),
    ("403", ErrorKind::Forbidden),
    ("404", ErrorKind::NotFound),
    ("429", ErrorKind::RateLimited),
    ("500", ErrorKind::ServerError),
];

/// The category a failed operation falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// The user is not logged in (HTTP 401).
    Unauthorized,
    /// The user lacks permission (HTTP 403).
    Forbidden,
    /// The requested resource does not exist (HTTP 404).
    NotFound,
    /// Too many requests (HTTP 429).
    RateLimited,
    /// The server failed (HTTP 500).
    ServerError,
    /// The request never reached the server.
    NetworkError,
    /// Nothing recognizable in the error.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in detection order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::RateLimited,
        ErrorKind::ServerError,
        ErrorKind::NetworkError,
        ErrorKind::Unknown,
    ];

    /// Detect the kind of an error from its message using the default markers.
    ///
    /// ```rust
    /// use samenactief_recovery::classify::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::detect("HTTP 404 Not Found"), ErrorKind::NotFound);
    /// assert_eq!(ErrorKind::detect("TypeError: Failed to fetch"), ErrorKind::NetworkError);
    /// assert_eq!(ErrorKind::detect("something odd"), ErrorKind::Unknown);
    /// ```
    pub fn detect(message: &str) -> ErrorKind {
        detect_with_markers(message, NETWORK_MARKERS.iter().copied())
    }

    /// The HTTP status code this kind is detected from, if any.
    pub fn status_code(self) -> Option<u16> {
        match self {
            ErrorKind::Unauthorized => Some(401),
            ErrorKind::Forbidden => Some(403),
            ErrorKind::NotFound => Some(404),
            ErrorKind::RateLimited => Some(429),
            ErrorKind::ServerError => Some(500),
            ErrorKind::NetworkError | ErrorKind::Unknown => None,
        }
    }

    /// Returns true if retrying the same operation could plausibly succeed.
    ///
    /// Authentication, permission and missing-resource failures will not fix
    /// themselves; everything else might.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::NetworkError
                | ErrorKind::Unknown
        )
    }

    /// A stable snake_case identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn detect_with_markers<'a>(message: &str, markers: impl IntoIterator<Item = &'a str>) -> ErrorKind {
    if let Some((_, kind)) = STATUS_SIGNALS
        .iter()
        .find(|(code, _)| message.contains(code))
    {
        return *kind;
    }

    let lowered = message.to_lowercase();
    if markers
        .into_iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
    {
        return ErrorKind::NetworkError;
    }

    ErrorKind::Unknown
}

/// A classified error, ready to be shown to a user.
///
/// Produced fresh by every classification; holds no references to the
/// original error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorCategory {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Short heading.
    pub title: String,
    /// One-sentence explanation.
    pub message: String,
    /// What the user can do about it.
    pub remedy: String,
    /// Opaque link identifier for further help, e.g. a route name.
    pub help_reference: Option<String>,
}

impl ErrorCategory {
    /// Build a category for `kind` from a catalog entry.
    pub fn from_entry(kind: ErrorKind, entry: CatalogEntry) -> Self {
        Self {
            kind,
            title: entry.title,
            message: entry.message,
            remedy: entry.remedy,
            help_reference: entry.help_reference,
        }
    }

    /// Shorthand for `self.kind.is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Classify an error using the default markers and the English catalog.
///
/// Accepts anything with a `Display` impl: `std::error::Error` values,
/// strings, or HTTP client errors whose message embeds the status code.
pub fn classify<E: fmt::Display + ?Sized>(error: &E) -> ErrorCategory {
    classify_with(error, &EnglishCatalog)
}

/// Classify an error, taking display text from `catalog`.
///
/// ```rust
/// use samenactief_recovery::classify::{classify_with, DutchCatalog, ErrorKind};
///
/// let category = classify_with(&"401 Unauthorized", &DutchCatalog);
/// assert_eq!(category.kind, ErrorKind::Unauthorized);
/// assert_eq!(category.title, "Niet ingelogd");
/// ```
pub fn classify_with<E, C>(error: &E, catalog: &C) -> ErrorCategory
where
    E: fmt::Display + ?Sized,
    C: Catalog + ?Sized,
{
    let kind = ErrorKind::detect(&error.to_string());
    ErrorCategory::from_entry(kind, catalog.entry(kind))
}

/// A classifier with extra network-failure markers and its own catalog.
///
/// Extra markers only extend the network check; status codes still take
/// precedence.
///
/// ```rust
/// use samenactief_recovery::classify::{Classifier, ErrorKind};
///
/// let classifier = Classifier::new().with_network_marker("connection refused");
/// assert_eq!(
///     classifier.classify(&"Connection refused (os error 111)").kind,
///     ErrorKind::NetworkError
/// );
/// ```
pub struct Classifier<C = EnglishCatalog> {
    markers: Vec<String>,
    catalog: C,
}

impl Classifier<EnglishCatalog> {
    /// Classifier with the default markers and the English catalog.
    pub fn new() -> Self {
        Self::with_catalog(EnglishCatalog)
    }
}

impl Default for Classifier<EnglishCatalog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Catalog> Classifier<C> {
    /// Classifier with the default markers and a custom catalog.
    pub fn with_catalog(catalog: C) -> Self {
        Self {
            markers: NETWORK_MARKERS.iter().map(|m| m.to_string()).collect(),
            catalog,
        }
    }

    /// Add a network-failure marker.
    pub fn with_network_marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    /// Detect only the kind.
    pub fn detect(&self, message: &str) -> ErrorKind {
        detect_with_markers(message, self.markers.iter().map(String::as_str))
    }

    /// Classify an error.
    pub fn classify<E: fmt::Display + ?Sized>(&self, error: &E) -> ErrorCategory {
        let kind = self.detect(&error.to_string());
        ErrorCategory::from_entry(kind, self.catalog.entry(kind))
    }
}

impl<C> fmt::Debug for Classifier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "proptest")]
impl proptest::arbitrary::Arbitrary for ErrorKind {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        use proptest::strategy::Strategy;
        proptest::sample::select(ErrorKind::ALL.to_vec()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_codes_map_to_kinds() {
        assert_eq!(ErrorKind::detect("401 Unauthorized"), ErrorKind::Unauthorized);
        assert_eq!(ErrorKind::detect("status 403"), ErrorKind::Forbidden);
        assert_eq!(ErrorKind::detect("GET /centers/9: 404"), ErrorKind::NotFound);
        assert_eq!(
            ErrorKind::detect("Request failed: 429 Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::detect("500 Internal Server Error"),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_network_markers() {
        assert_eq!(ErrorKind::detect("Network Error"), ErrorKind::NetworkError);
        assert_eq!(
            ErrorKind::detect("TypeError: Failed to fetch"),
            ErrorKind::NetworkError
        );
        assert_eq!(
            ErrorKind::detect("NetworkError when attempting to fetch resource."),
            ErrorKind::NetworkError
        );
    }

    #[test]
    fn test_unknown_is_the_default() {
        assert_eq!(ErrorKind::detect(""), ErrorKind::Unknown);
        assert_eq!(ErrorKind::detect("boom"), ErrorKind::Unknown);
        assert_eq!(ErrorKind::detect("502 Bad Gateway"), ErrorKind::Unknown);
    }

    #[test]
    fn test_precedence_is_fixed() {
        // 401 beats 404 regardless of position in the message.
        assert_eq!(ErrorKind::detect("404 then 401"), ErrorKind::Unauthorized);
        assert_eq!(
            ErrorKind::detect("Network Error: 500"),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_rate_limited_has_no_help_reference() {
        let category = classify(&"Request failed: 429 Too Many Requests");
        assert_eq!(category.kind, ErrorKind::RateLimited);
        assert_eq!(category.help_reference, None);
    }

    #[test]
    fn test_classify_std_error() {
        let err = io::Error::new(io::ErrorKind::Other, "server said 403");
        assert_eq!(classify(&err).kind, ErrorKind::Forbidden);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let first = classify(&"Network Error");
        let second = classify(&"Network Error");
        assert_eq!(first, second);
    }

    #[test]
    fn test_classifier_extra_marker() {
        let classifier = Classifier::new().with_network_marker("ECONNRESET");
        assert_eq!(classifier.detect("read econnreset"), ErrorKind::NetworkError);
        assert_eq!(classifier.detect("ECONNRESET 401"), ErrorKind::Unauthorized);
        assert_eq!(ErrorKind::detect("read econnreset"), ErrorKind::Unknown);
    }

    #[test]
    fn test_status_code_round_trips_through_detect() {
        for kind in ErrorKind::ALL {
            if let Some(code) = kind.status_code() {
                assert_eq!(ErrorKind::detect(&format!("HTTP {}", code)), kind);
            }
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::Forbidden.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_category_display() {
        let category = classify(&"404");
        assert_eq!(
            category.to_string(),
            format!("{}: {}", category.title, category.message)
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(ErrorKind::NetworkError.to_string(), "network_error");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_category_serializes_null_help_reference() {
        let category = classify(&"429");
        let json = serde_json::to_value(&category).unwrap();
        assert_eq!(json["kind"], "rate_limited");
        assert!(json["help_reference"].is_null());
    }
}
