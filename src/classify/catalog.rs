//! Display text for error categories.
//!
//! Text is decoupled from detection: a [`Catalog`] turns an [`ErrorKind`]
//! into the strings a UI shows. The application itself is Dutch, so a
//! [`DutchCatalog`] ships next to the English default.

use super::ErrorKind;

/// Display text for one error kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Short heading.
    pub title: String,
    /// One-sentence explanation.
    pub message: String,
    /// What the user can do about it.
    pub remedy: String,
    /// Opaque link identifier for further help.
    pub help_reference: Option<String>,
}

impl CatalogEntry {
    /// Create an entry without a help reference.
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            remedy: remedy.into(),
            help_reference: None,
        }
    }

    /// Attach a help reference.
    pub fn with_help(mut self, reference: impl Into<String>) -> Self {
        self.help_reference = Some(reference.into());
        self
    }
}

/// Source of display text for error kinds.
///
/// Implementations must be total: every kind gets an entry.
pub trait Catalog {
    /// Text for `kind`.
    fn entry(&self, kind: ErrorKind) -> CatalogEntry;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn entry(&self, kind: ErrorKind) -> CatalogEntry {
        (**self).entry(kind)
    }
}

/// English text. The default catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnglishCatalog;

impl Catalog for EnglishCatalog {
    fn entry(&self, kind: ErrorKind) -> CatalogEntry {
        match kind {
            ErrorKind::Unauthorized => CatalogEntry::new(
                "Not logged in",
                "You need to be logged in to see this page.",
                "Log in and try again.",
            )
            .with_help("login"),
            ErrorKind::Forbidden => CatalogEntry::new(
                "No access",
                "You do not have permission to do this.",
                "Ask the administrator of your activity center for access.",
            ),
            ErrorKind::NotFound => CatalogEntry::new(
                "Not found",
                "The page or item you are looking for does not exist.",
                "Check the address or go back to the overview.",
            )
            .with_help("home"),
            ErrorKind::RateLimited => CatalogEntry::new(
                "Too many requests",
                "You have made too many requests in a short time.",
                "Wait a moment and try again.",
            ),
            ErrorKind::ServerError => CatalogEntry::new(
                "Server error",
                "Something went wrong on our side.",
                "Try again later. If it keeps happening, contact us.",
            )
            .with_help("contact"),
            ErrorKind::NetworkError => CatalogEntry::new(
                "No connection",
                "We could not reach the server.",
                "Check your internet connection and try again.",
            ),
            ErrorKind::Unknown => CatalogEntry::new(
                "Something went wrong",
                "An unexpected error occurred.",
                "Try again. If it keeps happening, contact us.",
            ),
        }
    }
}

/// Dutch text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DutchCatalog;

impl Catalog for DutchCatalog {
    fn entry(&self, kind: ErrorKind) -> CatalogEntry {
        match kind {
            ErrorKind::Unauthorized => CatalogEntry::new(
                "Niet ingelogd",
                "Je moet ingelogd zijn om deze pagina te bekijken.",
                "Log in en probeer het opnieuw.",
            )
            .with_help("login"),
            ErrorKind::Forbidden => CatalogEntry::new(
                "Geen toegang",
                "Je hebt geen toestemming om dit te doen.",
                "Vraag de beheerder van je buurthuis om toegang.",
            ),
            ErrorKind::NotFound => CatalogEntry::new(
                "Niet gevonden",
                "De pagina of het item dat je zoekt bestaat niet.",
                "Controleer het adres of ga terug naar het overzicht.",
            )
            .with_help("home"),
            ErrorKind::RateLimited => CatalogEntry::new(
                "Te veel verzoeken",
                "Je hebt in korte tijd te veel verzoeken gedaan.",
                "Wacht even en probeer het opnieuw.",
            ),
            ErrorKind::ServerError => CatalogEntry::new(
                "Serverfout",
                "Er ging iets mis aan onze kant.",
                "Probeer het later opnieuw. Blijft het misgaan, neem dan contact op.",
            )
            .with_help("contact"),
            ErrorKind::NetworkError => CatalogEntry::new(
                "Geen verbinding",
                "We konden de server niet bereiken.",
                "Controleer je internetverbinding en probeer het opnieuw.",
            ),
            ErrorKind::Unknown => CatalogEntry::new(
                "Er ging iets mis",
                "Er is een onverwachte fout opgetreden.",
                "Probeer het opnieuw. Blijft het misgaan, neem dan contact op.",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_text() {
        for kind in ErrorKind::ALL {
            for entry in [EnglishCatalog.entry(kind), DutchCatalog.entry(kind)] {
                assert!(!entry.title.is_empty());
                assert!(!entry.message.is_empty());
                assert!(!entry.remedy.is_empty());
            }
        }
    }

    #[test]
    fn test_help_references_agree_across_languages() {
        for kind in ErrorKind::ALL {
            assert_eq!(
                EnglishCatalog.entry(kind).help_reference,
                DutchCatalog.entry(kind).help_reference
            );
        }
    }

    #[test]
    fn test_catalog_by_reference() {
        let catalog: &dyn Catalog = &DutchCatalog;
        assert_eq!(catalog.entry(ErrorKind::Forbidden).title, "Geen toegang");
    }
}
