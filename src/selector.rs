//! Which document, and which language.

use crate::{
    error::ValidationError,
    model::{DEFAULT_LANGUAGE, DocumentSource, Language, LanguageCode},
    prelude::*,
};

/// Where we are with the language catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Catalog {
    /// Not requested yet.
    #[default]
    NotLoaded,

    /// Fetch in progress.
    Loading,

    /// The service's languages, in the order it sent them.
    Loaded(Vec<Language>),

    /// The fetch failed. Processing is disabled until it is retried.
    Unavailable(String),
}

impl Catalog {
    /// Is `code` in the loaded catalog?
    pub fn contains(&self, code: &str) -> bool {
        match self {
            Catalog::Loaded(languages) => languages.iter().any(|lang| lang.code == code),
            _ => false,
        }
    }

    /// The loaded languages, if any.
    pub fn languages(&self) -> &[Language] {
        match self {
            Catalog::Loaded(languages) => languages,
            _ => &[],
        }
    }
}

/// Holds the user's current choice of source and language.
///
/// Only one source may be set at a time. Setting a file while a URL is set
/// (or the reverse) is refused, mirroring a UI that disables the other input;
/// call [`clear_source`](Self::clear_source) to switch.
#[derive(Debug, Default)]
pub struct InputSelector {
    source: Option<DocumentSource>,
    language: Option<LanguageCode>,
    catalog: Catalog,
}

impl InputSelector {
    pub fn source(&self) -> Option<&DocumentSource> {
        self.source.as_ref()
    }

    pub fn language(&self) -> Option<&LanguageCode> {
        self.language.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Select a local file.
    pub fn set_local_file(
        &mut self,
        payload: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<(), ValidationError> {
        if matches!(self.source, Some(DocumentSource::RemoteUrl(_))) {
            return Err(ValidationError::SourceConflict);
        }
        self.source = Some(DocumentSource::local_file(payload, filename)?);
        Ok(())
    }

    /// Select a remote URL.
    pub fn set_remote_url(&mut self, url: impl Into<String>) -> Result<(), ValidationError> {
        if matches!(self.source, Some(DocumentSource::LocalFile { .. })) {
            return Err(ValidationError::SourceConflict);
        }
        self.source = Some(DocumentSource::remote_url(url)?);
        Ok(())
    }

    /// Forget the current source, whichever kind it is.
    pub fn clear_source(&mut self) {
        self.source = None;
    }

    /// Choose a language. Codes outside the loaded catalog are ignored, and
    /// `false` is returned.
    pub fn set_language(&mut self, code: &str) -> bool {
        if self.catalog.contains(code) {
            self.language = Some(LanguageCode::new(code));
            true
        } else {
            debug!(code, "ignoring language that is not in the catalog");
            false
        }
    }

    pub(crate) fn catalog_loading(&mut self) {
        self.catalog = Catalog::Loading;
    }

    /// Install a freshly fetched catalog. Keeps the current language if it is
    /// still offered, otherwise falls back to [`DEFAULT_LANGUAGE`] when present.
    pub(crate) fn catalog_loaded(&mut self, languages: Vec<Language>) {
        self.catalog = Catalog::Loaded(languages);
        let keep = self
            .language
            .as_ref()
            .is_some_and(|code| self.catalog.contains(code.as_str()));
        if !keep {
            self.language = self
                .catalog
                .contains(DEFAULT_LANGUAGE)
                .then(|| LanguageCode::new(DEFAULT_LANGUAGE));
        }
    }

    pub(crate) fn catalog_failed(&mut self, message: String) {
        self.catalog = Catalog::Unavailable(message);
        self.language = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang(code: &str, name: &str) -> Language {
        Language {
            code: code.to_owned(),
            name: name.to_owned(),
            script: "Latin".to_owned(),
        }
    }

    #[test]
    fn english_is_preselected_when_offered() {
        let mut selector = InputSelector::default();
        selector.catalog_loaded(vec![lang("eng", "English"), lang("fra", "French")]);
        assert_eq!(selector.language(), Some(&LanguageCode::new("eng")));
    }

    #[test]
    fn nothing_is_preselected_without_english() {
        let mut selector = InputSelector::default();
        selector.catalog_loaded(vec![lang("fra", "French"), lang("deu", "German")]);
        assert_eq!(selector.language(), None);
    }

    #[test]
    fn languages_must_come_from_the_catalog() {
        let mut selector = InputSelector::default();
        assert!(!selector.set_language("fra"));
        assert_eq!(selector.language(), None);

        selector.catalog_loaded(vec![lang("eng", "English"), lang("fra", "French")]);
        assert!(selector.set_language("fra"));
        assert!(!selector.set_language("klingon"));
        assert_eq!(selector.language(), Some(&LanguageCode::new("fra")));
    }

    #[test]
    fn catalog_failure_clears_language() {
        let mut selector = InputSelector::default();
        selector.catalog_loaded(vec![lang("eng", "English")]);
        selector.catalog_failed("connection refused".to_owned());
        assert_eq!(selector.language(), None);
        assert!(!selector.set_language("eng"));
    }

    #[test]
    fn sources_are_mutually_exclusive() {
        let mut selector = InputSelector::default();
        selector
            .set_remote_url("https://example.org/book.djvu")
            .unwrap();
        assert_eq!(
            selector.set_local_file(vec![1], "scan.pdf"),
            Err(ValidationError::SourceConflict)
        );
        assert!(matches!(
            selector.source(),
            Some(DocumentSource::RemoteUrl(_))
        ));

        selector.clear_source();
        selector.set_local_file(vec![1], "scan.pdf").unwrap();
        assert_eq!(
            selector.set_remote_url("https://example.org/book.djvu"),
            Err(ValidationError::SourceConflict)
        );
        assert!(matches!(
            selector.source(),
            Some(DocumentSource::LocalFile { .. })
        ));

        // Replacing a source with another of the same kind is fine.
        selector.set_local_file(vec![2], "other.png").unwrap();
        assert!(matches!(
            selector.source(),
            Some(DocumentSource::LocalFile { filename, .. }) if filename == "other.png"
        ));
    }
}
