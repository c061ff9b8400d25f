//! # Supported Languages
//!
//! The fixed set of transcription languages the relay accepts, and the
//! resolution rule for the `lang` query parameter: any missing, unknown,
//! or malformed value falls back to Arabic. Language resolution is never
//! allowed to abort connection setup.

use serde::{Deserialize, Serialize};

/// Transcription languages supported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Arabic,
    English,
    French,
    German,
    Spanish,
    Italian,
    Portuguese,
    Russian,
    Turkish,
    Hindi,
    Urdu,
}

impl Language {
    /// All supported languages, in no particular order.
    pub const ALL: [Language; 11] = [
        Language::Arabic,
        Language::English,
        Language::French,
        Language::German,
        Language::Spanish,
        Language::Italian,
        Language::Portuguese,
        Language::Russian,
        Language::Turkish,
        Language::Hindi,
        Language::Urdu,
    ];

    /// The ISO 639-1 code sent to the upstream provider.
    pub const fn code(&self) -> &'static str {
        match self {
            Language::Arabic => "ar",
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Spanish => "es",
            Language::Italian => "it",
            Language::Portuguese => "pt",
            Language::Russian => "ru",
            Language::Turkish => "tr",
            Language::Hindi => "hi",
            Language::Urdu => "ur",
        }
    }

    /// Look up a language by its code. Unknown codes return None.
    pub fn from_code(code: &str) -> Option<Language> {
        Language::ALL.iter().copied().find(|l| l.code() == code)
    }

    /// Resolve an optional `lang` parameter to a supported language.
    ///
    /// ## Fallback policy:
    /// Missing and unrecognized values both resolve to the default (Arabic).
    pub fn resolve(code: Option<&str>) -> Language {
        code.and_then(Language::from_code).unwrap_or_default()
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Arabic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_code_round_trips() {
        for lang in Language::ALL {
            assert_eq!(Language::from_code(lang.code()), Some(lang));
            assert_eq!(Language::resolve(Some(lang.code())), lang);
        }
    }

    #[test]
    fn test_supported_set_has_eleven_codes() {
        assert_eq!(Language::ALL.len(), 11);
    }

    #[test]
    fn test_unknown_code_falls_back_to_arabic() {
        assert_eq!(Language::resolve(Some("zz")), Language::Arabic);
        assert_eq!(Language::resolve(Some("")), Language::Arabic);
        assert_eq!(Language::resolve(Some("EN")), Language::Arabic);
    }

    #[test]
    fn test_missing_code_falls_back_to_arabic() {
        assert_eq!(Language::resolve(None), Language::Arabic);
    }
}
