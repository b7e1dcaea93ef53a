//! Language detection restricted to the supported languages

use whatlang::{Detector, Lang};

use crate::types::Language;

/// Detect the language of a text, accepting only English and French
///
/// A reliable detection of any other language rejects the text. When the
/// detector is unsure (short or mixed text), English and French are scored
/// against each other instead.
pub fn detect_language(text: &str) -> Option<Language> {
    let info = whatlang::detect(text)?;
    let lang = match info.lang() {
        Lang::Eng | Lang::Fra => info.lang(),
        _ if info.is_reliable() => return None,
        _ => Detector::with_allowlist(vec![Lang::Eng, Lang::Fra]).detect_lang(text)?,
    };
    match lang {
        Lang::Eng => Some(Language::English),
        Lang::Fra => Some(Language::French),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_supported_languages() {
        assert_eq!(
            detect_language("The annual report describes how the company improved its services for customers \
             and why the board expects stronger growth during the next financial year"),
            Some(Language::English)
        );
        assert_eq!(
            detect_language("Le rapport annuel explique comment la societe a ameliore ses services pour les clients \
             et pourquoi le conseil attend une croissance plus forte pendant la prochaine annee"),
            Some(Language::French)
        );
    }

    #[test]
    fn test_rejects_other_languages() {
        assert_eq!(
            detect_language("Der Jahresbericht beschreibt, wie das Unternehmen seine Dienstleistungen für die Kunden \
             verbessert hat und warum der Vorstand im nächsten Geschäftsjahr ein stärkeres Wachstum erwartet"),
            None
        );
        assert_eq!(detect_language(""), None);
    }

    #[test]
    fn test_unsure_detection_falls_back_to_supported_languages() {
        let short = "merci beaucoup";
        if whatlang::detect(short).is_some_and(|info| !info.is_reliable()) {
            assert!(detect_language(short).is_some());
        }
    }
}
