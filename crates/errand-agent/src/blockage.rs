//! Detects pages that need a human (bot checks, CAPTCHAs).

use std::fmt;

use crate::config::BlockageConfig;

/// Why a page was judged blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blockage {
    /// One of the configured phrases appears on the page
    Phrase(String),
    /// The keyword appears on a page too short to be real content
    ShortPage { chars: usize },
}

impl fmt::Display for Blockage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blockage::Phrase(p) => write!(f, "page says \"{}\"", p),
            Blockage::ShortPage { chars } => write!(f, "captcha on a {}-char page", chars),
        }
    }
}

/// Check the page text against the configured signals.
pub fn detect(text: &str, config: &BlockageConfig) -> Option<Blockage> {
    let lower = text.to_lowercase();

    if let Some(phrase) = config
        .phrases
        .iter()
        .find(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
    {
        return Some(Blockage::Phrase(phrase.clone()));
    }

    let chars = text.chars().count();
    let keyword = config.keyword.to_lowercase();
    if !keyword.is_empty() && lower.contains(&keyword) && chars < config.short_page_chars {
        return Some(Blockage::ShortPage { chars });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_match_is_case_insensitive() {
        let found = detect("Please Verify You Are Human to continue", &BlockageConfig::default());
        assert_eq!(found, Some(Blockage::Phrase("verify you are human".into())));
    }

    #[test]
    fn test_keyword_on_short_page() {
        let found = detect("Complete the CAPTCHA below", &BlockageConfig::default());
        assert!(matches!(found, Some(Blockage::ShortPage { .. })));
    }

    #[test]
    fn test_keyword_on_long_page_is_ignored() {
        let text = format!("{} our captcha policy", "article text ".repeat(200));
        assert!(detect(&text, &BlockageConfig::default()).is_none());
    }

    #[test]
    fn test_configured_signals_ignore_case() {
        let config = BlockageConfig {
            phrases: vec!["Access Denied".into()],
            keyword: "CAPTCHA".into(),
            ..BlockageConfig::default()
        };
        assert_eq!(
            detect("access denied by the firewall", &config),
            Some(Blockage::Phrase("Access Denied".into()))
        );
        assert!(matches!(
            detect("solve the captcha", &config),
            Some(Blockage::ShortPage { .. })
        ));
    }

    #[test]
    fn test_ordinary_page() {
        assert!(detect("Search results for ramen", &BlockageConfig::default()).is_none());
    }
}
