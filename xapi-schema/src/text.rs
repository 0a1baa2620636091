//! Text-leaf tokenisation: whitespace splitting, lowercasing, stop-word
//! removal and stemming, gated per field by [`StopStrategy`]/[`StemStrategy`]
//! and `stem_language` the way the schema's text detection configures a
//! field's analysis chain.

use crate::field_spec::{StemStrategy, StopStrategy};
use once_cell::sync::Lazy;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;

/// A short, common-word stop list per supported language. Only a few
/// languages are seeded; unrecognised `stem_language` values fall back to
/// English.
fn stopwords(language: &str) -> &'static HashSet<&'static str> {
    static ENGLISH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        [
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in",
            "is", "it", "its", "of", "on", "that", "the", "to", "was", "will", "with",
        ]
        .into_iter()
        .collect()
    });
    static SPANISH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        ["de", "la", "que", "el", "en", "y", "a", "los", "del", "se", "las", "por", "un", "para", "con", "no", "una", "su", "al", "lo"]
            .into_iter()
            .collect()
    });
    static FRENCH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        ["le", "la", "les", "de", "des", "un", "une", "et", "est", "en", "du", "au", "aux", "ce", "que", "qui", "dans", "pour", "sur", "pas"]
            .into_iter()
            .collect()
    });
    match language {
        "spanish" | "es" => &SPANISH,
        "french" | "fr" => &FRENCH,
        _ => &ENGLISH,
    }
}

fn algorithm(language: &str) -> Algorithm {
    match language {
        "spanish" | "es" => Algorithm::Spanish,
        "french" | "fr" => Algorithm::French,
        "german" | "de" => Algorithm::German,
        "portuguese" | "pt" => Algorithm::Portuguese,
        "italian" | "it" => Algorithm::Italian,
        "dutch" | "nl" => Algorithm::Dutch,
        "russian" | "ru" => Algorithm::Russian,
        _ => Algorithm::English,
    }
}

/// Tokenises `text` per the field's stop/stem configuration: splits on
/// whitespace, lowercases, drops stop words (when the stop strategy
/// filters them) and stems the remainder (when the stem strategy asks
/// for it). `StopStrategy::StemAll` additionally stems stop words rather
/// than dropping them, matching the source's "stem everything" mode.
pub fn tokenise(text: &str, stop_strategy: StopStrategy, stem_strategy: StemStrategy, language: Option<&str>) -> Vec<String> {
    let language = language.unwrap_or("english");
    let stops = stopwords(language);
    let stemmer = matches!(stem_strategy, StemStrategy::Stemmed | StemStrategy::StemmedWords)
        .then(|| Stemmer::create(algorithm(language)));

    let mut out = Vec::new();
    for raw in text.split_whitespace() {
        let lower = raw.to_lowercase();
        let is_stop = stops.contains(lower.as_str());
        match stop_strategy {
            StopStrategy::StopOnly if is_stop => continue,
            StopStrategy::StemAll if is_stop => {
                out.push(stemmer.as_ref().map(|s| s.stem(&lower).to_string()).unwrap_or(lower));
                continue;
            }
            _ => {}
        }
        let token = match &stemmer {
            Some(s) => s.stem(&lower).to_string(),
            None => lower,
        };
        out.push(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_only_drops_common_words_without_stemming() {
        let tokens = tokenise("the cats are running", StopStrategy::StopOnly, StemStrategy::None, None);
        assert_eq!(tokens, vec!["cats", "running"]);
    }

    #[test]
    fn stemmed_reduces_words_to_a_common_root() {
        let tokens = tokenise("running runner runs", StopStrategy::None, StemStrategy::Stemmed, None);
        assert_eq!(tokens[0], tokens[2]);
    }

    #[test]
    fn stem_all_strategy_also_stems_retained_stop_words() {
        let tokens = tokenise("the running", StopStrategy::StemAll, StemStrategy::Stemmed, None);
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn none_strategy_only_lowercases() {
        let tokens = tokenise("Running FAST", StopStrategy::None, StemStrategy::None, None);
        assert_eq!(tokens, vec!["running", "fast"]);
    }

    #[test]
    fn spanish_language_uses_spanish_stopwords_and_stemmer() {
        let tokens = tokenise("el gato corre", StopStrategy::StopOnly, StemStrategy::Stemmed, Some("spanish"));
        assert!(!tokens.contains(&"el".to_string()));
    }
}
