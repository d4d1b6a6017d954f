//! Shared text normalization and comparison utilities
//!
//! Title similarity is only ever a tie-break between releases of the same
//! episode; hard accept/reject decisions use [`titles_match_by_word_prefix`].

/// Punctuation ignored when scoring title similarity.
pub const DEFAULT_IGNORED_CHARS: &str = ",.;:-()[]'\"!?";

/// Split a title into lower-case alphanumeric words.
///
/// Every non-alphanumeric character acts as a separator, so
/// `"Kaguya-sama: Love"` becomes `["kaguya", "sama", "love"]`.
pub fn normalize_title_words(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether two titles agree word-for-word over the length of the shorter one.
///
/// Case, punctuation and spacing are ignored. Empty titles never match.
pub fn titles_match_by_word_prefix(a: &str, b: &str) -> bool {
    let a = normalize_title_words(a);
    let b = normalize_title_words(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    longer.starts_with(shorter)
}

fn strip_ignored(s: &str, ignored_chars: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !ignored_chars.contains(*c))
        .collect()
}

/// Case-insensitive similarity in `[0, 1]` based on Levenshtein distance.
///
/// Characters in `ignored_chars` are removed before comparing. Two empty
/// strings are identical.
pub fn similarity(a: &str, b: &str, ignored_chars: &str) -> f64 {
    let a = strip_ignored(a, ignored_chars);
    let b = strip_ignored(b, ignored_chars);

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = strsim::levenshtein(&a, &b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Highest similarity between `title` and any of the known alternates.
pub fn best_similarity<S: AsRef<str>>(title: &str, known: &[S]) -> f64 {
    known
        .iter()
        .map(|k| similarity(title, k.as_ref(), DEFAULT_IGNORED_CHARS))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_words() {
        assert_eq!(
            normalize_title_words("Kaguya-sama: Love Is War"),
            vec!["kaguya", "sama", "love", "is", "war"]
        );
        assert_eq!(normalize_title_words("  Sousou   no Frieren "), vec!["sousou", "no", "frieren"]);
        assert!(normalize_title_words("--").is_empty());
    }

    #[test]
    fn test_titles_match_by_word_prefix() {
        assert!(titles_match_by_word_prefix("Sousou no Frieren", "sousou no frieren"));
        assert!(titles_match_by_word_prefix("Frieren", "Frieren: Beyond Journey's End"));
        assert!(titles_match_by_word_prefix("Kaguya-sama wa Kokurasetai", "Kaguya sama wa kokurasetai"));
        assert!(!titles_match_by_word_prefix("Frieren", "Sousou no Frieren"));
        assert!(!titles_match_by_word_prefix("Fire Force", "Firefly"));
        assert!(!titles_match_by_word_prefix("", "Frieren"));
    }

    #[test]
    fn test_similarity_identity() {
        for s in ["", "a", "Sousou no Frieren", "[SubsPlease] Show - 01"] {
            assert!((similarity(s, s, "") - 1.0).abs() < f64::EPSILON, "{s}");
        }
        assert!((similarity("", "", DEFAULT_IGNORED_CHARS) - 1.0).abs() < f64::EPSILON);
        assert!((similarity("...", "", DEFAULT_IGNORED_CHARS) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_similarity_ignores_case_and_punctuation() {
        assert!((similarity("Dr. STONE", "dr stone", DEFAULT_IGNORED_CHARS) - 1.0).abs() < 1e-9);
        assert!((similarity("hello", "hallo", "") - 0.8).abs() < 1e-9);
        assert!(similarity("abc", "xyz", "") < 0.5);
    }

    #[test]
    fn test_best_similarity() {
        let known = vec!["Sousou no Frieren", "Frieren: Beyond Journey's End"];
        assert!(best_similarity("Frieren Beyond Journeys End", &known) > 0.99);
        assert!(best_similarity("Frieren", &known) < 0.5);
        assert!(best_similarity("Sousou no Frieren", &known) > 0.99);
        assert_eq!(best_similarity("anything", &Vec::<String>::new()), 0.0);
    }
}
