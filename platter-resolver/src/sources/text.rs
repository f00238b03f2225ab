//! Title/artist normalization and string similarity

use once_cell::sync::Lazy;
use regex::Regex;

/// Disambiguation suffixes like "(2)" or "(rapper)"
static DISAMBIGUATION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\s*\(\d+\)\s*$|\s*\([^)]*(?:rapper|singer|artist|band|musician|producer|dj|DJ)\)\s*$",
    )
    .expect("valid disambiguation regex")
});

/// Edition suffixes like "(Remastered)" or "(Deluxe Edition)"
static EDITION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*\((?:[^)]*\s)?(?:remaster(?:ed)?|digital|deluxe|bonus|anniversary|expanded|special|collector|limited|edition|version|mix|remix|mono|stereo|selected works|works|hits|best of|greatest|complete|original|enhanced)(?:\s[^)]*)?\)\s*$",
    )
    .expect("valid edition regex")
});

/// Strip artist disambiguation suffixes
pub fn normalize_artist(name: &str) -> String {
    DISAMBIGUATION_SUFFIX.replace_all(name, "").trim().to_string()
}

/// Strip edition suffixes; stacked suffixes ("(Remastered) (Deluxe)") need up to three passes
pub fn normalize_title(title: &str) -> String {
    let mut normalized = title.trim().to_string();
    for _ in 0..3 {
        let next = EDITION_SUFFIX.replace_all(&normalized, "").trim().to_string();
        if next == normalized {
            break;
        }
        normalized = next;
    }
    normalized
}

/// Case-insensitive Levenshtein similarity in `[0, 1]`
///
/// Equal strings score 1.0; an empty side scores 0.0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = strsim::levenshtein(&a, &b);
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - distance as f64 / max_len as f64
}

/// Title/artist agreement of a lookup result with the query (title 0.6, artist 0.4)
pub fn calculate_match_score(
    search_title: &str,
    search_artist: &str,
    result_title: &str,
    result_artist: &str,
) -> f64 {
    let title_score = string_similarity(&normalize_title(search_title), &normalize_title(result_title));
    let artist_score =
        string_similarity(&normalize_artist(search_artist), &normalize_artist(result_artist));
    title_score * 0.6 + artist_score * 0.4
}
