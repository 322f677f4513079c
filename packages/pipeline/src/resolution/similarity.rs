//! Name normalization and string similarity for entity matching.

use super::models::EntityType;

const PERSON_HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "dr", "prof", "sir", "madam", "rev", "hon",
];

/// Canonical comparison form of an entity name: case-folded, whitespace
/// collapsed, punctuation stripped. Person names additionally drop
/// leading honorifics so "Dr. John Smith" and "john smith" collide.
pub fn normalize(name: &str, entity_type: EntityType) -> String {
    let lowered = name.to_lowercase();

    let mut tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
        .filter(|t| !t.is_empty())
        .collect();

    if entity_type == EntityType::Person {
        while let Some(first) = tokens.first() {
            if PERSON_HONORIFICS.contains(first) {
                tokens.remove(0);
            } else {
                break;
            }
        }
    }

    tokens.join(" ")
}

/// Jaro similarity between two strings in [0, 1].
fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut j = 0usize;
    for (i, _) in a.iter().enumerate() {
        if a_matched[i] {
            while !b_matched[j] {
                j += 1;
            }
            if a[i] != b[j] {
                transpositions += 1;
            }
            j += 1;
        }
    }

    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64 / 2.0) / m) / 3.0
}

/// Jaro-Winkler: Jaro boosted by a shared prefix of up to 4 chars.
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let base = jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();

    base + prefix as f64 * 0.1 * (1.0 - base)
}

/// Jaccard similarity over whitespace tokens. Catches reorderings like
/// "Smith, John" vs "John Smith" that edit-distance scores poorly.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let a_tokens: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let b_tokens: std::collections::HashSet<&str> = b.split_whitespace().collect();

    if a_tokens.is_empty() && b_tokens.is_empty() {
        return 1.0;
    }

    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    intersection as f64 / union as f64
}

/// Composite match score: the better of character-level and token-level
/// similarity over normalized names.
pub fn match_score(a: &str, b: &str) -> f64 {
    jaro_winkler(a, b).max(token_jaccard(a, b))
}

/// Abbreviation-aware comparison for person names: "j. smith" should
/// match "john smith" when the initial and surname line up.
pub fn initials_match(a: &str, b: &str) -> bool {
    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();

    if a_tokens.len() != b_tokens.len() || a_tokens.is_empty() {
        return false;
    }

    a_tokens.iter().zip(b_tokens.iter()).all(|(x, y)| {
        if x == y {
            return true;
        }
        let (short, long) = if x.len() < y.len() { (x, y) } else { (y, x) };
        short.len() == 1 && long.starts_with(short)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("  John   SMITH ", EntityType::Person),
            "john smith"
        );
    }

    #[test]
    fn normalize_strips_person_honorifics() {
        assert_eq!(normalize("Dr. John Smith", EntityType::Person), "john smith");
        // Honorifics stay for non-person types.
        assert_eq!(
            normalize("Dr. Pepper Inc", EntityType::Organization),
            "dr pepper inc"
        );
    }

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(jaro_winkler("acme corp", "acme corp"), 1.0);
        assert_eq!(token_jaccard("acme corp", "acme corp"), 1.0);
    }

    #[test]
    fn disjoint_strings_score_low() {
        assert!(match_score("zzz qqq", "acme corp") < 0.5);
    }

    #[test]
    fn reordered_tokens_still_match() {
        assert!(token_jaccard("smith john", "john smith") == 1.0);
    }

    #[test]
    fn near_miss_scores_above_threshold() {
        assert!(jaro_winkler("acme corporation", "acme corpration") >= 0.8);
    }

    #[test]
    fn initials_match_abbreviated_first_name() {
        assert!(initials_match("j smith", "john smith"));
        assert!(!initials_match("j smith", "jane doe"));
    }
}
