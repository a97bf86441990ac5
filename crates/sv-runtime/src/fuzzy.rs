use std::collections::HashMap;

/// Lowercases, drops punctuation and collapses whitespace. Braces survive so
/// slot placeholders stay recognizable.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '{' || ch == '}' || ch == '*' || ch == '\'' {
                ch
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sørensen–Dice coefficient over character bigrams, ignoring whitespace.
pub fn similarity(left: &str, right: &str) -> f64 {
    let left = left.chars().filter(|ch| !ch.is_whitespace()).collect::<Vec<_>>();
    let right = right.chars().filter(|ch| !ch.is_whitespace()).collect::<Vec<_>>();
    if left == right {
        return 1.0;
    }
    if left.len() < 2 || right.len() < 2 {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for pair in left.windows(2) {
        *counts.entry((pair[0], pair[1])).or_default() += 1;
    }

    let mut shared = 0usize;
    for pair in right.windows(2) {
        if let Some(count) = counts.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    (2 * shared) as f64 / (left.len() - 1 + right.len() - 1) as f64
}

#[cfg(test)]
mod fuzzy_tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Open the DOOR!  "), "open the door");
        assert_eq!(normalize("drink {bottles}"), "drink {bottles}");
    }

    #[test]
    fn similarity_scores_near_misses_high() {
        assert_eq!(similarity("north", "north"), 1.0);
        assert!(similarity("go north", "go nroth") < 0.8);
        assert!(similarity("open the door", "open the doors") > 0.9);
        assert_eq!(similarity("a", "b"), 0.0);
        assert!(similarity("left", "right") < 0.5);
    }
}
