use std::collections::BTreeSet;

use strsim::normalized_levenshtein;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub fn normalize_text(input: &str) -> String {
    let folded = input
        .to_lowercase()
        .nfkd()
        .filter(|character| !is_combining_mark(*character))
        .collect::<String>();
    condense_whitespace(&folded)
}

pub fn condense_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn tokens(input: &str) -> Vec<String> {
    normalize_text(input)
        .split(|character: char| !character.is_alphanumeric())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn token_text(input: &str) -> String {
    tokens(input).join(" ")
}

pub fn jaccard(left: &[String], right: &[String]) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let left = left.iter().collect::<BTreeSet<&String>>();
    let right = right.iter().collect::<BTreeSet<&String>>();
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union.max(1) as f64
}

pub fn token_set_ratio(left: &str, right: &str) -> f64 {
    let left_tokens = tokens(left).into_iter().collect::<BTreeSet<String>>();
    let right_tokens = tokens(right).into_iter().collect::<BTreeSet<String>>();
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }

    let shared = left_tokens
        .intersection(&right_tokens)
        .cloned()
        .collect::<Vec<String>>();
    let left_only = left_tokens
        .difference(&right_tokens)
        .cloned()
        .collect::<Vec<String>>();
    let right_only = right_tokens
        .difference(&left_tokens)
        .cloned()
        .collect::<Vec<String>>();

    if !shared.is_empty() && (left_only.is_empty() || right_only.is_empty()) {
        return 1.0;
    }

    let shared_text = shared.join(" ");
    let left_text = join_nonempty(&shared_text, &left_only.join(" "));
    let right_text = join_nonempty(&shared_text, &right_only.join(" "));

    if shared.is_empty() {
        return normalized_levenshtein(&left_text, &right_text);
    }

    normalized_levenshtein(&shared_text, &left_text)
        .max(normalized_levenshtein(&shared_text, &right_text))
        .max(normalized_levenshtein(&left_text, &right_text))
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

pub fn last_chars(input: &str, count: usize) -> &str {
    let total = input.chars().count();
    if total <= count {
        return input;
    }
    let skip = total - count;
    let offset = input
        .char_indices()
        .nth(skip)
        .map(|(index, _)| index)
        .unwrap_or(input.len());
    &input[offset..]
}

pub fn first_chars(input: &str, count: usize) -> &str {
    let offset = input
        .char_indices()
        .nth(count)
        .map(|(index, _)| index)
        .unwrap_or(input.len());
    &input[..offset]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_romanian_diacritics() {
        assert_eq!(normalize_text("  Către   Autoritatea Ţării "), "catre autoritatea tarii");
        assert_eq!(normalize_text("Subsemnatul ȘTEFAN"), "subsemnatul stefan");
    }

    #[test]
    fn tokens_drop_blank_runs_and_punctuation() {
        assert_eq!(
            tokens("Subsemnatul ______, reprezentant al ....."),
            vec!["subsemnatul", "reprezentant", "al"]
        );
    }

    #[test]
    fn token_set_ratio_rewards_contained_token_sets() {
        assert_eq!(token_set_ratio("data completarii", "Data completarii formularului"), 1.0);
        let partial = token_set_ratio("subsemnatul reprezentant al", "nume reprezentant");
        assert!(partial > 0.5 && partial < 1.0, "partial overlap was {partial}");
        assert!(token_set_ratio("observatii", "nume reprezentant") < 0.4);
        assert_eq!(token_set_ratio("", "anything"), 0.0);
    }

    #[test]
    fn jaccard_counts_distinct_tokens() {
        let left = tokens("a b c");
        let right = tokens("b c d");
        assert!((jaccard(&left, &right) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&left, &[]), 0.0);
    }

    #[test]
    fn char_windows_respect_utf8_boundaries() {
        assert_eq!(last_chars("ăîșț", 2), "șț");
        assert_eq!(first_chars("ăîșț", 3), "ăîș");
        assert_eq!(first_chars("ab", 5), "ab");
    }
}
