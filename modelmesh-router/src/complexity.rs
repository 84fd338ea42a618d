//! Task complexity scoring: four weighted factors
//! combined into a score in `[0, 1]`.

const KEYWORDS: &[&str] = &[
    "analyze",
    "implement",
    "optimize",
    "algorithm",
    "architecture",
    "debug",
];

const STRUCTURAL_TOKENS: &[&str] = &[
    "{", "}", "(", ")", "[", "]", "=>", "function", "class", "if", "for",
];

const DOMAIN_HINTS: &[&str] = &[
    "code",
    "api",
    "database",
    "security",
    "machine learning",
    "data science",
];

pub fn analyze(task: &str) -> f64 {
    let lower = task.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let word_count = words.len().max(1);

    let token_estimate = (task.len() as f64 / 4.0).ceil();
    let token_factor = (token_estimate / 1000.0).min(1.0) * 0.3;

    let keyword_matches = words.iter().filter(|w| KEYWORDS.contains(w)).count();
    let keyword_factor = (keyword_matches as f64 / 10.0).min(1.0) * 0.3;

    let structural_matches: usize = STRUCTURAL_TOKENS
        .iter()
        .map(|tok| lower.matches(tok).count())
        .sum();
    let structural_factor = (structural_matches as f64 / 15.0).min(1.0) * 0.3;

    let domain_bonus = if DOMAIN_HINTS.iter().any(|hint| lower.contains(hint)) {
        0.1
    } else {
        0.0
    };

    let _ = word_count;
    (token_factor + keyword_factor + structural_factor + domain_bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_task_scores_low() {
        let score = analyze("summarize report");
        assert!(score < 0.2, "expected a low score, got {score}");
    }

    #[test]
    fn keyword_heavy_task_scores_above_a_plain_one() {
        let plain = analyze("summarize report");
        let score = analyze(
            "implement and optimize distributed cache eviction algorithm with consistency guarantees",
        );
        assert!(score > plain, "expected {score} > {plain}");
    }

    #[test]
    fn structural_tokens_raise_the_score() {
        let plain = analyze("write a function");
        let structured = analyze("function foo() { if (x) { return bar(); } }");
        assert!(structured > plain);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn score_always_stays_in_unit_range(task in ".{0,500}") {
                let score = analyze(&task);
                prop_assert!((0.0..=1.0).contains(&score));
            }

            #[test]
            fn identical_tasks_score_identically(task in ".{0,200}") {
                prop_assert_eq!(analyze(&task), analyze(&task));
            }
        }
    }
}
