//! Keyword-based quality score for analysis responses.

/// Review vocabulary. A response scores one point per keyword it mentions.
pub const KEYWORDS: [&str; 30] = [
    "bug",
    "error",
    "issue",
    "fix",
    "refactor",
    "improve",
    "vulnerability",
    "performance",
    "complexity",
    "dependency",
    "coupling",
    "cohesion",
    "pattern",
    "anti-pattern",
    "data flow",
    "call graph",
    "entry point",
    "dead code",
    "type",
    "validation",
    "exception",
    "race condition",
    "security",
    "injection",
    "memory",
    "leak",
    "function",
    "class",
    "method",
    "module",
];

/// Number of distinct `KEYWORDS` found in `response`, case-insensitively.
pub fn keyword_score(response: &str) -> u32 {
    let response = response.to_lowercase();
    KEYWORDS.iter().filter(|kw| response.contains(*kw)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_keyword_once() {
        assert_eq!(keyword_score(""), 0);
        assert_eq!(keyword_score("Bug bug BUG"), 1);
        // "anti-pattern" also contains "pattern".
        assert_eq!(keyword_score("An anti-pattern"), 2);
        assert_eq!(
            keyword_score("The Data Flow into checkout() skips validation; a security issue."),
            4
        );
    }
}
