use regex::Regex;

/// Submission output patterns, tried in order. The last one takes the first
/// line verbatim, which is what `qsub` prints.
const EXTERNAL_ID_PATTERNS: &[&str] = &[
    r"submitted to cluster (\d+)\.",
    r"Submitted batch job (\w+)",
    r"(?m)^\s*(\S+)\s*$",
];

/// Extracts the scheduler's job id from the output of a submit command.
pub(super) fn parse_external_id(output: &str) -> Option<String> {
    EXTERNAL_ID_PATTERNS.iter().find_map(|pattern| {
        Regex::new(pattern)
            .ok()?
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_each_scheduler_dialect() {
        assert_eq!(
            parse_external_id("Submitting job(s).\n1 job(s) submitted to cluster 88.\n"),
            Some("88".to_string())
        );
        assert_eq!(
            parse_external_id("Submitted batch job 12345\n"),
            Some("12345".to_string())
        );
        assert_eq!(
            parse_external_id("7.torque.example.org\n"),
            Some("7.torque.example.org".to_string())
        );
        assert_eq!(parse_external_id("\n"), None);
    }
}
