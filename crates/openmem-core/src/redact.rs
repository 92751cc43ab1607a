use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Replacement marker for matched sensitive spans
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Minimum redacted-output length below which a capture is suppressed
pub const DEFAULT_MIN_OUTPUT_LEN: usize = 8;

// Private blocks are stripped wholesale, delimiters included. Non-nested.
static PRIVATE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<private>.*?</private>").unwrap());

// Provider key prefixes. Case-sensitive on purpose: the prefixes are.
static KEY_PREFIXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9_-]{16,}").unwrap(),
        Regex::new(r"(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"github_pat_[A-Za-z0-9_]{20,}").unwrap(),
        Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(),
        Regex::new(r"xox[baprs]-[A-Za-z0-9-]{10,}").unwrap(),
        Regex::new(r"AIza[0-9A-Za-z_-]{30,}").unwrap(),
    ]
});

// Candidate opaque runs; the entropy check below decides whether to redact.
static OPAQUE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9+/=_-]{24,}").unwrap());

/// Strips private blocks and replaces sensitive spans before anything
/// reaches the pipeline.
pub struct Redactor {
    custom_patterns: Vec<Regex>,
    min_output_len: usize,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&[], DEFAULT_MIN_OUTPUT_LEN)
    }
}

impl Redactor {
    /// Compile configured patterns case-insensitively. A pattern that fails
    /// to compile is skipped with a warning; capture never aborts on it.
    pub fn new(patterns: &[String], min_output_len: usize) -> Self {
        let mut custom_patterns = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => custom_patterns.push(re),
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "skipping invalid redaction pattern");
                }
            }
        }
        Self {
            custom_patterns,
            min_output_len,
        }
    }

    /// Apply both transforms in order. Returns None when the redacted output
    /// is too short to be worth capturing.
    pub fn redact(&self, input: &str) -> Option<String> {
        let stripped = PRIVATE_BLOCK.replace_all(input, "");

        let mut output = stripped.into_owned();
        for re in KEY_PREFIXES.iter() {
            output = re.replace_all(&output, REDACTION_MARKER).into_owned();
        }
        output = redact_opaque_runs(&output);
        for re in &self.custom_patterns {
            output = re.replace_all(&output, REDACTION_MARKER).into_owned();
        }

        if output.trim().len() < self.min_output_len {
            return None;
        }
        Some(output)
    }
}

/// Replace base64-like runs that look like opaque secrets. Long identifiers
/// and prose survive; mixed-alphabet runs with digits do not.
fn redact_opaque_runs(input: &str) -> String {
    OPAQUE_RUN
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let run = &caps[0];
            if looks_high_entropy(run) {
                REDACTION_MARKER.to_string()
            } else {
                run.to_string()
            }
        })
        .into_owned()
}

fn looks_high_entropy(run: &str) -> bool {
    let has_digit = run.bytes().any(|b| b.is_ascii_digit());
    let has_lower = run.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = run.bytes().any(|b| b.is_ascii_uppercase());
    let has_base64_punct = run.contains('+') || run.contains('/') || run.contains('=');
    (has_digit && has_lower && has_upper) || has_base64_punct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_private_blocks_across_lines() {
        let redactor = Redactor::default();
        let input = "keep this\n<private>secret\nlines</private>\nand this tail too";
        let out = redactor.redact(input).unwrap();
        assert!(!out.contains("secret"));
        assert!(out.contains("keep this"));
        assert!(out.contains("and this tail too"));
    }

    #[test]
    fn redacts_provider_keys() {
        let redactor = Redactor::default();
        let input = "auth header was sk-abcDEF1234567890abcdef and the request succeeded";
        let out = redactor.redact(input).unwrap();
        assert!(!out.contains("sk-abc"));
        assert!(out.contains(REDACTION_MARKER));
    }

    #[test]
    fn redacts_high_entropy_runs_but_not_identifiers() {
        let redactor = Redactor::default();
        let input =
            "token eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9 vs ObservationRepositoryInterface name";
        let out = redactor.redact(input).unwrap();
        assert!(out.contains("ObservationRepositoryInterface"));
        assert!(!out.contains("eyJhbGci"));
    }

    #[test]
    fn custom_patterns_are_case_insensitive() {
        let redactor = Redactor::new(&["password: \\S+".to_string()], DEFAULT_MIN_OUTPUT_LEN);
        let out = redactor.redact("PASSWORD: hunter2 rest of the log line").unwrap();
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let redactor = Redactor::new(&["[unclosed".to_string()], DEFAULT_MIN_OUTPUT_LEN);
        let out = redactor.redact("plain output with nothing sensitive").unwrap();
        assert_eq!(out, "plain output with nothing sensitive");
    }

    #[test]
    fn short_output_is_suppressed() {
        let redactor = Redactor::default();
        assert!(redactor.redact("<private>everything</private>ok").is_none());
    }
}
