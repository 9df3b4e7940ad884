//! Best-effort PII anonymization applied before text leaves the process.
//!
//! Recognizers cover person names, phone numbers, email addresses, and IP
//! addresses, replacing each match with an anonymized token. The stage never
//! fails a caller: if the recognizer set cannot be built the scrubber runs
//! disabled for the process lifetime (logged once), and a disabled or
//! unmatched input passes through unchanged.

use std::borrow::Cow;

use regex::Regex;
use tracing::error;

/// One recognizer: a compiled pattern and the token that replaces matches.
struct Recognizer {
    token: &'static str,
    regex: Regex,
}

/// (replacement token, pattern) pairs, applied in order.
///
/// IP addresses run before phone numbers so dotted octets are already
/// tokenized when the looser phone pattern scans the text.
const RECOGNIZER_PATTERNS: &[(&str, &str)] = &[
    (
        "<EMAIL_ADDRESS>",
        r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b",
    ),
    (
        "<IP_ADDRESS>",
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    ),
    (
        "<PHONE_NUMBER>",
        r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)[\s.-]?|\b\d{3}[\s.-])\d{3}[\s.-]?\d{4}\b",
    ),
    (
        "<PERSON>",
        r"\b(?:Dr|Mr|Mrs|Ms|Prof)\.?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?|\b(?:[A-Z][a-z]{1,20})\s+(?:[A-Z][a-z]{1,20})(?:\s+[A-Z][a-z]{1,20})?\b",
    ),
];

/// Sentence-leading words that would otherwise false-positive as a first name.
const PERSON_STOPWORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "There", "Then", "When", "Where", "While", "After",
    "Before", "Every", "Each", "Some", "Many", "Most", "Other", "Such", "With", "From", "Into",
];

/// Regex-based anonymizer for outbound text.
pub struct PiiScrubber {
    recognizers: Vec<Recognizer>,
    enabled: bool,
}

impl PiiScrubber {
    /// Compiles the recognizer set. A compilation failure disables scrubbing
    /// for the process lifetime rather than failing the caller.
    pub fn new() -> Self {
        let mut recognizers = Vec::with_capacity(RECOGNIZER_PATTERNS.len());
        for (token, pattern) in RECOGNIZER_PATTERNS {
            match Regex::new(pattern) {
                Ok(regex) => recognizers.push(Recognizer { token, regex }),
                Err(err) => {
                    error!(token, error = %err, "failed to build PII recognizer; scrubbing disabled");
                    return Self {
                        recognizers: Vec::new(),
                        enabled: false,
                    };
                }
            }
        }
        Self {
            recognizers,
            enabled: true,
        }
    }

    /// A scrubber that passes all text through unchanged.
    pub fn disabled() -> Self {
        Self {
            recognizers: Vec::new(),
            enabled: false,
        }
    }

    /// Whether the recognizer set was built successfully.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replaces detected PII with anonymized tokens.
    ///
    /// Returns the input untouched when scrubbing is disabled or nothing
    /// matches.
    pub fn scrub<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.enabled {
            return Cow::Borrowed(text);
        }
        let mut current = Cow::Borrowed(text);
        for recognizer in &self.recognizers {
            if recognizer.regex.is_match(&current) {
                let replaced = if recognizer.token == "<PERSON>" {
                    replace_person_matches(&recognizer.regex, &current)
                } else {
                    recognizer.regex.replace_all(&current, recognizer.token).into_owned()
                };
                current = Cow::Owned(replaced);
            }
        }
        current
    }
}

impl Default for PiiScrubber {
    fn default() -> Self {
        Self::new()
    }
}

/// Person matches keep their token unless the leading word is a common
/// sentence opener, which the capitalized-pair heuristic would misread.
fn replace_person_matches(regex: &Regex, text: &str) -> String {
    regex
        .replace_all(text, |captures: &regex::Captures<'_>| {
            let matched = &captures[0];
            let first_word = matched.split_whitespace().next().unwrap_or("");
            if PERSON_STOPWORDS.contains(&first_word) {
                matched.to_string()
            } else {
                "<PERSON>".to_string()
            }
        })
        .into_owned()
}
