//! Prohibited-content checks applied to display names and comment bodies.

use regex::Regex;

/// Words and phrases rejected anywhere in a comment (matched on word boundaries).
const PROHIBITED_TERMS: &[&str] = &[
    // Vietnamese
    "đm", "dm", "dcm", "dcmm", "dmm", "đmm", "vl", "vcl", "vkl", "cặc", "buồi", "lồn", "địt",
    "đĩ", "súc vật", "con chó", "gái điếm", "ma túy", "cá độ", "cá cược", "đánh bạc",
    // English
    "fuck", "shit", "bitch", "asshole",
    // Contact solicitation
    "zalo", "số đt", "sđt", "liên hệ",
];

/// Why a piece of text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    ProhibitedWord,
    PhoneNumber,
    Link,
}

impl Violation {
    pub fn message(self) -> &'static str {
        match self {
            Self::ProhibitedWord => "contains inappropriate language",
            Self::PhoneNumber => "must not contain phone numbers",
            Self::Link => "must not contain links",
        }
    }
}

pub struct ContentFilter {
    terms: Vec<Vec<String>>,
    phone: Regex,
    link: Regex,
}

impl ContentFilter {
    pub fn new() -> Self {
        Self {
            terms: PROHIBITED_TERMS.iter().map(|t| words(t)).collect(),
            // Vietnamese mobile numbers, then generic 3-3-4 style numbers.
            phone: Regex::new(r"(?:\+84|\b0)\s?\d{9,10}\b|\b(?:\d{3}[-.\s]?){2}\d{3,4}\b")
                .expect("phone pattern is valid"),
            link: Regex::new(
                r"(?i)\bhttps?://\S+|\bwww\.\S+|\b[a-z0-9-]+\.(?:com|net|org|vn|io|me|info|xyz|ly|gg|tv)\b",
            )
            .expect("link pattern is valid"),
        }
    }

    /// First violation found in `text`, if any.
    pub fn check(&self, text: &str) -> Option<Violation> {
        let tokens = words(text);
        if self.terms.iter().any(|term| contains_run(&tokens, term)) {
            return Some(Violation::ProhibitedWord);
        }
        if self.phone.is_match(text) {
            return Some(Violation::PhoneNumber);
        }
        if self.link.is_match(text) {
            return Some(Violation::Link);
        }
        None
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_run(tokens: &[String], term: &[String]) -> bool {
    !term.is_empty() && tokens.windows(term.len()).any(|w| w == term)
}
