//! Text normalisation applied to every extracted page before chunking.
//!
//! The pipeline runs six steps in a fixed order:
//!
//! 1. collapse whitespace runs (line breaks survive as single `\n`) and trim;
//! 2. rejoin words hyphenated across a line break;
//! 3. drop characters outside the whitelist;
//! 4. Unicode NFKD normalisation;
//! 5. drop boilerplate lines (page markers, banners);
//! 6. lowercase and collapse all whitespace, line breaks included.
//!
//! Hyphen repair must run before stripping (the hyphen is not whitelisted),
//! and boilerplate removal needs the line breaks that step 6 erases.
//! [`Cleaner::clean`] is idempotent.

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::CleaningConfig;

pub struct Cleaner {
    allowed_punctuation: Vec<char>,
    boilerplate: Option<Regex>,
}

impl Cleaner {
    /// Build a cleaner from configuration.
    ///
    /// Boilerplate patterns are combined into one multi-line, case-insensitive
    /// regex anchored at line starts. Each matching line is removed whole.
    pub fn new(config: &CleaningConfig) -> Result<Self, regex::Error> {
        let boilerplate = if config.boilerplate_patterns.is_empty() {
            None
        } else {
            let alternatives = config
                .boilerplate_patterns
                .iter()
                .map(|p| format!("(?:{})", p))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!(r"(?im)^[ \t]*(?:{}).*$", alternatives))?)
        };

        Ok(Self {
            allowed_punctuation: config.allowed_punctuation.chars().collect(),
            boilerplate,
        })
    }

    /// Run the full cleaning pipeline. Never fails; may return an empty string.
    pub fn clean(&self, text: &str) -> String {
        let text = collapse_preserving_lines(text);
        let text = fix_hyphenation(&text);
        let text = self.strip_disallowed(&text);
        let text: String = text.nfkd().collect();
        let text = self.remove_boilerplate(&text);
        normalize(&text)
    }

    fn strip_disallowed(&self, text: &str) -> String {
        text.chars()
            .filter(|&c| {
                c.is_ascii_alphanumeric()
                    || c == ' '
                    || c == '\n'
                    || self.allowed_punctuation.contains(&c)
            })
            .collect()
    }

    fn remove_boilerplate(&self, text: &str) -> String {
        let Some(re) = &self.boilerplate else {
            return text.to_string();
        };
        // A removal can splice two lines into a new match; repeat to a fixpoint.
        let mut current = text.to_string();
        loop {
            let next = re.replace_all(&current, "").into_owned();
            if next == current {
                return current;
            }
            current = collapse_preserving_lines(&next);
        }
    }
}

/// Collapse horizontal whitespace to one space and line-break runs to one `\n`,
/// trimming every line and the text as a whole. `\r\n` and a lone `\r` both
/// count as a line break.
fn collapse_preserving_lines(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join `exam-\nple` into `example`. Only hyphens at the end of a line count.
fn fix_hyphenation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '-' && i > 0 && chars[i - 1].is_alphanumeric() {
            let mut j = i + 1;
            let mut saw_newline = false;
            while j < chars.len() && chars[j].is_whitespace() {
                saw_newline |= chars[j] == '\n';
                j += 1;
            }
            if saw_newline && j < chars.len() && chars[j].is_alphanumeric() {
                i = j;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
