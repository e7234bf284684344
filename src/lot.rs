//! Parcel identifier lists.
//!
//! Building records often carry several parcel identifiers in one field
//! (`"100;101;110"`). Relationship matching and the multi-parcel split both
//! need the individual identifiers.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::DEFAULT_PARCEL_DELIMITERS;
use crate::error::ConfigurationError;

/// A parcel identifier list that cannot be split safely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParcelIdError {
    #[error("Unbalanced brackets in parcel list '{value}'")]
    UnbalancedBrackets {
        value: String,
    },

    #[error("Control character in parcel list '{value}'")]
    ControlCharacter {
        value: String,
    },
}

/// Splits parcel identifier lists on a configurable delimiter set.
#[derive(Debug, Clone)]
pub struct ParcelListSplitter {
    delimiters: Vec<char>,
    pattern: Regex,
}

impl ParcelListSplitter {
    /// Builds a splitter. Whitespace following a delimiter is part of the
    /// delimiter.
    pub fn new(delimiters: &[char]) -> Result<Self, ConfigurationError> {
        if delimiters.is_empty() {
            return Err(ConfigurationError::InvalidConfig {
                reason: "parcel list delimiters cannot be empty".to_string(),
            });
        }
        if let Some(c) = delimiters.iter().find(|c| c.is_alphanumeric()) {
            return Err(ConfigurationError::InvalidConfig {
                reason: format!("parcel list delimiter '{c}' is alphanumeric"),
            });
        }
        let class: String = delimiters
            .iter()
            .map(|c| regex::escape(&c.to_string()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?:{class})\s*")).map_err(|e| {
            ConfigurationError::InvalidConfig {
                reason: format!("invalid parcel list delimiters: {e}"),
            }
        })?;
        Ok(Self {
            delimiters: delimiters.to_vec(),
            pattern,
        })
    }

    #[must_use]
    pub fn delimiters(&self) -> &[char] {
        &self.delimiters
    }

    /// Splits `raw` into trimmed, non-empty, de-duplicated identifiers in
    /// first-seen order.
    pub fn split(&self, raw: &str) -> Result<Vec<String>, ParcelIdError> {
        check_well_formed(raw)?;
        let mut out: Vec<String> = Vec::new();
        for part in self.pattern.split(raw) {
            let id = part.trim();
            if id.is_empty() || out.iter().any(|seen| seen == id) {
                continue;
            }
            out.push(id.to_string());
        }
        Ok(out)
    }
}

impl Default for ParcelListSplitter {
    fn default() -> Self {
        static DEFAULT: OnceLock<ParcelListSplitter> = OnceLock::new();
        DEFAULT
            .get_or_init(|| {
                Self::new(&DEFAULT_PARCEL_DELIMITERS).expect("default parcel delimiters are valid")
            })
            .clone()
    }
}

fn check_well_formed(raw: &str) -> Result<(), ParcelIdError> {
    if raw.chars().any(|c| c.is_control() && !c.is_ascii_whitespace()) {
        return Err(ParcelIdError::ControlCharacter {
            value: raw.escape_default().to_string(),
        });
    }
    let mut stack: Vec<char> = Vec::new();
    for c in raw.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err(ParcelIdError::UnbalancedBrackets {
                        value: raw.to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(())
    } else {
        Err(ParcelIdError::UnbalancedBrackets {
            value: raw.to_string(),
        })
    }
}

/// Shape counts over a set of parcel identifier lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParcelListStats {
    /// Lists with no identifiers at all.
    pub empty: usize,
    pub single: usize,
    pub multiple: usize,
    pub malformed: usize,
}

impl ParcelListStats {
    /// Counts one split result.
    pub fn observe(&mut self, result: &Result<Vec<String>, ParcelIdError>) {
        match result {
            Ok(ids) if ids.is_empty() => self.empty += 1,
            Ok(ids) if ids.len() == 1 => self.single += 1,
            Ok(_) => self.multiple += 1,
            Err(_) => self.malformed += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.empty + self.single + self.multiple + self.malformed
    }
}
