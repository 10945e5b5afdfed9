//! Subscription key patterns.
//!
//! A pattern is either an exact key or a glob where `*` matches any run of
//! characters, including `:`. `"rankings:*"` matches every rankings key.

use regex::Regex;
use stride_core::StateError;

#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    glob: Option<Regex>,
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self, StateError> {
        if pattern.is_empty() {
            return Err(StateError::InvalidArgument {
                field: "pattern",
                reason: "pattern must not be empty".to_string(),
            });
        }
        let glob = if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{body}$")).map_err(|e| {
                StateError::InvalidArgument {
                    field: "pattern",
                    reason: e.to_string(),
                }
            })?;
            Some(regex)
        } else {
            None
        };
        Ok(Self {
            source: pattern.to_string(),
            glob,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.glob {
            Some(regex) => regex.is_match(key),
            None => self.source == key,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
