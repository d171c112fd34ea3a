use browser_driver::PageInfo;
use regex::Regex;

use crate::errors::PopupError;

/// Accepts a page when any URL pattern or any title pattern matches.
/// With no patterns at all, every page is accepted.
#[derive(Clone, Debug)]
pub struct PopupClassifier {
    url_patterns: Vec<Regex>,
    title_patterns: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, PopupError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| PopupError::InvalidPattern {
                pattern: pattern.clone(),
                reason: err.to_string(),
            })
        })
        .collect()
}

impl PopupClassifier {
    pub fn new(url_patterns: &[String], title_patterns: &[String]) -> Result<Self, PopupError> {
        Ok(Self {
            url_patterns: compile(url_patterns)?,
            title_patterns: compile(title_patterns)?,
        })
    }

    pub fn accept_all() -> Self {
        Self {
            url_patterns: Vec::new(),
            title_patterns: Vec::new(),
        }
    }

    pub fn matches(&self, info: &PageInfo) -> bool {
        if self.url_patterns.is_empty() && self.title_patterns.is_empty() {
            return true;
        }
        self.url_patterns.iter().any(|re| re.is_match(&info.url))
            || self.title_patterns.iter().any(|re| re.is_match(&info.title))
    }
}
