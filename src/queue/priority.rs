//! URL priorities and the rule sets that assign them

use crate::config::{DomainsConfig, PriorityConfig, UrlRule};
use crate::url::{hostname_of, matches_wildcard};
use crate::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Scheduling weight of a queue item
///
/// Items are scanned highest first. `Ignore` items are never scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Ignore,
    Low,
    Medium,
    High,
}

impl Priority {
    /// Converts the priority to its stored integer value
    pub fn to_db(self) -> i64 {
        match self {
            Self::Ignore => -1,
            Self::Low => 0,
            Self::Medium => 10,
            Self::High => 100,
        }
    }

    /// Parses a stored integer value
    ///
    /// Returns None if the value doesn't match any known priority.
    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Ignore),
            0 => Some(Self::Low),
            10 => Some(Self::Medium),
            100 => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
enum CompiledRule {
    Contains(String),
    Regex(Regex),
    Hostname(String),
    Path(String),
    PathSegmentsOver(usize),
}

impl CompiledRule {
    fn compile(rule: &UrlRule) -> Result<Self, ConfigError> {
        Ok(match rule {
            UrlRule::Contains(needle) => Self::Contains(needle.clone()),
            UrlRule::Regex(pattern) => {
                Self::Regex(Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    pattern: pattern.clone(),
                    source,
                })?)
            }
            UrlRule::Hostname(pattern) => Self::Hostname(pattern.to_lowercase()),
            UrlRule::Path(path) => Self::Path(path.clone()),
            UrlRule::PathSegmentsOver(n) => Self::PathSegmentsOver(*n),
        })
    }

    fn matches(&self, url: &Url) -> bool {
        match self {
            Self::Contains(needle) => url.as_str().contains(needle.as_str()),
            Self::Regex(re) => re.is_match(url.as_str()),
            Self::Hostname(pattern) => hostname_of(url)
                .map(|host| matches_wildcard(pattern, &host))
                .unwrap_or(false),
            Self::Path(path) => url.path() == path,
            Self::PathSegmentsOver(n) => {
                url.path().split('/').filter(|s| !s.is_empty()).count() > *n
            }
        }
    }
}

/// Compiled priority rule lists
///
/// Evaluation order is part of the contract: a URL matching any ignore rule
/// is `Ignore` even if it also matches a high rule; then low, then high;
/// everything else is `Medium`.
#[derive(Debug, Default)]
pub struct PriorityRules {
    ignore: Vec<CompiledRule>,
    low: Vec<CompiledRule>,
    high: Vec<CompiledRule>,
}

impl PriorityRules {
    /// Compiles the configured rule lists
    pub fn compile(config: &PriorityConfig) -> Result<Self, ConfigError> {
        let compile_all = |rules: &[UrlRule]| -> Result<Vec<CompiledRule>, ConfigError> {
            rules.iter().map(CompiledRule::compile).collect()
        };

        Ok(Self {
            ignore: compile_all(&config.ignore)?,
            low: compile_all(&config.low)?,
            high: compile_all(&config.high)?,
        })
    }

    /// Computes the priority of a URL
    pub fn priority_of(&self, url: &Url) -> Priority {
        let any = |rules: &[CompiledRule]| rules.iter().any(|r| r.matches(url));

        if any(&self.ignore) {
            Priority::Ignore
        } else if any(&self.low) {
            Priority::Low
        } else if any(&self.high) {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

/// Configured domain allow/deny policy
#[derive(Debug, Clone, Default)]
pub struct DomainRules {
    default: Option<bool>,
    allow: Vec<String>,
    deny: Vec<String>,
}

impl DomainRules {
    pub fn new(config: &DomainsConfig) -> Self {
        Self {
            default: config.default,
            allow: config.allow.clone(),
            deny: config.deny.clone(),
        }
    }

    /// Whether the configuration permits spidering a hostname
    ///
    /// Deny patterns win over allow patterns. `None` means the configuration
    /// has no opinion.
    pub fn can_spider(&self, hostname: &str) -> Option<bool> {
        let hostname = hostname.to_lowercase();

        if self.deny.iter().any(|p| matches_wildcard(p, &hostname)) {
            Some(false)
        } else if self.allow.iter().any(|p| matches_wildcard(p, &hostname)) {
            Some(true)
        } else {
            self.default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn create_test_rules() -> PriorityRules {
        PriorityRules::compile(&PriorityConfig {
            ignore: vec![
                UrlRule::Hostname("www.twitter.com".to_string()),
                UrlRule::Regex(r"\.(pdf|zip)$".to_string()),
                UrlRule::PathSegmentsOver(3),
            ],
            low: vec![UrlRule::Contains("?page=".to_string())],
            high: vec![UrlRule::Path("/".to_string()), UrlRule::Contains("pdf".to_string())],
        })
        .unwrap()
    }

    #[test]
    fn test_priority_db_values() {
        for p in [Priority::Ignore, Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::from_db(p.to_db()), Some(p));
        }
        assert_eq!(Priority::from_db(5), None);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Low > Priority::Ignore);
    }

    #[test]
    fn test_default_is_medium() {
        let rules = create_test_rules();
        assert_eq!(
            rules.priority_of(&parse("https://example.com/about")),
            Priority::Medium
        );
        assert_eq!(
            PriorityRules::default().priority_of(&parse("https://example.com/")),
            Priority::Medium
        );
    }

    #[test]
    fn test_ignore_beats_high() {
        let rules = create_test_rules();
        // Matches the high `contains pdf` rule as well
        assert_eq!(
            rules.priority_of(&parse("https://example.com/report.pdf")),
            Priority::Ignore
        );
    }

    #[test]
    fn test_low_beats_high() {
        let rules = create_test_rules();
        assert_eq!(
            rules.priority_of(&parse("https://example.com/?page=2")),
            Priority::Low
        );
    }

    #[test]
    fn test_high_root_path() {
        let rules = create_test_rules();
        assert_eq!(rules.priority_of(&parse("https://example.com/")), Priority::High);
    }

    #[test]
    fn test_hostname_and_segments() {
        let rules = create_test_rules();
        assert_eq!(
            rules.priority_of(&parse("https://www.twitter.com/someone")),
            Priority::Ignore
        );
        assert_eq!(
            rules.priority_of(&parse("https://example.com/a/b/c/d")),
            Priority::Ignore
        );
        assert_eq!(
            rules.priority_of(&parse("https://example.com/a/b/c/")),
            Priority::Medium
        );
    }

    #[test]
    fn test_domain_rules() {
        let rules = DomainRules::new(&DomainsConfig {
            default: None,
            allow: vec!["*.gov".to_string()],
            deny: vec!["*.example.net".to_string(), "spam.gov".to_string()],
        });

        assert_eq!(rules.can_spider("data.gov"), Some(true));
        assert_eq!(rules.can_spider("SPAM.gov"), Some(false));
        assert_eq!(rules.can_spider("a.example.net"), Some(false));
        assert_eq!(rules.can_spider("example.com"), None);
    }

    #[test]
    fn test_domain_rules_default() {
        let rules = DomainRules::new(&DomainsConfig {
            default: Some(false),
            ..Default::default()
        });
        assert_eq!(rules.can_spider("example.com"), Some(false));
    }
}
