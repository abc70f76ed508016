use crate::config::types::{
    Config, DomainsConfig, HttpConfig, PriorityConfig, RequestIntervalConfig, SpiderConfig,
    UrlRule, UserAgentConfig,
};
use crate::ConfigError;
use std::net::IpAddr;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_spider_config(&config.spider)?;
    validate_http_config(&config.http)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_priority_config(&config.priority)?;
    validate_domains_config(&config.domains)?;
    Ok(())
}

fn validate_spider_config(config: &SpiderConfig) -> Result<(), ConfigError> {
    if config.database_file.is_empty() {
        return Err(ConfigError::Validation(
            "database-file cannot be empty".to_string(),
        ));
    }

    if let Some(workers) = config.workers {
        if !(1..=256).contains(&workers) {
            return Err(ConfigError::Validation(format!(
                "workers must be between 1 and 256, got {}",
                workers
            )));
        }
    }

    if config.max_in_flight < 1 {
        return Err(ConfigError::Validation(
            "max-in-flight must be >= 1".to_string(),
        ));
    }

    if config.allowed_content_types.is_empty() {
        return Err(ConfigError::Validation(
            "allowed-content-types must list at least one type".to_string(),
        ));
    }

    for content_type in &config.allowed_content_types {
        if content_type.contains(';') || !content_type.contains('/') {
            return Err(ConfigError::Validation(format!(
                "allowed content type '{}' must look like 'type/subtype' without parameters",
                content_type
            )));
        }
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("get-request-timeout", config.get_request_timeout),
        ("head-request-timeout", config.head_request_timeout),
        ("resolve-timeout", config.resolve_timeout),
    ] {
        if value < 100 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 100ms, got {}ms",
                name, value
            )));
        }
    }

    if config.max_response_body_size < 1024 {
        return Err(ConfigError::Validation(format!(
            "max-response-body-size must be >= 1024 bytes, got {}",
            config.max_response_body_size
        )));
    }

    if config.nameservers.is_empty() {
        return Err(ConfigError::Validation(
            "nameservers cannot be empty".to_string(),
        ));
    }

    for server in &config.nameservers {
        server.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!("nameserver '{}' is not an IP address", server))
        })?;
    }

    validate_interval(&config.min_time_between_requests)
}

fn validate_interval(config: &RequestIntervalConfig) -> Result<(), ConfigError> {
    for window in &config.windows {
        if window.start_hour > 23 || window.end_hour > 23 {
            return Err(ConfigError::Validation(format!(
                "interval window hours must be 0-23, got {}-{}",
                window.start_hour, window.end_hour
            )));
        }
    }
    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    // The name doubles as the robots.txt product token
    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only letters, digits, '-' and '_', got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_priority_config(config: &PriorityConfig) -> Result<(), ConfigError> {
    for rule in config.ignore.iter().chain(&config.low).chain(&config.high) {
        match rule {
            UrlRule::Regex(pattern) => {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    pattern: pattern.clone(),
                    source,
                })?;
            }
            UrlRule::Hostname(pattern) => validate_domain_pattern(pattern)?,
            UrlRule::Path(path) if !path.starts_with('/') => {
                return Err(ConfigError::Validation(format!(
                    "path rule '{}' must start with '/'",
                    path
                )));
            }
            UrlRule::Contains(needle) if needle.is_empty() => {
                return Err(ConfigError::Validation(
                    "contains rule cannot be empty".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_domains_config(config: &DomainsConfig) -> Result<(), ConfigError> {
    for pattern in config.allow.iter().chain(&config.deny) {
        validate_domain_pattern(pattern)?;
    }
    Ok(())
}

/// Validates a domain pattern (supports a leading `*.` wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' has no domain",
            pattern
        )));
    }

    if domain.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' must be lowercase",
            pattern
        )));
    }

    // Wildcards may name a bare TLD (`*.gov`); exact patterns must be full domain names
    if pattern.starts_with("*.") && !domain.contains('.') {
        if domain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Ok(());
        }
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' contains invalid characters",
            pattern
        )));
    }

    crate::url::parse_domain_name(domain)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidPattern(format!("Invalid domain pattern '{}'", pattern)))
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
