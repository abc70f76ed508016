//! Caching, fail-open robots.txt checker

use crate::config::Config;
use crate::fetch::{FetchError, HttpClient, HttpClientOptions};
use crate::robots::RobotsRules;
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

/// Decides whether a URL may be requested according to its host's robots.txt
///
/// Each robots.txt URL is fetched at most once per process (unless the
/// fetch itself fails). A 200 response with a `text/plain` content type is
/// kept as rules; any other response is remembered as "no robots.txt".
pub struct RobotsChecker {
    client: HttpClient,
    product_token: String,
    cache: Mutex<HashMap<String, Option<RobotsRules>>>,
}

impl RobotsChecker {
    /// Creates a checker with its own HTTP client
    ///
    /// The client shares the configured limits but accepts any content type,
    /// so that non-text responses are classified here instead of failing.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = HttpClient::new(&config.user_agent, HttpClientOptions::from_config(config))?;
        Ok(Self::with_client(client, &config.user_agent.crawler_name))
    }

    pub fn with_client(client: HttpClient, product_token: &str) -> Self {
        Self {
            client,
            product_token: product_token.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when robots.txt allows `url`
    ///
    /// Errors fetching robots.txt allow the request and are not cached.
    pub async fn can_request(&self, url: &Url) -> bool {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u.to_string(),
            Err(e) => {
                tracing::warn!("Cannot build robots.txt URL for {}: {}", url, e);
                return true;
            }
        };

        let cached = self.cache.lock().await.get(&robots_url).cloned();
        let rules = match cached {
            Some(rules) => rules,
            None => match self.client.get(&robots_url).await {
                Ok(response) => {
                    let rules = if response.status == 200
                        && response.content_type.starts_with("text/plain")
                    {
                        response.body.as_deref().map(RobotsRules::from_content)
                    } else {
                        None
                    };
                    self.cache
                        .lock()
                        .await
                        .insert(robots_url.clone(), rules.clone());
                    rules
                }
                Err(e) => {
                    tracing::warn!("Error fetching robots.txt at {}: {}", robots_url, e);
                    return true;
                }
            },
        };

        match rules {
            Some(rules) => rules.is_allowed(url.as_str(), &self.product_token),
            None => true,
        }
    }
}
