//! Throttled, bounded HTTP client
//!
//! Every call goes through the same steps:
//! 1. Wait for the pacer to release it
//! 2. Send the request, bounded by the method's timeout
//! 3. Return early for HEAD and 301/302/303 responses, without a body
//! 4. Reject unwanted content types before reading any body bytes
//! 5. Stream the body, aborting once it exceeds the size limit

use crate::config::{Config, UserAgentConfig};
use crate::fetch::pacer::{Pacer, RequestInterval};
use crate::fetch::{dns, FetchError, FetchedRequest, HttpHeader};
use reqwest::{redirect::Policy, Client, Method, Response};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type ContentTypeFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Limits applied by an `HttpClient`
#[derive(Clone)]
pub struct HttpClientOptions {
    pub get_timeout: Duration,
    pub head_timeout: Duration,
    pub resolve_timeout: Duration,
    pub max_body_size: usize,
    pub interval: RequestInterval,
    pub nameservers: Vec<String>,
    /// Decides whether a GET body is worth reading; `None` accepts everything
    pub content_filter: Option<ContentTypeFilter>,
}

impl HttpClientOptions {
    /// Limits taken from the `[http]` section
    pub fn from_config(config: &Config) -> Self {
        let http = &config.http;
        Self {
            get_timeout: Duration::from_millis(http.get_request_timeout),
            head_timeout: Duration::from_millis(http.head_request_timeout),
            resolve_timeout: Duration::from_millis(http.resolve_timeout),
            max_body_size: http.max_response_body_size,
            interval: RequestInterval::from_config(&http.min_time_between_requests),
            nameservers: http.nameservers.clone(),
            content_filter: None,
        }
    }

    /// Only read GET bodies whose content type passes `filter`
    pub fn with_content_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.content_filter = Some(Arc::new(filter));
        self
    }
}

/// HTTP client with pacing, DNS caching and size/time bounds
pub struct HttpClient {
    client: Client,
    pacer: Pacer,
    options: HttpClientOptions,
}

/// Builds the underlying `reqwest` client
///
/// Redirects are never followed; callers read the `location` header.
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `options` - Timeouts and resolver settings
pub fn build_reqwest_client(
    user_agent: &UserAgentConfig,
    options: &HttpClientOptions,
) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .connect_timeout(options.get_timeout)
        .redirect(Policy::none())
        .dns_resolver(dns::shared(&options.nameservers, options.resolve_timeout))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| FetchError::Build(e.to_string()))
}

impl HttpClient {
    pub fn new(user_agent: &UserAgentConfig, options: HttpClientOptions) -> Result<Self, FetchError> {
        let client = build_reqwest_client(user_agent, &options)?;

        Ok(Self {
            client,
            pacer: Pacer::new(options.interval.clone()),
            options,
        })
    }

    /// Issues a GET request
    pub async fn get(&self, url: &str) -> Result<FetchedRequest, FetchError> {
        self.request(Method::GET, url, self.options.get_timeout).await
    }

    /// Issues a HEAD request; the result never has a body
    pub async fn head(&self, url: &str) -> Result<FetchedRequest, FetchError> {
        self.request(Method::HEAD, url, self.options.head_timeout).await
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedRequest, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !crate::url::is_http_scheme(&parsed) {
            return Err(FetchError::InvalidUrl(format!("Invalid protocol: {}", parsed.scheme())));
        }

        self.pacer.wait().await;
        tracing::debug!("{} {}", method, url);

        // Dropping the future on timeout closes the connection
        match tokio::time::timeout(timeout, self.perform(method, url, parsed)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut(timeout)),
        }
    }

    async fn perform(
        &self,
        method: Method,
        requested: &str,
        url: Url,
    ) -> Result<FetchedRequest, FetchError> {
        let mut response = self
            .client
            .request(method.clone(), url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let mut fetched = FetchedRequest {
            url: requested.to_string(),
            status: response.status().as_u16(),
            content_type: header_value(&response, "content-type").unwrap_or_default(),
            headers: collect_headers(&response),
            body: None,
        };

        if method == Method::HEAD || fetched.is_redirect() {
            return Ok(fetched);
        }

        if let Some(filter) = &self.options.content_filter {
            if !filter(&fetched.content_type) {
                return Err(FetchError::InvalidContentType(fetched.content_type));
            }
        }

        let limit = self.options.max_body_size;
        if response.content_length().map(|len| len > limit as u64).unwrap_or(false) {
            return Err(FetchError::BodyTooLarge { limit });
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::from_reqwest)? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        fetched.body = Some(String::from_utf8_lossy(&body).into_owned());
        Ok(fetched)
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn collect_headers(response: &Response) -> Vec<HttpHeader> {
    response
        .headers()
        .iter()
        .map(|(name, value)| HttpHeader {
            name: name.as_str().to_lowercase(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .collect()
}
