//! Page fetching with rotating client identity, robots.txt and a global rate limit

use super::rate_limit::GlobalRateLimiter;
use super::robots::RobotsRules;
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

const FALLBACK_USER_AGENT: &str = concat!("pricewatch/", env!("CARGO_PKG_VERSION"));

/// HTTP page fetcher shared by every extraction
pub struct PageFetcher {
    client: Client,
    user_agents: Vec<String>,
    respect_robots_txt: bool,
    limiter: GlobalRateLimiter,
    robots_cache: Arc<RwLock<HashMap<String, RobotsRules>>>,
}

impl PageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agents: config.user_agents.clone(),
            respect_robots_txt: config.respect_robots_txt,
            limiter: GlobalRateLimiter::new(config.max_requests_per_second),
            robots_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn pick_user_agent(&self) -> &str {
        if self.user_agents.is_empty() {
            return FALLBACK_USER_AGENT;
        }
        &self.user_agents[fastrand::usize(..self.user_agents.len())]
    }

    /// Fetch a page body
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        let host = host_key(&parsed)
            .ok_or_else(|| Error::Extraction(format!("URL has no host: {}", url)))?;
        let user_agent = self.pick_user_agent().to_string();

        if self.respect_robots_txt {
            self.ensure_robots_loaded(&host, &parsed).await;
            let cache = self.robots_cache.read().await;
            if let Some(rules) = cache.get(&host) {
                if !rules.is_allowed(url, &user_agent) {
                    return Err(Error::RobotsDisallowed(url.to_string()));
                }
            }
        }

        self.limiter.wait().await;

        debug!(url = url, "Fetching page");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent.as_str())
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Extraction(format!("HTTP {}: {}", status, url)));
        }

        Ok(response.text().await?)
    }

    async fn ensure_robots_loaded(&self, host: &str, url: &Url) {
        {
            let cache = self.robots_cache.read().await;
            if cache.contains_key(host) {
                return;
            }
        }

        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        debug!("Fetching robots.txt from {}", robots_url);

        let rules = match self
            .client
            .get(&robots_url)
            .header(USER_AGENT, self.pick_user_agent())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let text = response.text().await.unwrap_or_default();
                RobotsRules::parse(&text)
            }
            // Missing or unreachable robots.txt allows everything
            _ => RobotsRules::allow_all(),
        };

        let mut cache = self.robots_cache.write().await;
        cache.insert(host.to_string(), rules);
    }
}

/// `host[:port]` as used to build the robots.txt URL
fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
