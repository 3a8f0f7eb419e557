//! Extraction layer
//!
//! The only component that touches the network. Given a URL and a slot it
//! fetches the page after a politeness pause and pulls title, price and
//! seller using the configured rule lists. It never retries; a failure is
//! reported to the caller as [`Error::Extraction`].

mod fetch;
mod price;
mod rate_limit;
mod robots;
mod rules;

pub use fetch::*;
pub use price::*;
pub use rate_limit::*;
pub use robots::*;
pub use rules::*;

use crate::config::{Config, PolitenessConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::slot::Slot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Successful extraction of one source page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub title: String,
    pub price: f64,
    pub seller_name: String,
}

/// Source page extractor
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, slot: Slot) -> Result<Extraction>;
}

/// Turn rule output into an [`Extraction`], applying the slot's seller fallback
pub fn extract_from_html(
    html: &str,
    rules: &RuleSet,
    slot: Slot,
    source: &SourceConfig,
) -> Result<Extraction> {
    let fields = rules.evaluate(html);

    let title = fields
        .title
        .ok_or_else(|| Error::Extraction("No title found".to_string()))?;
    let price = fields
        .price
        .ok_or_else(|| Error::Extraction("No price found".to_string()))?;
    let seller_name = fields
        .seller
        .unwrap_or_else(|| source.fallback_seller(slot).to_string());

    Ok(Extraction {
        title,
        price,
        seller_name,
    })
}

/// Extractor for HTML product pages
pub struct HtmlExtractor {
    fetcher: PageFetcher,
    rules: RuleSet,
    politeness: PolitenessConfig,
    source: SourceConfig,
}

impl HtmlExtractor {
    pub fn new(
        fetcher: PageFetcher,
        rules: RuleSet,
        politeness: PolitenessConfig,
        source: SourceConfig,
    ) -> Self {
        Self {
            fetcher,
            rules,
            politeness,
            source,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            PageFetcher::new(&config.fetch)?,
            config.rules.compile()?,
            config.politeness.clone(),
            config.source.clone(),
        ))
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(&self, url: &str, slot: Slot) -> Result<Extraction> {
        let pause = self.politeness.for_slot(slot).fetch_delay.sample();
        if !pause.is_zero() {
            debug!(slot = %slot, "Waiting {:?} before fetch", pause);
            tokio::time::sleep(pause).await;
        }

        let html = self.fetcher.fetch(url).await.map_err(|e| match e {
            Error::Extraction(_) | Error::RobotsDisallowed(_) => e,
            other => Error::Extraction(format!("Fetch failed for {}: {}", url, other)),
        })?;

        extract_from_html(&html, &self.rules, slot, &self.source)
            .map_err(|e| Error::Extraction(format!("{} ({})", e, url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRODUCT_PAGE: &str = r#"<html><head>
        <meta property="og:title" content="Meta Title">
    </head><body>
        <h1 class="pr-new-br"><a>Brand</a> <span>Steel Kettle 1.7 L</span></h1>
        <div class="product-price-container">
            <span class="prc-dsc">2.959,50 TL</span>
        </div>
        <a class="merchant-text">Kitchen Shop</a>
    </body></html>"#;

    fn test_config(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.source.link_prefixes = vec![server.uri()];
        config.source.reference_seller = "Our Store".to_string();
        config.fetch.max_requests_per_second = 100;
        config.politeness = PolitenessConfig::immediate();
        config
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_extracts_product_page() {
        let server = MockServer::start().await;
        serve(&server, "/p/1", PRODUCT_PAGE).await;

        let extractor = HtmlExtractor::from_config(&test_config(&server)).unwrap();
        let result = extractor
            .extract(&format!("{}/p/1", server.uri()), Slot::new(1).unwrap())
            .await
            .unwrap();

        assert_eq!(result.title, "Steel Kettle 1.7 L");
        assert_eq!(result.price, 2959.50);
        assert_eq!(result.seller_name, "Kitchen Shop");
    }

    #[tokio::test]
    async fn test_seller_fallback_depends_on_slot() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/p/2",
            r#"<h1>Kettle</h1><span class="prc-dsc">59,90</span>"#,
        )
        .await;
        let extractor = HtmlExtractor::from_config(&test_config(&server)).unwrap();
        let url = format!("{}/p/2", server.uri());

        let reference = extractor.extract(&url, Slot::REFERENCE).await.unwrap();
        assert_eq!(reference.seller_name, "Our Store");
        assert_eq!(reference.price, 59.90);

        let competitor = extractor.extract(&url, Slot::new(3).unwrap()).await.unwrap();
        assert_eq!(competitor.seller_name, "Unknown");
    }

    #[tokio::test]
    async fn test_missing_price_fails_whole_extraction() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/p/3",
            r#"<h1>Kettle</h1><span class="prc-dsc">Sold out</span>"#,
        )
        .await;
        let extractor = HtmlExtractor::from_config(&test_config(&server)).unwrap();

        let result = extractor
            .extract(&format!("{}/p/3", server.uri()), Slot::new(1).unwrap())
            .await;
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[tokio::test]
    async fn test_unreachable_page_is_extraction_failure() {
        let server = MockServer::start().await;
        let extractor = HtmlExtractor::from_config(&test_config(&server)).unwrap();

        let result = extractor
            .extract(&format!("{}/p/nowhere", server.uri()), Slot::new(1).unwrap())
            .await;
        assert!(matches!(result, Err(Error::Extraction(_))));
    }
}
