//! Default values for configuration

use super::DelayRange;
use crate::extract::FieldRule;

/// Default accepted link prefixes
pub fn default_link_prefixes() -> Vec<String> {
    vec!["https://www.trendyol.com/".to_string()]
}

/// Seller label for the reference slot when the page names none
pub fn default_reference_seller() -> String {
    std::env::var("PRICEWATCH_REFERENCE_SELLER").unwrap_or_else(|_| "Own store".to_string())
}

/// Seller label for competitor slots when the page names none
pub fn default_unknown_seller() -> String {
    "Unknown".to_string()
}

/// Default client identity pool
pub fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
    ]
}

/// Default request timeout in seconds
pub fn default_fetch_timeout() -> u64 {
    20
}

/// Default global request ceiling
pub fn default_max_requests_per_second() -> u32 {
    1
}

/// Default: respect robots.txt
pub fn default_respect_robots() -> bool {
    true
}

/// Pause before fetching a reference page
pub fn default_reference_fetch_delay() -> DelayRange {
    DelayRange::new(3_000, 6_000)
}

/// Pause before fetching a competitor page
pub fn default_competitor_fetch_delay() -> DelayRange {
    DelayRange::new(1_000, 3_000)
}

/// Gap after a reference target in a manual run
pub fn default_reference_manual_gap() -> DelayRange {
    DelayRange::new(4_000, 8_000)
}

/// Gap after a competitor target in a manual run
pub fn default_competitor_manual_gap() -> DelayRange {
    DelayRange::new(1_500, 3_000)
}

/// Gap after a reference target in a scheduled run
pub fn default_reference_scheduled_gap() -> DelayRange {
    DelayRange::new(8_000, 15_000)
}

/// Gap after a competitor target in a scheduled run
pub fn default_competitor_scheduled_gap() -> DelayRange {
    DelayRange::new(3_000, 6_000)
}

pub fn default_title_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::css("h1.pr-new-br span"),
        FieldRule::css("h1.pr-new-br"),
        FieldRule::attr("meta[property='og:title']", "content"),
        FieldRule::css("h1"),
        FieldRule::regex(r#""name"\s*:\s*"([^"]+)""#),
    ]
}

pub fn default_price_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::css("span.prc-dsc"),
        FieldRule::css("span.prc-slg"),
        FieldRule::css(".product-price-container .prc-org"),
        FieldRule::attr("meta[property='product:price:amount']", "content"),
        FieldRule::regex(r#""price"\s*:\s*"?([0-9][0-9.,]*)"#),
    ]
}

pub fn default_seller_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::css("a.merchant-text"),
        FieldRule::css(".merchant-name"),
        FieldRule::css(".seller-name-text"),
        FieldRule::regex(r#""merchantName"\s*:\s*"([^"]+)""#),
    ]
}

/// Default size of the recent-error buffer
pub fn default_error_buffer() -> usize {
    50
}

/// Delay before a single-item run after a link edit
pub fn default_edit_refresh_delay() -> u64 {
    5
}

/// Schedule time zone
pub fn default_time_zone() -> String {
    std::env::var("PRICEWATCH_TIME_ZONE").unwrap_or_else(|_| "Europe/Istanbul".to_string())
}

/// Scheduler loop wake period in seconds
pub fn default_tick_secs() -> u64 {
    60
}

/// Daily run time used when nothing is persisted
pub fn default_run_time() -> String {
    "03:00".to_string()
}

/// Default: automated runs skip the reference slot
pub fn default_include_reference() -> bool {
    false
}

/// Write attempts before giving up on contention
pub fn default_retry_attempts() -> u32 {
    5
}

pub fn default_retry_base_delay() -> u64 {
    100
}

pub fn default_retry_max_delay() -> u64 {
    2_000
}

/// SQLite busy timeout in milliseconds
pub fn default_busy_timeout() -> u64 {
    5_000
}

/// Default retention window for purges, in days
pub fn default_retention_days() -> u32 {
    365
}
