//! Price query commands

use crate::error::Result;
use crate::observations::{HistoryPoint, LatestPrice};
use crate::slot::Slot;
use crate::tracker::PriceTracker;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPricesView {
    pub item_key: String,
    pub prices: Vec<LatestPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryView {
    pub item_key: String,
    pub slot: Slot,
    pub days: u32,
    pub points: Vec<HistoryPoint>,
}

pub async fn cmd_latest_prices(
    tracker: &PriceTracker,
    item_key: &str,
    exclude_reference: bool,
) -> LatestPricesView {
    LatestPricesView {
        item_key: item_key.to_string(),
        prices: tracker
            .observations()
            .latest_active_prices(item_key, exclude_reference)
            .await,
    }
}

pub async fn cmd_price_history(
    tracker: &PriceTracker,
    item_key: &str,
    slot: i64,
    days: u32,
) -> Result<HistoryView> {
    let slot = Slot::new(slot)?;
    Ok(HistoryView {
        item_key: item_key.to_string(),
        slot,
        days,
        points: tracker.observations().history(item_key, slot, days).await,
    })
}

fn format_price(price: Option<f64>) -> String {
    price
        .map(|p| format!("{:.2}", p))
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_latest_prices(view: &LatestPricesView) {
    println!("\n💰 Latest prices for {}\n", view.item_key);
    if view.prices.is_empty() {
        println!("No active observations.");
        return;
    }
    for price in &view.prices {
        println!(
            "  [{}] {:>12}  {}",
            price.slot,
            format_price(price.price),
            price.seller_name.as_deref().unwrap_or("-")
        );
        if let Some(title) = &price.title {
            println!("      {}", title);
        }
        println!("      {} ({})", price.url, price.scraped_at);
    }
}

pub fn print_history(view: &HistoryView) {
    println!(
        "\n📈 {} slot {}, last {} day(s)\n",
        view.item_key, view.slot, view.days
    );
    if view.points.is_empty() {
        println!("No observations in this window.");
        return;
    }
    for point in &view.points {
        println!(
            "  {}  {:>12}  {}",
            point.date,
            format_price(point.price),
            point.seller_name.as_deref().unwrap_or("-")
        );
    }
}
