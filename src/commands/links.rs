//! Link registry commands

use crate::error::{Error, Result};
use crate::links::{LinkChangeSet, LinkTarget, PriceSource};
use crate::tracker::PriceTracker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Active links of one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksView {
    pub item_key: String,
    pub links: Vec<PriceSource>,
}

/// Parse `N=URL` slot assignments; `N=` retires slot N
pub fn parse_slot_assignments(entries: &[String]) -> Result<BTreeMap<i64, String>> {
    let mut slots = BTreeMap::new();
    for entry in entries {
        let (slot, url) = entry
            .split_once('=')
            .ok_or_else(|| Error::Other(format!("Expected SLOT=URL, got '{}'", entry)))?;
        let slot: i64 = slot
            .trim()
            .parse()
            .map_err(|_| Error::Other(format!("Invalid slot number in '{}'", entry)))?;
        if slots.insert(slot, url.trim().to_string()).is_some() {
            return Err(Error::Other(format!("Slot {} given more than once", slot)));
        }
    }
    Ok(slots)
}

pub async fn cmd_show_links(tracker: &PriceTracker, item_key: &str, all_slots: bool) -> Result<LinksView> {
    let links = tracker.registry().get_links(item_key, all_slots).await?;
    Ok(LinksView {
        item_key: item_key.to_string(),
        links,
    })
}

pub async fn cmd_set_links(
    tracker: &PriceTracker,
    item_key: &str,
    slots: &BTreeMap<i64, String>,
    actor: &str,
    include_reference: bool,
) -> Result<LinkChangeSet> {
    info!("Setting links for {}", item_key);
    tracker
        .update_links(item_key, slots, actor, include_reference, false)
        .await
}

pub async fn cmd_retire_item(tracker: &PriceTracker, item_key: &str, actor: &str) -> Result<LinkChangeSet> {
    tracker.registry().retire_item(item_key, actor).await
}

pub async fn cmd_list_links(tracker: &PriceTracker, include_reference: bool) -> Result<Vec<LinkTarget>> {
    tracker.registry().get_all_active_links(include_reference).await
}

pub fn print_links(view: &LinksView) {
    println!("\n🔗 Links for {}\n", view.item_key);
    if view.links.is_empty() {
        println!("No active links. Use 'pricewatch links set {} --slot 1=URL' to add one.", view.item_key);
        return;
    }
    for link in &view.links {
        println!("  [{}] {}", link.slot, link.source_url);
        println!("      updated {} by {}", link.updated_at, link.updated_by);
    }
}

pub fn print_link_changes(changes: &LinkChangeSet) {
    if changes.is_noop() {
        println!("• {}", changes.message());
    } else {
        println!("✓ {}", changes.message());
    }
}

pub fn print_link_targets(targets: &[LinkTarget]) {
    if targets.is_empty() {
        println!("No active links.");
        return;
    }
    let mut current_item: Option<&str> = None;
    let mut sorted: Vec<&LinkTarget> = targets.iter().collect();
    sorted.sort_by(|a, b| a.item_key.cmp(&b.item_key).then(a.slot.cmp(&b.slot)));
    for target in sorted {
        if current_item != Some(target.item_key.as_str()) {
            println!("{}", target.item_key);
            current_item = Some(target.item_key.as_str());
        }
        println!("  [{}] {}", target.slot, target.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_assignments() {
        let slots = parse_slot_assignments(&entries(&[
            "1=https://src.example/p/1",
            " 2 = https://src.example/p/2?x=1",
            "3=",
        ]))
        .unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[&1], "https://src.example/p/1");
        assert_eq!(slots[&2], "https://src.example/p/2?x=1");
        assert_eq!(slots[&3], "");
    }

    #[test]
    fn test_parse_assignments_rejects_garbage() {
        assert!(parse_slot_assignments(&entries(&["https://src.example/p/1"])).is_err());
        assert!(parse_slot_assignments(&entries(&["one=https://src.example/p/1"])).is_err());
        assert!(parse_slot_assignments(&entries(&["1=a", "1=b"])).is_err());
    }
}
