//! pricewatch - multi-source price tracking
//!
//! This crate provides:
//! - A link registry mapping each item to one reference and up to five competitor URLs
//! - An append-only observation log with latest-price and daily-history queries
//! - A single-flight crawl orchestrator with a daily scheduler
//! - CLI commands for managing links, crawls and schedules

pub mod commands;
pub mod config;
pub mod crawl;
pub mod db;
pub mod error;
pub mod extract;
pub mod links;
pub mod observations;
pub mod progress;
pub mod retry;
pub mod schedule;
pub mod slot;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Result};
pub use slot::Slot;
pub use tracker::PriceTracker;
