//! Price source slots
//!
//! Every catalog item has up to six slots. Slot 0 is the item's own reference
//! listing, slots 1..=5 are competitor listings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Highest valid slot number
pub const MAX_SLOT: u8 = 5;

/// A validated slot number in `0..=5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Slot(u8);

/// Which politeness profile and seller fallback a slot uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Reference,
    Competitor,
}

impl Slot {
    /// The item's own listing
    pub const REFERENCE: Slot = Slot(0);

    /// Validate a raw slot number
    pub fn new(value: i64) -> Result<Self> {
        if (0..=i64::from(MAX_SLOT)).contains(&value) {
            Ok(Slot(value as u8))
        } else {
            Err(Error::InvalidSlot(value))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn kind(self) -> SlotKind {
        if self == Self::REFERENCE {
            SlotKind::Reference
        } else {
            SlotKind::Competitor
        }
    }

    /// Slot numbers addressed by a call, with or without the reference slot
    pub fn range(include_reference: bool) -> RangeInclusive<u8> {
        let start = if include_reference { 0 } else { 1 };
        start..=MAX_SLOT
    }

    /// All slots addressed by a call
    pub fn all(include_reference: bool) -> impl Iterator<Item = Slot> {
        Self::range(include_reference).map(Slot)
    }
}

impl TryFrom<i64> for Slot {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        Slot::new(value)
    }
}

impl From<Slot> for i64 {
    fn from(slot: Slot) -> Self {
        i64::from(slot.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_bounds() {
        assert!(Slot::new(0).is_ok());
        assert!(Slot::new(5).is_ok());
        assert!(matches!(Slot::new(6), Err(Error::InvalidSlot(6))));
        assert!(matches!(Slot::new(-1), Err(Error::InvalidSlot(-1))));
    }

    #[test]
    fn test_slot_kind() {
        assert_eq!(Slot::REFERENCE.kind(), SlotKind::Reference);
        assert_eq!(Slot::new(3).unwrap().kind(), SlotKind::Competitor);
    }

    #[test]
    fn test_range_excludes_reference() {
        let slots: Vec<u8> = Slot::all(false).map(Slot::number).collect();
        assert_eq!(slots, vec![1, 2, 3, 4, 5]);
        assert_eq!(Slot::all(true).count(), 6);
    }
}
