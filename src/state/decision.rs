use crate::storage::ItemRecord;

/// Overwrite policy for items that already exist in the archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupPolicy {
    /// Replace existing items with the freshly fetched copy
    pub overwrite: bool,

    /// Allow items marked deleted-upstream to be replaced
    pub overwrite_deleted: bool,

    /// Stop a listing walk at the first item already archived
    pub continue_mode: bool,
}

/// What the archive does with one fetched item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Not archived yet: store it
    Insert,

    /// Already archived: leave the stored copy untouched
    Skip,

    /// Already archived: overwrite the stored copy
    Replace,

    /// The remote copy is a tombstone: flag the stored copy as deleted, keep its content
    MarkDeleted,

    /// Already archived in continue mode: stop this listing walk
    Halt,
}

impl Decision {
    /// Returns true if this decision writes to the archive
    pub fn writes(&self) -> bool {
        matches!(self, Self::Insert | Self::Replace | Self::MarkDeleted)
    }

    /// Returns true if the fresh copy ends up stored
    pub fn stores_content(&self) -> bool {
        matches!(self, Self::Insert | Self::Replace)
    }
}

/// Decides what to do with a fetched item
///
/// Rules, first match wins:
///
/// | Stored copy | Condition | Decision |
/// |-------------|-----------|----------|
/// | none | | `Insert` |
/// | marked deleted | `overwrite_deleted` | `Replace` |
/// | marked deleted | otherwise | `Skip` |
/// | live | `continue_mode` and not `overwrite` | `Halt` |
/// | live | fetched copy is a tombstone, `overwrite_deleted` | `Replace` |
/// | live | fetched copy is a tombstone | `MarkDeleted` |
/// | live | `overwrite` | `Replace` |
/// | live | otherwise | `Skip` |
///
/// Only `overwrite_deleted` can ever bring a deleted item back.
pub fn decide(
    existing: Option<&ItemRecord>,
    candidate_deleted: bool,
    policy: &DedupPolicy,
) -> Decision {
    let Some(existing) = existing else {
        return Decision::Insert;
    };

    if existing.deleted_at.is_some() {
        return if policy.overwrite_deleted {
            Decision::Replace
        } else {
            Decision::Skip
        };
    }

    if policy.continue_mode && !policy.overwrite {
        return Decision::Halt;
    }

    if candidate_deleted {
        return if policy.overwrite_deleted {
            Decision::Replace
        } else {
            Decision::MarkDeleted
        };
    }

    if policy.overwrite {
        Decision::Replace
    } else {
        Decision::Skip
    }
}
