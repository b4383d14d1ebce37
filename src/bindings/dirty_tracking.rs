// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
This module implements "dirty tracking" for structures whose GPU copy is baked lazily.

Rather than a single dirty bit, a structure carries two version counters:

* the **structural** version moves when the shape changes (entries added or removed), which
  invalidates any baked copy outright
* the **updating** version moves when only data changes, which a baked copy built with update
  support can absorb in place

A bake records the versions it saw.  Comparing them against the live counters yields a
[DirtyState] without storing one.
*/

/// Live version counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Versions {
    structural: u64,
    updating: u64,
}

impl Versions {
    pub fn structural(&self) -> u64 {
        self.structural
    }

    pub fn updating(&self) -> u64 {
        self.updating
    }

    pub fn mark_structural(&mut self) {
        self.structural += 1;
    }

    pub fn mark_updating(&mut self) {
        self.updating += 1;
    }
}

/// What a baked copy was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BakedVersions {
    pub versions: Versions,
    /// Whether the baked copy can be updated in place.
    pub allows_update: bool,
}

/// How a baked copy relates to its live source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyState {
    NotBuilt,
    NeedsRebuild,
    NeedsUpdate,
    UpToDate,
}

impl DirtyState {
    pub fn derive(live: Versions, baked: Option<BakedVersions>) -> Self {
        let Some(baked) = baked else {
            return DirtyState::NotBuilt;
        };
        if baked.versions.structural < live.structural {
            DirtyState::NeedsRebuild
        } else if baked.versions.updating < live.updating {
            //a copy built without update support can only be replaced
            if baked.allows_update {
                DirtyState::NeedsUpdate
            } else {
                DirtyState::NeedsRebuild
            }
        } else {
            DirtyState::UpToDate
        }
    }

    /// Whether a bake has nothing to do.
    pub fn is_clean(self) -> bool {
        self == DirtyState::UpToDate
    }
}
