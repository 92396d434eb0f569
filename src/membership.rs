//! Membership differ.
//!
//! Memberships are sets of opaque member IDs. An unset desired membership
//! means "do not manage membership" and is distinct from an empty one, which
//! means "nobody".

use std::collections::BTreeSet;

/// Additions and removals that turn an observed membership into a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Members in the desired set but not observed.
    pub to_add: BTreeSet<String>,
    /// Members observed but not in the desired set.
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    /// `to_add = desired − observed`, `to_remove = observed − desired`.
    pub fn between(desired: &BTreeSet<String>, observed: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(observed).cloned().collect(),
            to_remove: observed.difference(desired).cloned().collect(),
        }
    }

    /// Whether the two memberships already agree.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Drop `member` from both sides.
    pub fn excluding(mut self, member: &str) -> Self {
        self.to_add.remove(member);
        self.to_remove.remove(member);
        self
    }
}

/// Diff a possibly-unset desired membership against what was last observed.
///
/// Returns `None` when `desired` is unset: that axis is not reconciled at all.
/// An unset `observed` is treated as empty.
pub fn reconcile(
    desired: Option<&BTreeSet<String>>,
    observed: Option<&BTreeSet<String>>,
) -> Option<MembershipDiff> {
    let desired = desired?;
    Some(match observed {
        Some(observed) => MembershipDiff::between(desired, observed),
        None => MembershipDiff::between(desired, &BTreeSet::new()),
    })
}
