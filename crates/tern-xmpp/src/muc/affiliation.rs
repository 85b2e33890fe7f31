//! Long-term affiliation list of a room.

use std::collections::HashMap;

use jid::BareJid;

use crate::types::Affiliation;

/// A change applied to the affiliation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationChange {
    pub jid: BareJid,
    pub old_affiliation: Affiliation,
    pub new_affiliation: Affiliation,
}

impl AffiliationChange {
    pub fn new(jid: BareJid, old: Affiliation, new: Affiliation) -> Self {
        Self {
            jid,
            old_affiliation: old,
            new_affiliation: new,
        }
    }

    /// True if the new affiliation carries more standing.
    pub fn is_upgrade(&self) -> bool {
        self.new_affiliation.outranks(self.old_affiliation)
    }
}

/// Affiliations by bare address. Absent entries are `none`.
#[derive(Debug, Clone, Default)]
pub struct AffiliationList {
    affiliations: HashMap<BareJid, Affiliation>,
}

impl AffiliationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, jid: &BareJid) -> Affiliation {
        self.affiliations
            .get(jid)
            .copied()
            .unwrap_or(Affiliation::None)
    }

    /// Set the affiliation for a JID.
    ///
    /// Returns the change if the affiliation differs from the current one.
    pub fn set(&mut self, jid: BareJid, affiliation: Affiliation) -> Option<AffiliationChange> {
        let old = self.get(&jid);
        if old == affiliation {
            return None;
        }
        if affiliation == Affiliation::None {
            self.affiliations.remove(&jid);
        } else {
            self.affiliations.insert(jid.clone(), affiliation);
        }
        Some(AffiliationChange::new(jid, old, affiliation))
    }

    /// Everyone holding `affiliation`, sorted for stable output.
    pub fn by_affiliation(&self, affiliation: Affiliation) -> Vec<BareJid> {
        let mut jids: Vec<BareJid> = self
            .affiliations
            .iter()
            .filter(|(_, &a)| a == affiliation)
            .map(|(jid, _)| jid.clone())
            .collect();
        jids.sort_by_key(|jid| jid.to_string());
        jids
    }

    pub fn owner_count(&self) -> usize {
        self.affiliations
            .values()
            .filter(|&&a| a == Affiliation::Owner)
            .count()
    }

    pub fn len(&self) -> usize {
        self.affiliations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.affiliations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(s: &str) -> BareJid {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_is_none() {
        let list = AffiliationList::new();
        assert_eq!(list.get(&bare("user@example.com")), Affiliation::None);
    }

    #[test]
    fn test_set_reports_changes_only() {
        let mut list = AffiliationList::new();
        let change = list
            .set(bare("user@example.com"), Affiliation::Member)
            .unwrap();
        assert!(change.is_upgrade());
        assert!(list.set(bare("user@example.com"), Affiliation::Member).is_none());

        let change = list.set(bare("user@example.com"), Affiliation::None).unwrap();
        assert_eq!(change.old_affiliation, Affiliation::Member);
        assert!(list.is_empty());
    }

    #[test]
    fn test_by_affiliation_and_owner_count() {
        let mut list = AffiliationList::new();
        list.set(bare("b@example.com"), Affiliation::Owner);
        list.set(bare("a@example.com"), Affiliation::Owner);
        list.set(bare("c@example.com"), Affiliation::Outcast);

        assert_eq!(list.owner_count(), 2);
        assert_eq!(
            list.by_affiliation(Affiliation::Owner),
            vec![bare("a@example.com"), bare("b@example.com")]
        );
        assert_eq!(list.by_affiliation(Affiliation::Outcast).len(), 1);
    }
}
