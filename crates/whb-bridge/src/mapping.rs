//! Bidirectional OID <-> host state id table

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;
use whb_core::ViewRow;

#[derive(Debug, Default)]
struct Tables {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl Tables {
    fn insert(&mut self, oid: &str, state_id: &str) -> Option<String> {
        // a state carries exactly one OID
        if let Some(old_oid) = self.reverse.remove(state_id) {
            if old_oid != oid {
                self.forward.remove(&old_oid);
            }
        }
        let previous = self.forward.insert(oid.to_string(), state_id.to_string());
        self.reverse.insert(state_id.to_string(), oid.to_string());

        match previous {
            Some(prev) if prev != state_id => {
                self.reverse.remove(&prev);
                Some(prev)
            }
            _ => None,
        }
    }
}

/// One-to-one association between controller OIDs and host state ids
///
/// Readers never observe a partially rebuilt table.
#[derive(Debug, Default)]
pub struct MappingTable {
    tables: RwLock<Tables>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table with the states in `rows` that carry an OID
    ///
    /// If two states claim the same OID, the first one in id order is kept.
    pub fn rebuild(&self, rows: &[ViewRow]) -> usize {
        let mut fresh = Tables::default();
        for row in rows {
            if !row.value.is_state() {
                continue;
            }
            let Some(oid) = row.value.oid() else {
                continue;
            };
            if let Some(existing) = fresh.forward.get(oid) {
                warn!(oid, kept = %existing, ignored = %row.id, "OID mapped by more than one state");
                continue;
            }
            fresh.insert(oid, &row.id);
        }

        let len = fresh.forward.len();
        *self.tables.write() = fresh;
        len
    }

    /// Host state id of an OID
    pub fn get(&self, oid: &str) -> Option<String> {
        self.tables.read().forward.get(oid).cloned()
    }

    /// OID of a host state id
    pub fn get_reverse(&self, state_id: &str) -> Option<String> {
        self.tables.read().reverse.get(state_id).cloned()
    }

    /// Map `oid` to `state_id`
    ///
    /// Returns the state that previously held `oid`, if it was a different
    /// one. That mapping is gone afterwards.
    pub fn put(&self, oid: &str, state_id: &str) -> Option<String> {
        self.tables.write().insert(oid, state_id)
    }

    /// Drop the mapping of an OID, returning its state id
    pub fn remove(&self, oid: &str) -> Option<String> {
        let mut tables = self.tables.write();
        let state_id = tables.forward.remove(oid)?;
        tables.reverse.remove(&state_id);
        Some(state_id)
    }

    /// Drop the mapping of a host state, returning its OID
    pub fn remove_state(&self, state_id: &str) -> Option<String> {
        let mut tables = self.tables.write();
        let oid = tables.reverse.remove(state_id)?;
        tables.forward.remove(&oid);
        Some(oid)
    }

    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }

    pub fn len(&self) -> usize {
        self.tables.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(oid, state_id)` pairs sorted by OID
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .tables
            .read()
            .forward
            .iter()
            .map(|(oid, id)| (oid.clone(), id.clone()))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whb_core::{HostObject, ObjectCommon};

    fn row(id: &str, oid: Option<&str>) -> ViewRow {
        let value = match oid {
            Some(oid) => HostObject::state(ObjectCommon::named(id), oid),
            None => HostObject::channel(id),
        };
        ViewRow {
            id: id.to_string(),
            value,
        }
    }

    #[test]
    fn test_rebuild_replaces() {
        let table = MappingTable::new();
        table.put("/60/9/9/0/1/0", "stale");

        let n = table.rebuild(&[
            row("windhager.0.60.1-1", None),
            row("windhager.0.60.1-1.1.00-001", Some("/60/1/1/0/1/0")),
            row("windhager.0.60.1-1.1.00-002", Some("/60/1/1/0/2/0")),
        ]);

        assert_eq!(n, 2);
        assert_eq!(table.get("/60/9/9/0/1/0"), None);
        assert_eq!(table.get_reverse("stale"), None);
        assert_eq!(
            table.get("/60/1/1/0/1/0").as_deref(),
            Some("windhager.0.60.1-1.1.00-001")
        );
        assert_eq!(
            table.get_reverse("windhager.0.60.1-1.1.00-002").as_deref(),
            Some("/60/1/1/0/2/0")
        );
    }

    #[test]
    fn test_rebuild_after_deletion() {
        let table = MappingTable::new();
        let rows = vec![
            row("a", Some("/60/1/1/0/1/0")),
            row("b", Some("/60/1/1/0/2/0")),
        ];
        table.rebuild(&rows);
        table.rebuild(&rows[..1]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/60/1/1/0/2/0"), None);
        assert_eq!(table.get_reverse("b"), None);
    }

    #[test]
    fn test_rebuild_keeps_first_duplicate() {
        let table = MappingTable::new();
        table.rebuild(&[row("a", Some("/60/1/1/0/1/0")), row("b", Some("/60/1/1/0/1/0"))]);
        assert_eq!(table.get("/60/1/1/0/1/0").as_deref(), Some("a"));
        assert_eq!(table.get_reverse("b"), None);
    }

    #[test]
    fn test_put_conflict() {
        let table = MappingTable::new();
        assert_eq!(table.put("/60/1/1/0/1/0", "a"), None);
        assert_eq!(table.put("/60/1/1/0/1/0", "a"), None);

        let previous = table.put("/60/1/1/0/1/0", "b");
        assert_eq!(previous.as_deref(), Some("a"));
        assert_eq!(table.get("/60/1/1/0/1/0").as_deref(), Some("b"));
        assert_eq!(table.get_reverse("a"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_put_retargets_state() {
        let table = MappingTable::new();
        table.put("/60/1/1/0/1/0", "a");
        table.put("/60/1/1/0/2/0", "a");

        assert_eq!(table.get("/60/1/1/0/1/0"), None);
        assert_eq!(table.get_reverse("a").as_deref(), Some("/60/1/1/0/2/0"));
        assert_eq!(table.entries(), vec![("/60/1/1/0/2/0".to_string(), "a".to_string())]);
    }

    #[test]
    fn test_remove() {
        let table = MappingTable::new();
        table.put("/60/1/1/0/1/0", "a");
        table.put("/60/1/1/0/2/0", "b");

        assert_eq!(table.remove("/60/1/1/0/1/0").as_deref(), Some("a"));
        assert_eq!(table.get_reverse("a"), None);
        assert_eq!(table.remove_state("b").as_deref(), Some("/60/1/1/0/2/0"));
        assert!(table.is_empty());
    }
}
