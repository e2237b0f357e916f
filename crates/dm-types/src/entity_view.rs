use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, RecordKey};

/// One outbound relation from an entity to another, as resolved by the
/// entity-resolution engine at the moment a refresh was computed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationView {
    pub related_id: EntityId,
    pub match_level: u8,
    pub match_key: String,
    pub principle: String,
}

/// A snapshot of everything the mart needs to know about one resolved
/// entity: its membership (which source records compose it) and its
/// relations to other entities. Two views with an equal
/// [`crate::hash::entity_view_hash`] are treated as identical by the refresh
/// handler, so it can skip writing a no-op update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    pub entity_id: EntityId,
    pub entity_name: Option<String>,
    pub record_summary: Option<String>,
    pub members: Vec<RecordKey>,
    pub relations: Vec<RelationView>,
}

impl EntityView {
    /// Returns the view with `members` and `relations` sorted into their
    /// canonical order, so equal content always serializes identically
    /// regardless of the order the engine returned it in.
    #[must_use]
    pub fn canonicalized(mut self) -> Self {
        self.members.sort();
        self.members.dedup();
        self.relations.sort();
        self.relations.dedup();
        self
    }

    #[must_use]
    pub fn data_sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self
            .members
            .iter()
            .map(|member| member.data_source.as_str())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalized_dedupes_and_sorts_members() {
        let view = EntityView {
            entity_id: EntityId::new(1),
            entity_name: None,
            record_summary: None,
            members: vec![
                RecordKey::new("B", "2"),
                RecordKey::new("A", "1"),
                RecordKey::new("A", "1"),
            ],
            relations: vec![],
        }
        .canonicalized();

        assert_eq!(
            view.members,
            vec![RecordKey::new("A", "1"), RecordKey::new("B", "2")]
        );
    }

    #[test]
    fn data_sources_are_unique_and_sorted() {
        let view = EntityView {
            entity_id: EntityId::new(1),
            entity_name: None,
            record_summary: None,
            members: vec![
                RecordKey::new("B", "2"),
                RecordKey::new("A", "1"),
                RecordKey::new("B", "3"),
            ],
            relations: vec![],
        };
        assert_eq!(view.data_sources(), vec!["A", "B"]);
    }
}
