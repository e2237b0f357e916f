use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dm_types::{EntityId, EntityView};
use error_stack::{Report, Result};

use crate::{EngineUnavailable, EngineVersion, EntityRepository};

/// An in-memory stand-in for the entity-resolution engine, used to exercise
/// the refresh-entity handler's diff logic without a real engine attached.
///
/// Tests drive it by calling [`set_entity`](Self::set_entity) /
/// [`remove_entity`](Self::remove_entity) to describe what the engine
/// "currently thinks", then invoke the handler and assert on the mart's
/// resulting state.
#[derive(Default)]
pub struct MockEntityRepository {
    entities: Mutex<HashMap<EntityId, EntityView>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MockEntityRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entity(&self, view: EntityView) {
        self.entities.lock().expect("mock engine mutex poisoned").insert(view.entity_id, view.canonicalized());
    }

    pub fn remove_entity(&self, entity_id: EntityId) {
        self.entities.lock().expect("mock engine mutex poisoned").remove(&entity_id);
    }

    /// Makes every subsequent call fail with [`EngineUnavailable`], to
    /// exercise retry paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityRepository for MockEntityRepository {
    async fn fetch_entity(&self, entity_id: EntityId) -> Result<Option<EntityView>, EngineUnavailable> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Report::new(EngineUnavailable).attach_printable("mock engine set unavailable"));
        }
        Ok(self
            .entities
            .lock()
            .expect("mock engine mutex poisoned")
            .get(&entity_id)
            .cloned())
    }

    async fn version(&self) -> Result<EngineVersion, EngineUnavailable> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Report::new(EngineUnavailable).attach_printable("mock engine set unavailable"));
        }
        Ok(EngineVersion("mock-1.0.0".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use dm_types::{EntityView, RecordKey};

    use super::*;

    fn sample_view(id: i64) -> EntityView {
        EntityView {
            entity_id: EntityId::new(id),
            entity_name: Some("TEST".to_owned()),
            record_summary: None,
            members: vec![RecordKey::new("CUSTOMERS", id.to_string())],
            relations: vec![],
        }
    }

    #[tokio::test]
    async fn returns_none_for_unknown_entity() {
        let repo = MockEntityRepository::new();
        assert!(repo.fetch_entity(EntityId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn returns_set_entity() {
        let repo = MockEntityRepository::new();
        repo.set_entity(sample_view(1));
        let fetched = repo.fetch_entity(EntityId::new(1)).await.unwrap();
        assert_eq!(fetched.unwrap().entity_id, EntityId::new(1));
    }

    #[tokio::test]
    async fn unavailable_flag_fails_every_call() {
        let repo = MockEntityRepository::new();
        repo.set_entity(sample_view(1));
        repo.set_unavailable(true);
        assert!(repo.fetch_entity(EntityId::new(1)).await.is_err());
        assert!(repo.version().await.is_err());
    }
}
