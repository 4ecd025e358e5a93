//! The user's saved cities.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    model::Place,
    offline::{OfflineAction, OfflineStorage},
    store::KeyValueStore,
};

const KEY: &str = "user:saved_locations";

#[derive(Debug, Clone)]
pub struct SavedLocations {
    store: Arc<dyn KeyValueStore>,
    offline: OfflineStorage,
    queue_changes: bool,
}

impl SavedLocations {
    /// Changes are queued for replay to a sync endpoint.
    pub fn new(offline: OfflineStorage) -> Self {
        Self { store: offline.store(), offline, queue_changes: true }
    }

    /// Changes stay on this device only.
    pub fn local_only(mut self) -> Self {
        self.queue_changes = false;
        self
    }

    async fn enqueue(&self, action: OfflineAction) -> Result<()> {
        if self.queue_changes {
            self.offline.queue_action(action).await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Place>> {
        match self.store.get(KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse saved locations"),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, places: &[Place]) -> Result<()> {
        let json = serde_json::to_string(places).context("Failed to serialize saved locations")?;
        self.store.set(KEY, &json).await
    }

    /// Add a place unless one at the same cache key exists. Returns whether it was added.
    pub async fn add(&self, place: Place) -> Result<bool> {
        let mut places = self.list().await?;
        let key = place.coordinates.cache_key();
        if places.iter().any(|p| p.coordinates.cache_key() == key) {
            return Ok(false);
        }

        places.push(place.clone());
        self.write(&places).await?;
        self.enqueue(OfflineAction::AddCity { place }).await?;
        Ok(true)
    }

    /// Remove by exact cache key or case-insensitive name. Returns the removed place.
    pub async fn remove(&self, key_or_name: &str) -> Result<Option<Place>> {
        let mut places = self.list().await?;
        let Some(idx) = places.iter().position(|p| {
            p.coordinates.cache_key() == key_or_name || p.name.eq_ignore_ascii_case(key_or_name)
        }) else {
            return Ok(None);
        };

        let removed = places.remove(idx);
        self.write(&places).await?;
        self.enqueue(OfflineAction::RemoveCity {
            key: removed.coordinates.cache_key(),
            name: removed.name.clone(),
        })
        .await?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Coordinates, store::MemoryStore};

    fn place(name: &str, lat: f64) -> Place {
        Place {
            name: name.into(),
            region: None,
            country: Some("FR".into()),
            coordinates: Coordinates { lat, lon: 4.8 },
        }
    }

    #[tokio::test]
    async fn add_remove_and_queue() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        let saved = SavedLocations::new(offline.clone());

        assert!(saved.add(place("Lyon", 45.76)).await.unwrap());
        assert!(!saved.add(place("Lyon again", 45.761)).await.unwrap());
        assert!(saved.add(place("Paris", 48.85)).await.unwrap());
        assert_eq!(saved.list().await.unwrap().len(), 2);

        let removed = saved.remove("lyon").await.unwrap().unwrap();
        assert_eq!(removed.name, "Lyon");
        assert!(saved.remove("Marseille").await.unwrap().is_none());

        let queued: Vec<_> = offline
            .pending_actions()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.action)
            .collect();
        assert_eq!(queued.len(), 3);
        assert!(matches!(queued[2], OfflineAction::RemoveCity { ref name, .. } if name == "Lyon"));
    }

    #[tokio::test]
    async fn local_only_does_not_queue() {
        let offline = OfflineStorage::new(Arc::new(MemoryStore::new()));
        let saved = SavedLocations::new(offline.clone()).local_only();

        saved.add(place("Nice", 43.7)).await.unwrap();
        saved.remove("Nice").await.unwrap();
        assert!(offline.pending_actions().await.unwrap().is_empty());
    }
}
