use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use jiff::Timestamp;
use ordered_float::OrderedFloat;
use pastor_core::{FarmId, Fence, FenceHit, FenceId, NearestFence, geo::GeoPoint};
use tokio::sync::RwLock;

use crate::registry::{FenceRegistry, FenceUpsert, RegistryError};

#[derive(Clone, Default)]
pub struct InMemoryFenceRegistry {
    fences: Arc<RwLock<HashMap<FenceId, Fence>>>,
}

impl InMemoryFenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FenceRegistry for InMemoryFenceRegistry {
    async fn list_fences(&self, farm: Option<&FarmId>) -> Result<Vec<Fence>, RegistryError> {
        let fences = self.fences.read().await;
        let mut list: Vec<Fence> = fences
            .values()
            .filter(|f| farm.is_none_or(|farm| &f.farm_id == farm))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(list)
    }

    async fn get_fence(&self, id: FenceId) -> Result<Option<Fence>, RegistryError> {
        let fences = self.fences.read().await;
        Ok(fences.get(&id).cloned())
    }

    async fn upsert_fence(
        &self,
        fence: FenceUpsert,
        at: Timestamp,
    ) -> Result<Fence, RegistryError> {
        let mut fences = self.fences.write().await;
        let previous = fence.id.and_then(|id| fences.get(&id));
        let fence = fence.into_fence(previous, at);
        let _ = fences.insert(fence.id, fence.clone());
        Ok(fence)
    }

    async fn delete_fence(&self, id: FenceId) -> Result<bool, RegistryError> {
        let mut fences = self.fences.write().await;
        Ok(fences.remove(&id).is_some())
    }

    async fn fences_containing(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Vec<FenceHit>, RegistryError> {
        let fences = self.fences.read().await;
        Ok(fences
            .values()
            .filter(|f| &f.farm_id == farm && f.geometry.bbox().contains(point))
            .filter(|f| f.geometry.contains(point))
            .map(|f| FenceHit {
                fence_id: f.id,
                name: f.name.clone(),
            })
            .collect())
    }

    async fn nearest_fence(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Option<NearestFence>, RegistryError> {
        let fences = self.fences.read().await;
        Ok(fences
            .values()
            .filter(|f| &f.farm_id == farm)
            .map(|f| (f, f.geometry.distance_to(point)))
            .filter(|(_, d)| d.is_finite())
            .min_by_key(|(_, d)| OrderedFloat(*d))
            .map(|(f, distance_m)| NearestFence {
                fence_id: f.id,
                name: f.name.clone(),
                distance_m,
            }))
    }
}
