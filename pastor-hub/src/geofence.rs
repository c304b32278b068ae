use std::sync::Arc;

use pastor_core::{FarmId, FenceHit, NearestFence, geo::GeoPoint};
use thiserror::Error;

use crate::registry::{FenceRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("spatial query failed: {0}")]
    Query(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy)]
pub struct GeofencePolicy {
    /// Answer for readings without a usable position or farm scope.
    pub treat_missing_as_inside: bool,
}

impl Default for GeofencePolicy {
    fn default() -> Self {
        Self {
            treat_missing_as_inside: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointCheck {
    Inside(FenceHit),
    /// `nearest` is `None` when the farm has no fences.
    Outside { nearest: Option<NearestFence> },
}

#[derive(Clone)]
pub struct GeofenceEvaluator {
    fences: Arc<dyn FenceRegistry>,
    policy: GeofencePolicy,
}

impl GeofenceEvaluator {
    pub fn new(fences: Arc<dyn FenceRegistry>, policy: GeofencePolicy) -> Self {
        Self { fences, policy }
    }

    pub fn policy(&self) -> GeofencePolicy {
        self.policy
    }

    /// Containment against every fence of `farm`. Missing data is answered by
    /// the policy without touching the registry.
    pub async fn is_inside(
        &self,
        farm: Option<&FarmId>,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<bool, GeofenceError> {
        let (Some(farm), Some(point)) = (farm, usable_point(lat, lon)) else {
            tracing::debug!("geofence check skipped: no farm scope or position");
            return Ok(self.policy.treat_missing_as_inside);
        };

        let hits = self.fences.fences_containing(farm, point).await?;
        Ok(!hits.is_empty())
    }

    pub async fn nearest(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Option<NearestFence>, GeofenceError> {
        Ok(self.fences.nearest_fence(farm, point).await?)
    }

    /// Diagnostic lookup: the containing fence, or the nearest one.
    pub async fn check_point(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<PointCheck, GeofenceError> {
        let hits = self.fences.fences_containing(farm, point).await?;
        if let Some(hit) = hits.into_iter().next() {
            return Ok(PointCheck::Inside(hit));
        }

        let nearest = self.nearest(farm, point).await?;
        Ok(PointCheck::Outside { nearest })
    }
}

fn usable_point(lat: Option<f64>, lon: Option<f64>) -> Option<GeoPoint> {
    let point = GeoPoint::new(lat?, lon?);
    point.is_finite().then_some(point)
}
