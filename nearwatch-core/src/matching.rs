use std::sync::Arc;

use nearwatch_shared::errors::AppResult;

use crate::geo::{haversine_km, Coordinates};
use crate::models::{Alert, SoftDelete};
use crate::store::Store;

/// Finds the live, verified alerts whose circle contains a point. The store
/// narrows candidates with a degree box; the exact haversine check runs here.
pub struct MatchEngine {
    store: Arc<dyn Store>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn find_matching_alerts(&self, point: Coordinates) -> AppResult<Vec<Alert>> {
        let candidates = self.store.match_candidates(point)?;
        let candidate_count = candidates.len();

        let matched: Vec<Alert> = candidates
            .into_iter()
            .filter(|a| a.verified && !a.is_deleted())
            .filter(|a| haversine_km(a.center(), point) <= a.radius_km)
            .collect();

        tracing::debug!(
            latitude = point.latitude,
            longitude = point.longitude,
            candidates = candidate_count,
            matched = matched.len(),
            "alerts matched"
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAlert;
    use crate::store::{AlertStore, MemoryStore, SoftDeleteRepo};
    use chrono::Utc;
    use uuid::Uuid;

    fn alert(center: Coordinates, radius_km: f64, verified: bool) -> NewAlert {
        NewAlert {
            external_id: Uuid::new_v4(),
            latitude: center.latitude,
            longitude: center.longitude,
            radius_km,
            message: "watch".into(),
            owner_identifier: "device-0001".into(),
            encrypted_email: None,
            email_hash: None,
            verified,
            use_email: false,
            use_push: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn boundary_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let engine = MatchEngine::new(store.clone());
        let center = Coordinates::new(40.0, -74.0);
        let point = Coordinates::new(40.05, -74.0);
        let exact = haversine_km(center, point);

        store.insert_alert(alert(center, exact, true)).unwrap();
        assert_eq!(engine.find_matching_alerts(point).unwrap().len(), 1);

        let store = Arc::new(MemoryStore::new());
        let engine = MatchEngine::new(store.clone());
        store.insert_alert(alert(center, exact - 1e-6, true)).unwrap();
        assert!(engine.find_matching_alerts(point).unwrap().is_empty());
    }

    #[test]
    fn box_corner_outside_circle_is_excluded() {
        let store = Arc::new(MemoryStore::new());
        let engine = MatchEngine::new(store.clone());
        let center = Coordinates::new(0.0, 0.0);
        store.insert_alert(alert(center, 111.0, true)).unwrap();

        // Inside the one-degree box but ~157 km from the center.
        assert!(engine.find_matching_alerts(Coordinates::new(0.99, 0.99)).unwrap().is_empty());
        assert_eq!(engine.find_matching_alerts(Coordinates::new(0.5, 0.5)).unwrap().len(), 1);
    }

    #[test]
    fn unverified_and_deleted_alerts_never_match() {
        let store = Arc::new(MemoryStore::new());
        let engine = MatchEngine::new(store.clone());
        let center = Coordinates::new(40.0, -74.0);

        store.insert_alert(alert(center, 10.0, false)).unwrap();
        let deleted = store.insert_alert(alert(center, 10.0, true)).unwrap();
        SoftDeleteRepo::<Alert>::soft_delete(&*store, deleted.external_id, Utc::now()).unwrap();
        assert!(engine.find_matching_alerts(center).unwrap().is_empty());

        let live = store.insert_alert(alert(center, 10.0, true)).unwrap();
        let matched = engine.find_matching_alerts(center).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].external_id, live.external_id);
    }
}
