use anyhow::Result;
use serde_json::json;
use tracing::{debug, info};

use crate::models::City;
use crate::tables::{date_param, resolve_nearest_city};
use crate::worker::{StepTally, WorkOutcome, Worker, WorkerContext, metric_enabled};

pub const LOCATION_METRIC: &str = "location";
pub const LOCATION_TABLE: &str = "user_location_daily";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

pub trait LocationProvider {
    fn has_permission(&self) -> bool;

    /// Last known fix, if the platform has one.
    fn current_location(&self) -> Result<Option<Coordinates>>;
}

/// Records today's position and nearest city.
pub struct LocationWorker<P> {
    provider: P,
}

impl<P: LocationProvider> LocationWorker<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: LocationProvider> Worker for LocationWorker<P> {
    fn name(&self) -> &'static str {
        "location"
    }

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome {
        if !self.provider.has_permission() {
            info!("location permission not granted, skipping");
            return WorkOutcome::Success;
        }
        let Some(token) = ctx.token() else {
            debug!("no session, skipping location");
            return WorkOutcome::Success;
        };

        let mut tally = StepTally::new(self.name());
        match tally.check("metric gate", metric_enabled(ctx.remote, token, LOCATION_METRIC)) {
            Some(true) => {}
            Some(false) => return WorkOutcome::Success,
            None => return tally.outcome(),
        }

        let fix = match tally.check("current location", self.provider.current_location()) {
            Some(Some(fix)) => fix,
            Some(None) => {
                debug!("no location fix available");
                return tally.outcome();
            }
            None => return tally.outcome(),
        };

        // A failed city lookup still records the coordinates
        let city: Option<City> = tally.check(
            "nearest city",
            resolve_nearest_city(ctx.remote, Some(token), fix.latitude, fix.longitude),
        );
        let row = json!({
            "date": date_param(ctx.today()),
            "latitude": fix.latitude,
            "longitude": fix.longitude,
            "city_id": city.as_ref().map(|c| c.id),
        });
        tally.record(
            "daily row",
            ctx.remote
                .upsert(Some(token), LOCATION_TABLE, &row, Some("user_id,date")),
        );
        if let Some(city) = city {
            info!(city = %city.name, "location recorded");
        }
        tally.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Session;
    use crate::tables::{CITIES_TABLE, NEAREST_CITY_RPC};
    use crate::testing::MemoryStore;
    use crate::worker::METRIC_SETTINGS_TABLE;
    use chrono::{FixedOffset, TimeZone, Utc};

    struct FixedLocation(Option<Coordinates>);

    impl LocationProvider for FixedLocation {
        fn has_permission(&self) -> bool {
            true
        }

        fn current_location(&self) -> Result<Option<Coordinates>> {
            Ok(self.0)
        }
    }

    fn run(store: &MemoryStore, fix: Option<Coordinates>) -> WorkOutcome {
        let db = Database::open_in_memory().unwrap();
        let session = Session {
            access_token: "tok".to_string(),
            user_id: None,
            expires_at: None,
        };
        let ctx = WorkerContext {
            remote: store,
            db: &db,
            session: Some(&session),
            now: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        LocationWorker::new(FixedLocation(fix)).run(&ctx)
    }

    fn enabled_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            METRIC_SETTINGS_TABLE,
            vec![json!({"metric": LOCATION_METRIC, "enabled": true})],
        );
        store
    }

    #[test]
    fn test_location_upserts_daily_row_with_city() {
        let store = enabled_store();
        store.set_rpc(
            NEAREST_CITY_RPC,
            json!({"id": 42, "name": "Leeds", "country": "GB", "latitude": 53.8, "longitude": -1.55}),
        );
        let fix = Coordinates {
            latitude: 53.79,
            longitude: -1.54,
        };
        assert_eq!(run(&store, Some(fix)), WorkOutcome::Success);
        let rows = store.rows(LOCATION_TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["date"], "2024-03-01");
        assert_eq!(rows[0]["city_id"], 42);
    }

    #[test]
    fn test_location_without_city_keeps_coordinates() {
        let store = enabled_store();
        store.fail_on(CITIES_TABLE);
        store.fail_on(NEAREST_CITY_RPC);
        let fix = Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        };
        assert_eq!(run(&store, Some(fix)), WorkOutcome::Success);
        let rows = store.rows(LOCATION_TABLE);
        assert!(rows[0]["city_id"].is_null());
        assert_eq!(rows[0]["latitude"], 1.0);
    }

    #[test]
    fn test_location_failed_upsert_is_retry() {
        let store = enabled_store();
        store.fail_on(LOCATION_TABLE);
        let fix = Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        };
        assert_eq!(run(&store, Some(fix)), WorkOutcome::Retry);
    }

    #[test]
    fn test_location_without_fix_writes_nothing() {
        let store = enabled_store();
        assert_eq!(run(&store, None), WorkOutcome::Success);
        assert!(store.rows(LOCATION_TABLE).is_empty());
    }
}
