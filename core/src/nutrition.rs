//! Nutrition sync: platform change feed → local outbox → hosted `nutrition_items`.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::fooddata::enrich;
use crate::models::{NutritionRecord, OutboxItem, OutboxOp, validate_nutrition_record};
use crate::postgrest::{Query, RemoteStore};
use crate::service::FoodDataProvider;
use crate::worker::{StepTally, WorkOutcome, Worker, WorkerContext};

pub const NUTRITION_TABLE: &str = "nutrition_items";
const NUTRITION_CONFLICT: &str = "user_id,external_id";

/// Items that have failed this many times are dropped.
pub const MAX_OUTBOX_RETRIES: i64 = 10;
const PUSH_BATCH: i64 = 50;

pub const CHANGE_TOKEN_KEY: &str = "nutrition_change_token";

#[derive(Debug, Clone, PartialEq)]
pub enum NutritionChange {
    Upserted(NutritionRecord),
    Deleted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub changes: Vec<NutritionChange>,
    pub next_token: String,
}

/// Health Connect-style change feed.
pub trait NutritionSource {
    fn has_permission(&self) -> bool;

    /// Changes since `token`; `None` asks for a fresh feed.
    fn changes_since(&self, token: Option<&str>) -> Result<ChangeBatch>;
}

/// Id for an entry typed in by hand rather than read from a platform feed.
#[must_use]
pub fn manual_external_id() -> String {
    format!("manual-{}", Uuid::new_v4())
}

pub fn enqueue_record(db: &Database, record: &NutritionRecord) -> Result<OutboxItem> {
    validate_nutrition_record(record)?;
    let payload = serde_json::to_string(record)?;
    db.enqueue_outbox(OutboxOp::Upsert, &record.external_id, Some(&payload))
}

pub fn enqueue_delete(db: &Database, external_id: &str) -> Result<OutboxItem> {
    if external_id.trim().is_empty() {
        anyhow::bail!("Nutrition record id must not be empty");
    }
    db.enqueue_outbox(OutboxOp::Delete, external_id, None)
}

/// Drain the change feed into the outbox and persist the new change token.
pub fn pull_changes(db: &Database, source: &dyn NutritionSource) -> Result<usize> {
    let token = db.get_setting(CHANGE_TOKEN_KEY)?;
    let batch = source.changes_since(token.as_deref())?;
    let count = batch.changes.len();
    for change in &batch.changes {
        match change {
            NutritionChange::Upserted(record) => {
                if let Err(e) = enqueue_record(db, record) {
                    warn!(id = %record.external_id, error = %format!("{e:#}"), "skipping invalid record");
                }
            }
            NutritionChange::Deleted(id) => {
                enqueue_delete(db, id)?;
            }
        }
    }
    db.set_setting(CHANGE_TOKEN_KEY, &batch.next_token)?;
    debug!(count, "pulled nutrition changes");
    Ok(count)
}

fn push_item(
    remote: &dyn RemoteStore,
    token: &str,
    item: &OutboxItem,
    food: Option<&dyn FoodDataProvider>,
) -> Result<()> {
    match item.operation {
        OutboxOp::Upsert => {
            let payload = item.payload.as_deref().context("Upsert without payload")?;
            let mut record: NutritionRecord =
                serde_json::from_str(payload).context("Corrupt outbox payload")?;
            if let Some(food) = food.filter(|_| record.needs_enrichment()) {
                match food.search(&record.food_name) {
                    Ok(Some(profile)) => record = enrich(record, &profile),
                    Ok(None) => debug!(food = %record.food_name, "no nutrient match"),
                    // Enrichment is best effort
                    Err(e) => warn!(food = %record.food_name, error = %format!("{e:#}"), "food lookup failed"),
                }
            }
            remote.upsert(
                Some(token),
                NUTRITION_TABLE,
                &serde_json::to_value(&record)?,
                Some(NUTRITION_CONFLICT),
            )
        }
        OutboxOp::Delete => remote.delete(
            Some(token),
            NUTRITION_TABLE,
            &Query::new().eq("external_id", &item.entity_id),
        ),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub failed: usize,
    pub dropped: usize,
}

/// Push pending outbox items oldest first; each item is its own tally step.
pub fn push_outbox(
    db: &Database,
    remote: &dyn RemoteStore,
    token: &str,
    food: Option<&dyn FoodDataProvider>,
    tally: &mut StepTally,
) -> Result<PushReport> {
    let mut report = PushReport::default();
    for item in db.pending_outbox(PUSH_BATCH)? {
        if item.retry_count >= MAX_OUTBOX_RETRIES {
            warn!(
                id = item.id,
                entity = %item.entity_id,
                last_error = item.last_error.as_deref().unwrap_or_default(),
                "dropping outbox item after too many retries"
            );
            db.complete_outbox(item.id)?;
            report.dropped += 1;
            continue;
        }
        let result = push_item(remote, token, &item, food);
        if let Err(e) = &result {
            db.fail_outbox(item.id, &format!("{e:#}"))?;
        }
        let step = format!("{} {}", item.operation.as_str(), item.entity_id);
        if tally.record(step, result).is_some() {
            db.complete_outbox(item.id)?;
            report.pushed += 1;
        } else {
            report.failed += 1;
        }
    }
    if report != PushReport::default() {
        info!(
            pushed = report.pushed,
            failed = report.failed,
            dropped = report.dropped,
            "nutrition outbox pushed"
        );
    }
    Ok(report)
}

#[derive(Default)]
pub struct NutritionSyncWorker {
    source: Option<Box<dyn NutritionSource>>,
    food: Option<Box<dyn FoodDataProvider>>,
}

impl NutritionSyncWorker {
    #[must_use]
    pub fn new(
        source: Option<Box<dyn NutritionSource>>,
        food: Option<Box<dyn FoodDataProvider>>,
    ) -> Self {
        Self { source, food }
    }
}

impl Worker for NutritionSyncWorker {
    fn name(&self) -> &'static str {
        "nutrition_sync"
    }

    fn run(&self, ctx: &WorkerContext<'_>) -> WorkOutcome {
        let mut tally = StepTally::new(self.name());
        if let Some(source) = self.source.as_deref().filter(|s| s.has_permission()) {
            tally.check("pull changes", pull_changes(ctx.db, source));
        }

        let Some(token) = ctx.token() else {
            debug!("no session, leaving nutrition outbox queued");
            return tally.outcome();
        };
        if let Err(e) = push_outbox(ctx.db, ctx.remote, token, self.food.as_deref(), &mut tally) {
            tally.check::<()>("outbox", Err(e));
        }
        tally.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NutrientProfile, Session};
    use crate::testing::MemoryStore;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use serde_json::json;

    fn record(id: &str, name: &str) -> NutritionRecord {
        NutritionRecord {
            external_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            food_name: name.to_string(),
            meal_type: Some("breakfast".to_string()),
            grams: Some(200.0),
            calories: None,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            sugar_g: None,
            fiber_g: None,
            sodium_mg: None,
            caffeine_mg: None,
            source: Some("health_connect".to_string()),
        }
    }

    struct FakeFeed;

    impl NutritionSource for FakeFeed {
        fn has_permission(&self) -> bool {
            true
        }

        fn changes_since(&self, token: Option<&str>) -> Result<ChangeBatch> {
            let changes = match token {
                None => vec![
                    NutritionChange::Upserted(record("hc-1", "Oatmeal")),
                    NutritionChange::Upserted(record("hc-2", "Coffee")),
                ],
                Some(_) => vec![NutritionChange::Deleted("hc-2".to_string())],
            };
            Ok(ChangeBatch {
                changes,
                next_token: "t1".to_string(),
            })
        }
    }

    struct FakeFood;

    impl FoodDataProvider for FakeFood {
        fn search(&self, query: &str) -> Result<Option<NutrientProfile>> {
            if query == "Oatmeal" {
                Ok(Some(NutrientProfile {
                    description: "Oats".to_string(),
                    calories_per_100g: 68.0,
                    protein_per_100g: Some(2.4),
                    ..NutrientProfile::default()
                }))
            } else {
                anyhow::bail!("lookup offline")
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session {
            access_token: "tok".to_string(),
            user_id: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_pull_changes_persists_token() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(pull_changes(&db, &FakeFeed).unwrap(), 2);
        assert_eq!(db.get_setting(CHANGE_TOKEN_KEY).unwrap().as_deref(), Some("t1"));
        assert_eq!(db.outbox_len().unwrap(), 2);

        // second pull sees the delete, which supersedes the pending upsert
        pull_changes(&db, &FakeFeed).unwrap();
        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].operation, OutboxOp::Delete);
        assert_eq!(pending[1].entity_id, "hc-2");
    }

    #[test]
    fn test_worker_pushes_and_enriches() {
        let db = Database::open_in_memory().unwrap();
        let store = MemoryStore::new();
        let s = session();
        let ctx = WorkerContext {
            remote: &store,
            db: &db,
            session: Some(&s),
            now: now(),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        let worker = NutritionSyncWorker::new(Some(Box::new(FakeFeed)), Some(Box::new(FakeFood)));
        assert_eq!(worker.run(&ctx), WorkOutcome::Success);
        assert_eq!(db.outbox_len().unwrap(), 0);

        let rows = store.rows(NUTRITION_TABLE);
        assert_eq!(rows.len(), 2);
        let oats = rows.iter().find(|r| r["external_id"] == "hc-1").unwrap();
        assert_eq!(oats["calories"], 136.0);
        assert_eq!(oats["protein_g"], 4.8);
        // failed lookup still pushes the bare record
        let coffee = rows.iter().find(|r| r["external_id"] == "hc-2").unwrap();
        assert!(coffee.get("calories").is_none());
    }

    #[test]
    fn test_worker_retries_when_pull_works_but_every_push_fails() {
        let db = Database::open_in_memory().unwrap();
        let store = MemoryStore::new();
        store.fail_on(NUTRITION_TABLE);
        let s = session();
        let ctx = WorkerContext {
            remote: &store,
            db: &db,
            session: Some(&s),
            now: now(),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        let worker = NutritionSyncWorker::new(Some(Box::new(FakeFeed)), None);
        assert_eq!(worker.run(&ctx), WorkOutcome::Retry);
        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|i| i.retry_count == 1));
    }

    #[test]
    fn test_delete_targets_external_id() {
        let db = Database::open_in_memory().unwrap();
        let store = MemoryStore::new();
        store.seed(
            NUTRITION_TABLE,
            vec![json!({"external_id": "a"}), json!({"external_id": "b"})],
        );
        enqueue_delete(&db, "a").unwrap();
        let mut tally = StepTally::new("test");
        let report = push_outbox(&db, &store, "tok", None, &mut tally).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(store.rows(NUTRITION_TABLE), vec![json!({"external_id": "b"})]);
    }

    #[test]
    fn test_failures_increment_then_drop() {
        let db = Database::open_in_memory().unwrap();
        let store = MemoryStore::new();
        store.fail_on(NUTRITION_TABLE);
        enqueue_record(&db, &record("hc-1", "Toast")).unwrap();

        for attempt in 1..=MAX_OUTBOX_RETRIES {
            let mut tally = StepTally::new("test");
            let report = push_outbox(&db, &store, "tok", None, &mut tally).unwrap();
            assert_eq!(report.failed, 1);
            assert_eq!(tally.outcome(), WorkOutcome::Retry);
            let item = &db.pending_outbox(1).unwrap()[0];
            assert_eq!(item.retry_count, attempt);
            assert_eq!(item.last_error.as_deref(), Some("boom"));
        }

        let mut tally = StepTally::new("test");
        let report = push_outbox(&db, &store, "tok", None, &mut tally).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(db.outbox_len().unwrap(), 0);
    }

    #[test]
    fn test_worker_without_session_keeps_outbox() {
        let db = Database::open_in_memory().unwrap();
        let store = MemoryStore::new();
        enqueue_record(&db, &record("hc-1", "Toast")).unwrap();
        let ctx = WorkerContext {
            remote: &store,
            db: &db,
            session: None,
            now: now(),
            offset: FixedOffset::east_opt(0).unwrap(),
        };
        assert_eq!(NutritionSyncWorker::default().run(&ctx), WorkOutcome::Success);
        assert_eq!(db.outbox_len().unwrap(), 1);
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_manual_external_ids_are_unique() {
        let a = manual_external_id();
        assert!(a.starts_with("manual-"));
        assert_ne!(a, manual_external_id());
    }

    #[test]
    fn test_enqueue_rejects_invalid_record() {
        let db = Database::open_in_memory().unwrap();
        assert!(enqueue_record(&db, &record("", "Toast")).is_err());
        assert!(enqueue_delete(&db, " ").is_err());
    }
}
