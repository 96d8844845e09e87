//! Behaviour tests for history tracking against the in-memory host.
//!
//! Each test registers a live `User` model, mutates it through the host's
//! lifecycle, and inspects the rows that land in `UserHistory`.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use serde_json::{Value, json};
use tempora_core::{
    DataMapper, Filter, Instance, MemoryDatabase, Model, QueryOptions, TemporaError, Temporal,
    TemporalOptions, hook, register,
};
use tempora_types::{
    AttributeDef, DataType, DefaultValue, HookPhase, ModelDefinition, ModelOptions, Row,
};

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn user_definition() -> ModelDefinition {
    ModelDefinition::new("User")
        .with_attribute(
            "id",
            AttributeDef::new(DataType::Integer).primary_key().auto_increment(),
        )
        .with_attribute("name", AttributeDef::new(DataType::Text).not_null())
        .with_attribute("email", AttributeDef::new(DataType::Text).unique())
        .with_attribute("team", AttributeDef::new(DataType::Text))
}

fn paranoid_user_definition() -> ModelDefinition {
    user_definition().with_options(ModelOptions {
        paranoid: true,
        ..ModelOptions::default()
    })
}

/// Define `User` and track it with `options`.
fn tracked(
    db: &MemoryDatabase,
    definition: ModelDefinition,
    options: TemporalOptions,
) -> (Temporal, Arc<dyn Model>) {
    let temporal = Temporal::new(options);
    let live = db.define(definition).unwrap();
    let live = temporal.register(live, db).unwrap();
    (temporal, live)
}

fn sink(db: &MemoryDatabase) -> Arc<dyn Model> {
    db.model("UserHistory").expect("history model registered")
}

async fn history(db: &MemoryDatabase) -> Vec<Instance> {
    sink(db)
        .find_all(Filter::all(), QueryOptions::new())
        .await
        .unwrap()
}

fn hids(rows: &[Instance]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get("hid").and_then(Value::as_i64).expect("hid"))
        .collect()
}

fn strictly_increasing(values: &[i64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

async fn create_user(live: &Arc<dyn Model>, name: &str, email: &str) -> Instance {
    live.create(
        row(json!({ "name": name, "email": email, "team": "red" })),
        QueryOptions::new(),
    )
    .await
    .unwrap()
}

fn fail_history_writes(db: &MemoryDatabase) {
    let sink = sink(db);
    for phase in [HookPhase::BeforeCreate, HookPhase::BeforeBulkCreate] {
        sink.add_hook(
            phase,
            hook(|_| async { Err(TemporaError::Storage("history store offline".to_owned())) }),
        );
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn diff_mode_records_pre_mutation_state() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());

    let user = create_user(&live, "Ada", "ada@example.com").await;
    assert!(history(&db).await.is_empty());

    let user = live
        .update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await
        .unwrap();
    let rows = history(&db).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("Ada")));
    assert_eq!(rows[0].get("email"), Some(&json!("ada@example.com")));
    assert_eq!(rows[0].get("id"), user.get("id"));
    assert_eq!(rows[0].get("createdAt"), user.get("createdAt"));
    assert!(rows[0].get("archivedAt").is_some_and(Value::is_string));

    live.destroy(user, QueryOptions::new()).await.unwrap();
    let rows = history(&db).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("name"), Some(&json!("Grace")));
    assert_eq!(live.count(Filter::all(), QueryOptions::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn full_mode_records_post_mutation_state() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new().with_full(true));

    let user = create_user(&live, "Ada", "ada@example.com").await;
    assert_eq!(history(&db).await.len(), 1);

    live.update(user, row(json!({ "email": "ada@lovelace.dev" })), QueryOptions::new())
        .await
        .unwrap();
    let rows = history(&db).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("email"), Some(&json!("ada@example.com")));
    assert_eq!(rows[1].get("email"), Some(&json!("ada@lovelace.dev")));
}

#[tokio::test]
async fn bulk_update_snapshots_every_matched_row() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());

    for (name, email) in [("Ada", "a@x"), ("Grace", "g@x"), ("Edsger", "e@x")] {
        create_user(&live, name, email).await;
    }
    live.create(
        row(json!({ "name": "Barbara", "email": "b@x", "team": "blue" })),
        QueryOptions::new(),
    )
    .await
    .unwrap();

    let affected = live
        .bulk_update(
            row(json!({ "name": "renamed" })),
            Filter::all().with("team", "red"),
            QueryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 3);

    let rows = history(&db).await;
    assert_eq!(rows.len(), 3);
    let names: Vec<&Value> = rows.iter().filter_map(|r| r.get("name")).collect();
    assert_eq!(names, vec![&json!("Ada"), &json!("Grace"), &json!("Edsger")]);
    assert!(strictly_increasing(&hids(&rows)));
}

#[tokio::test]
async fn history_model_rejects_direct_mutation() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    let user = create_user(&live, "Ada", "ada@example.com").await;
    live.update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await
        .unwrap();

    let sink = sink(&db);
    let recorded = history(&db).await;
    assert_eq!(recorded.len(), 1);
    let entry = recorded[0].clone();

    let update = sink
        .update(entry.clone(), row(json!({ "name": "forged" })), QueryOptions::new())
        .await;
    assert!(matches!(
        update,
        Err(TemporaError::ReadOnlyViolation { ref model, phase })
            if model == "UserHistory" && phase == HookPhase::BeforeUpdate
    ));

    let destroy = sink.destroy(entry, QueryOptions::new()).await;
    assert!(matches!(destroy, Err(TemporaError::ReadOnlyViolation { .. })));

    let bulk_update = sink
        .bulk_update(row(json!({ "name": "forged" })), Filter::all(), QueryOptions::new())
        .await;
    assert!(matches!(bulk_update, Err(TemporaError::ReadOnlyViolation { .. })));

    let bulk_destroy = sink.bulk_destroy(Filter::all(), QueryOptions::new()).await;
    assert!(matches!(bulk_destroy, Err(TemporaError::ReadOnlyViolation { .. })));

    let after = history(&db).await;
    assert_eq!(after, recorded);
}

// =========================================================================
// Properties
// =========================================================================

#[tokio::test]
async fn full_mode_writes_one_row_per_transition() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(
        &db,
        paranoid_user_definition(),
        TemporalOptions::new().with_full(true),
    );

    let user = create_user(&live, "Ada", "ada@example.com").await;
    let user = live
        .update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await
        .unwrap();
    let user = live.destroy(user, QueryOptions::new()).await.unwrap();
    live.restore(user, QueryOptions::new()).await.unwrap();

    let rows = history(&db).await;
    assert_eq!(rows.len(), 4);
    assert!(strictly_increasing(&hids(&rows)));
    assert_eq!(rows[1].get("name"), Some(&json!("Grace")));
    assert!(rows[2].get("deletedAt").is_some_and(Value::is_string));
    assert_eq!(rows[3].get("deletedAt"), Some(&Value::Null));
}

#[tokio::test]
async fn failed_diff_write_aborts_the_mutation() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    let user = create_user(&live, "Ada", "ada@example.com").await;
    fail_history_writes(&db);

    let update = live
        .update(user.clone(), row(json!({ "name": "Grace" })), QueryOptions::new())
        .await;
    let err = update.expect_err("history failure must abort the update");
    assert!(matches!(err, TemporaError::HistoryWrite { ref history, .. } if history == "UserHistory"));
    assert!(matches!(err.root_cause(), TemporaError::Storage(_)));

    let destroy = live.destroy(user, QueryOptions::new()).await;
    assert!(matches!(destroy, Err(TemporaError::HistoryWrite { .. })));

    let bulk = live
        .bulk_destroy(Filter::all(), QueryOptions::new())
        .await;
    assert!(matches!(bulk, Err(TemporaError::HistoryWrite { .. })));

    let stored = live.find_all(Filter::all(), QueryOptions::new()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("name"), Some(&json!("Ada")));
    assert!(history(&db).await.is_empty());
}

#[tokio::test]
async fn failed_full_write_surfaces_after_the_mutation() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new().with_full(true));
    let user = create_user(&live, "Ada", "ada@example.com").await;
    fail_history_writes(&db);

    let update = live
        .update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await;
    assert!(matches!(update, Err(TemporaError::HistoryWrite { .. })));

    let stored = live.find_all(Filter::all(), QueryOptions::new()).await.unwrap();
    assert_eq!(stored[0].get("name"), Some(&json!("Grace")));
    assert_eq!(history(&db).await.len(), 1);
}

#[tokio::test]
async fn bulk_handler_skips_individual_hooks() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    create_user(&live, "Ada", "a@x").await;
    create_user(&live, "Grace", "g@x").await;

    let affected = live
        .bulk_update(
            row(json!({ "team": "blue" })),
            Filter::all().with("team", "red"),
            QueryOptions::new().with_individual_hooks(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    // Only the per-row handler writes.
    let rows = history(&db).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("team") == Some(&json!("red"))));

    let destroyed = live
        .bulk_destroy(Filter::all(), QueryOptions::new().with_individual_hooks())
        .await
        .unwrap();
    assert_eq!(destroyed, 2);
    assert_eq!(history(&db).await.len(), 4);
}

#[tokio::test]
async fn bulk_mutation_matching_nothing_writes_nothing() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    create_user(&live, "Ada", "a@x").await;
    fail_history_writes(&db);

    let filter = Filter::all().with("team", "green");
    let updated = live
        .bulk_update(row(json!({ "name": "x" })), filter.clone(), QueryOptions::new())
        .await
        .unwrap();
    let destroyed = live.bulk_destroy(filter, QueryOptions::new()).await.unwrap();

    assert_eq!((updated, destroyed), (0, 0));
    assert!(history(&db).await.is_empty());
}

#[tokio::test]
async fn cleared_column_with_default_is_recorded_as_null() {
    let db = MemoryDatabase::new();
    let definition = user_definition().with_attribute(
        "role",
        AttributeDef::new(DataType::Text).with_default(DefaultValue::Literal(json!("member"))),
    );
    let (_, live) = tracked(&db, definition, TemporalOptions::new());

    let user = create_user(&live, "Ada", "ada@example.com").await;
    assert_eq!(user.get("role"), Some(&json!("member")));

    let user = live
        .update(user, row(json!({ "role": null })), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(user.get("role"), Some(&Value::Null));
    live.update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await
        .unwrap();

    let rows = history(&db).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("role"), Some(&json!("member")));
    assert_eq!(rows[1].get("role"), Some(&Value::Null));
    assert_eq!(rows[1].get("name"), Some(&json!("Ada")));
}

// =========================================================================
// Transactions, background writes, registration
// =========================================================================

#[tokio::test]
async fn rollback_discards_history_written_in_the_transaction() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    let user = create_user(&live, "Ada", "ada@example.com").await;

    let tx = db.begin().await.unwrap();
    let options = QueryOptions::new().in_transaction(&tx);
    let user = live
        .update(user, row(json!({ "name": "Grace" })), options.clone())
        .await
        .unwrap();
    live.bulk_update(row(json!({ "team": "blue" })), Filter::all(), options)
        .await
        .unwrap();
    assert_eq!(history(&db).await.len(), 2);

    db.rollback(tx).await.unwrap();
    assert!(history(&db).await.is_empty());
    let stored = live.find_all(Filter::all(), QueryOptions::new()).await.unwrap();
    assert_eq!(stored[0].get("name"), Some(&json!("Ada")));

    let tx = db.begin().await.unwrap();
    live.destroy(user, QueryOptions::new().in_transaction(&tx))
        .await
        .unwrap();
    db.commit(tx).await.unwrap();
    assert_eq!(history(&db).await.len(), 1);
}

#[tokio::test]
async fn non_blocking_writes_complete_in_background() {
    let db = MemoryDatabase::new();
    let (temporal, live) = tracked(
        &db,
        user_definition(),
        TemporalOptions::new().with_blocking(false).with_full(true),
    );

    for (name, email) in [("Ada", "a@x"), ("Grace", "g@x"), ("Edsger", "e@x")] {
        create_user(&live, name, email).await;
    }
    live.bulk_update(row(json!({ "team": "blue" })), Filter::all(), QueryOptions::new())
        .await
        .unwrap();

    temporal.supervisor().settle().await;
    assert_eq!(temporal.supervisor().in_flight(), 0);
    assert_eq!(temporal.supervisor().failed(), 0);
    assert_eq!(history(&db).await.len(), 6);
}

#[tokio::test]
async fn non_blocking_failures_never_reach_the_caller() {
    let db = MemoryDatabase::new();
    let (temporal, live) = tracked(
        &db,
        user_definition(),
        TemporalOptions::new().with_blocking(false),
    );
    let user = create_user(&live, "Ada", "ada@example.com").await;
    fail_history_writes(&db);

    live.update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await
        .unwrap();
    live.bulk_destroy(Filter::all(), QueryOptions::new())
        .await
        .unwrap();

    temporal.supervisor().settle().await;
    assert_eq!(temporal.supervisor().failed(), 2);
    assert!(history(&db).await.is_empty());
    assert_eq!(live.count(Filter::all(), QueryOptions::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn registering_twice_is_a_duplicate() {
    let db = MemoryDatabase::new();
    let live = db.define(user_definition()).unwrap();
    let live = register(live, &db, TemporalOptions::new()).unwrap();

    let again = register(live, &db, TemporalOptions::new());
    assert!(matches!(
        again,
        Err(TemporaError::DuplicateEntity { ref name }) if name == "UserHistory"
    ));
}

#[tokio::test]
async fn live_model_must_belong_to_the_mapper() {
    let home = MemoryDatabase::new();
    let elsewhere = MemoryDatabase::new();
    let live = home.define(user_definition()).unwrap();

    let foreign = register(Arc::clone(&live), &elsewhere, TemporalOptions::new());
    assert!(matches!(foreign, Err(TemporaError::UnknownModel(ref name)) if name == "User"));
    assert!(elsewhere.model_names().is_empty());

    register(live, &home, TemporalOptions::new()).unwrap();
    assert_eq!(
        home.model_names(),
        vec!["User".to_owned(), "UserHistory".to_owned()]
    );
}

#[tokio::test]
async fn other_hooks_keep_running_alongside_history() {
    let db = MemoryDatabase::new();
    let (_, live) = tracked(&db, user_definition(), TemporalOptions::new());
    live.add_hook(
        HookPhase::BeforeUpdate,
        hook(|_| async { Err(TemporaError::Storage("validation failed".to_owned())) }),
    );
    let user = create_user(&live, "Ada", "ada@example.com").await;

    let update = live
        .update(user, row(json!({ "name": "Grace" })), QueryOptions::new())
        .await;
    assert!(matches!(update, Err(TemporaError::Storage(_))));
    // The history handler ran first and its write is kept.
    assert_eq!(history(&db).await.len(), 1);
}

#[tokio::test]
async fn history_definition_is_derived_from_live_model() {
    let db = MemoryDatabase::new();
    tracked(&db, user_definition(), TemporalOptions::new());
    let definition = sink(&db).definition().clone();

    assert!(definition.attributes.values().filter(|a| a.primary_key).count() == 1);
    assert!(definition.attribute("hid").is_some_and(|a| a.primary_key && !a.allow_null));
    assert!(definition.attribute("name").is_some_and(|a| a.allow_null));
    assert!(definition.attribute("email").is_some_and(|a| !a.unique));
    assert!(!definition.options.timestamps);
}
