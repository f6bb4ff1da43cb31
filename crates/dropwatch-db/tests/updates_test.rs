//! Postgres-backed tests for the update repository.
//!
//! Skipped unless `RUN_DATABASE_TESTS=1`. Each test uses unique source links,
//! so the suite can run repeatedly against the same database.

use dropwatch_db::test_fixtures::{database_tests_enabled, sample_update, test_database_url};
use dropwatch_db::{
    Database, SaveOutcome, SimilaritySearch, UpdateRepository, Vector, UPDATES_TABLE,
};
use uuid::Uuid;

async fn setup_test_db() -> Option<Database> {
    let _ = dotenvy::dotenv();
    if !database_tests_enabled() {
        eprintln!("Skipping: set RUN_DATABASE_TESTS=1 to run database tests");
        return None;
    }
    let db = Database::connect(&test_database_url())
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to run migrations");
    Some(db)
}

fn unique_link() -> String {
    format!("https://t.me/c/999/{}", Uuid::new_v4().simple())
}

/// Unit vector along `axis` in 768 dimensions.
fn axis_vector(axis: usize) -> Vector {
    let mut v = vec![0.0f32; 768];
    v[axis % 768] = 1.0;
    Vector::from(v)
}

#[tokio::test]
async fn test_save_twice_reports_already_exists() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let link = unique_link();
    let update = sample_update(&link, "");

    let first = db.updates.save(&update).await.unwrap();
    assert!(matches!(first, SaveOutcome::Saved(_)));

    let second = db.updates.save(&update).await.unwrap();
    assert_eq!(second, SaveOutcome::AlreadyExists);

    assert_eq!(db.updates.count_for_link(&link).await.unwrap(), 1);
}

#[tokio::test]
async fn test_distinct_update_keys_share_a_link() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let link = unique_link();

    let a = db.updates.save(&sample_update(&link, "alpha|testnet")).await.unwrap();
    let b = db.updates.save(&sample_update(&link, "beta|airdrop")).await.unwrap();

    assert!(matches!(a, SaveOutcome::Saved(_)));
    assert!(matches!(b, SaveOutcome::Saved(_)));
    assert_eq!(db.updates.count_for_link(&link).await.unwrap(), 2);
}

#[tokio::test]
async fn test_find_similar_returns_saved_row() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let link = unique_link();
    let mut update = sample_update(&link, "");
    update.embedding = Some(axis_vector(17));

    let id = match db.updates.save(&update).await.unwrap() {
        SaveOutcome::Saved(id) => id,
        other => panic!("expected Saved, got {:?}", other),
    };

    let matches = db
        .updates
        .find_similar(&axis_vector(17), 0.99, 50, None)
        .await
        .unwrap();
    let hit = matches
        .iter()
        .find(|m| m.id == id)
        .expect("saved row should match its own vector");
    assert!((hit.similarity - 1.0).abs() < 1e-4);

    let excluded = db
        .updates
        .find_similar(&axis_vector(17), 0.99, 50, Some(id))
        .await
        .unwrap();
    assert!(excluded.iter().all(|m| m.id != id));
}

#[tokio::test]
async fn test_find_similar_respects_threshold() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let link = unique_link();
    let mut update = sample_update(&link, "");
    update.embedding = Some(axis_vector(301));
    let id = match db.updates.save(&update).await.unwrap() {
        SaveOutcome::Saved(id) => id,
        other => panic!("expected Saved, got {:?}", other),
    };

    // Orthogonal query: similarity 0.0
    let matches = db
        .updates
        .find_similar(&axis_vector(302), 0.5, 50, None)
        .await
        .unwrap();
    assert!(matches.iter().all(|m| m.id != id));
}

#[tokio::test]
async fn test_backfill_listing_and_set_embedding() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let project = format!("Backfill-{}", Uuid::new_v4().simple());
    let mut update = sample_update(&unique_link(), "");
    update.project_name = Some(project.clone());
    let id = match db.updates.save(&update).await.unwrap() {
        SaveOutcome::Saved(id) => id,
        other => panic!("expected Saved, got {:?}", other),
    };

    let missing = db
        .updates
        .list_missing_embeddings(Some(&project), None, 10)
        .await
        .unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, id);
    assert!(missing[0].embedding.is_none());

    // Keyset paging past the only row yields an empty page
    let after = db
        .updates
        .list_missing_embeddings(Some(&project), Some(id), 10)
        .await
        .unwrap();
    assert!(after.is_empty());

    db.updates.set_embedding(id, &axis_vector(5)).await.unwrap();
    let missing = db
        .updates
        .list_missing_embeddings(Some(&project), None, 10)
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_set_embedding_unknown_id_is_not_found() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let err = db
        .updates
        .set_embedding(Uuid::new_v4(), &axis_vector(1))
        .await
        .unwrap_err();
    assert!(matches!(err, dropwatch_db::Error::NotFound(_)));
}

#[tokio::test]
async fn test_table_constant_matches_schema() {
    let Some(db) = setup_test_db().await else {
        return;
    };
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
    )
    .bind(UPDATES_TABLE)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert!(exists);
}
