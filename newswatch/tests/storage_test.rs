use std::sync::Arc;

use common::{init_db_pool, run_migrations};
use newswatch::model::{EventType, ItemExtras, NormalizeFailure, NormalizedItem, RawItem, Sentiment, Source};
use newswatch::storage::{persist, PersistOutcome, RecordStore, SqliteRecordStore};
use tempfile::TempDir;

async fn setup_store() -> (TempDir, Arc<SqliteRecordStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("news.sqlite");
    let pool = init_db_pool(db_path.to_str().expect("utf-8 path")).await.expect("init pool");
    run_migrations(&pool).await.expect("migrations");
    (dir, Arc::new(SqliteRecordStore::new(pool)))
}

fn normalized(company: &str, url: &str) -> NormalizedItem {
    NormalizedItem::processed(
        RawItem {
            source: Source::Forum,
            company: company.to_string(),
            title: "Earnings beat expectations".to_string(),
            text: "The company reported record quarterly revenue.".to_string(),
            url: url.to_string(),
            published_at: None,
            extras: ItemExtras {
                author: Some("analyst42".to_string()),
                score: Some(311),
                views: None,
                community: Some("stocks".to_string()),
            },
        },
        "Компания отчиталась о рекордной выручке.".to_string(),
        EventType::News,
        Sentiment::Positive,
    )
}

#[tokio::test]
async fn concurrent_persists_of_one_url_store_exactly_one_record() {
    let (_dir, store) = setup_store().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        // same canonical URL, different tracking noise
        let url = format!("https://news.example.com/tesla/q3?utm_source=feed{}#top", i);
        handles.push(tokio::spawn(async move {
            persist(store.as_ref(), &normalized("Tesla", &url)).await
        }));
    }

    let mut stored = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.expect("join").expect("persist") {
            PersistOutcome::Stored(record) => {
                stored += 1;
                assert_eq!(record.url, "https://news.example.com/tesla/q3");
            }
            PersistOutcome::Duplicate(url) => {
                duplicates += 1;
                assert_eq!(url, "https://news.example.com/tesla/q3");
            }
        }
    }

    assert_eq!(stored, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn stored_record_round_trips_fields() {
    let (_dir, store) = setup_store().await;

    let outcome = persist(store.as_ref(), &normalized("Tesla", "https://news.example.com/a"))
        .await
        .unwrap();
    let PersistOutcome::Stored(record) = outcome else {
        panic!("expected a stored record");
    };

    let loaded = store
        .find_by_url("https://news.example.com/a")
        .await
        .unwrap()
        .expect("record present");
    assert_eq!(loaded, record);
    assert_eq!(loaded.source, Source::Forum);
    assert_eq!(loaded.event_type, EventType::News);
    assert_eq!(loaded.sentiment, Sentiment::Positive);
    assert_eq!(loaded.extras.score, Some(311));
    assert_eq!(loaded.extras.community.as_deref(), Some("stocks"));
    assert!(loaded.processed);
    assert!(loaded.failure_reason.is_none());
}

#[tokio::test]
async fn degraded_items_are_persisted_with_reason() {
    let (_dir, store) = setup_store().await;

    let item = NormalizedItem::degraded(
        normalized("Apple", "https://news.example.com/empty").item,
        NormalizeFailure::EmptyText,
    );
    let PersistOutcome::Stored(record) = persist(store.as_ref(), &item).await.unwrap() else {
        panic!("expected a stored record");
    };

    assert!(!record.processed);
    assert_eq!(record.failure_reason.as_deref(), Some("empty_text"));
    assert_eq!(record.event_type, EventType::Unknown);
}

#[tokio::test]
async fn recent_filters_by_company_newest_first() {
    let (_dir, store) = setup_store().await;

    for (company, url) in [
        ("Tesla", "https://news.example.com/1"),
        ("Apple", "https://news.example.com/2"),
        ("Tesla", "https://news.example.com/3"),
    ] {
        persist(store.as_ref(), &normalized(company, url)).await.unwrap();
    }

    let tesla = store.recent(Some("tesla"), 10).await.unwrap();
    let urls: Vec<&str> = tesla.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["https://news.example.com/3", "https://news.example.com/1"]);

    assert_eq!(store.recent(None, 2).await.unwrap().len(), 2);
    assert_eq!(store.count().await.unwrap(), 3);
}
