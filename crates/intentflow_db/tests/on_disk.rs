use chrono::{Duration, Utc};
use intentflow_db::{IntentDb, NewIntent};
use intentflow_ids::{Channel, CorrelationKey, UserId};
use intentflow_intent::IntentStatus;
use tempfile::TempDir;

fn new_intent(key: &str, text: &str, offset_ms: i64) -> NewIntent {
    NewIntent {
        user_id: UserId::parse("15550001").unwrap(),
        channel: Channel::parse("whatsapp").unwrap(),
        correlation_key: CorrelationKey::parse(key).unwrap(),
        raw_text: text.to_string(),
        received_at: Utc::now() + Duration::milliseconds(offset_ms),
    }
}

#[tokio::test]
async fn test_staged_intents_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("intents.sqlite3");

    let id = {
        let db = IntentDb::open(&path).await.unwrap();
        let (intent, created) = db
            .insert_or_get(&new_intent("WHATSAPP:15550001:1:deadbeef", "spent 50", 0))
            .await
            .unwrap();
        assert!(created);
        db.close().await;
        intent.id
    };

    let db = IntentDb::open(&path).await.unwrap();
    let intent = db.get_intent(id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Received);
    assert_eq!(intent.channel.as_str(), "WHATSAPP");
    assert_eq!(intent.raw_text(), "spent 50");

    let received = db.list_by_status(IntentStatus::Received).await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_inserts_yield_one_row() {
    let tmp = TempDir::new().unwrap();
    let db = IntentDb::open(tmp.path().join("intents.sqlite3")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.insert_or_get(&new_intent("same-key", "spent 50", 0))
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let (intent, was_created) = handle.await.unwrap();
        if was_created {
            created += 1;
        }
        ids.push(intent.id);
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_intent_inbox")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
