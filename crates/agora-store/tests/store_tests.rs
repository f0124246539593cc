//! Repository tests against the in-memory SQLite store.

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use agora_core::{
    DebateSettings, DebateStatus, Operation, PersonalityResponse, UsageRecord,
};
use agora_store::{DebateDraft, DebateRepository, SqliteStore, UsageStore};

fn draft(user: &str, question: &str) -> DebateDraft {
    DebateDraft {
        user_id: user.into(),
        question: question.into(),
        provider: "mock".into(),
        model: "echo".into(),
        settings: DebateSettings::default(),
    }
}

fn response(personality: &str, answer: &str) -> PersonalityResponse {
    PersonalityResponse {
        personality: personality.into(),
        thinking: None,
        answer: answer.into(),
        input_tokens: 10,
        output_tokens: 5,
        cost: dec!(0.001),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_create_and_get_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let created = store.create_debate(draft("u1", "What is 2+2?")).await.unwrap();

    assert_eq!(created.status, DebateStatus::Pending);
    assert_eq!(created.current_round, 0);

    let loaded = store.get_by_id(created.id, true, true).await.unwrap();
    assert_eq!(loaded.question, "What is 2+2?");
    assert_eq!(loaded.user_id, "u1");
    assert_eq!(loaded.settings.max_rounds, 3);
    assert!(loaded.rounds.is_empty());
    assert!(loaded.synthesis.is_none());
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.get_by_id(Uuid::new_v4(), false, false).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_status_transition_timestamps() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();

    store
        .update_status(debate.id, DebateStatus::Active, None, None)
        .await
        .unwrap();
    let active = store.get_by_id(debate.id, false, false).await.unwrap();
    assert!(active.started_at.is_some());
    assert!(active.completed_at.is_none());
    let first_started = active.started_at;

    // started_at only set on the FIRST transition to active.
    store
        .update_status(debate.id, DebateStatus::Active, Some(1), None)
        .await
        .unwrap();
    let again = store.get_by_id(debate.id, false, false).await.unwrap();
    assert_eq!(again.started_at, first_started);
    assert_eq!(again.current_round, 1);

    store
        .update_status(debate.id, DebateStatus::Completed, Some(2), None)
        .await
        .unwrap();
    let done = store.get_by_id(debate.id, false, false).await.unwrap();
    assert!(done.completed_at.is_some());
    assert_eq!(done.status, DebateStatus::Completed);
    assert_eq!(done.current_round, 2);
}

#[tokio::test]
async fn test_rounds_and_responses_ordered() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();

    let round1 = store.save_round(debate.id, 1).await.unwrap();
    store.save_response(round1, &response("optimist", "yes")).await.unwrap();
    store.save_response(round1, &response("pessimist", "no")).await.unwrap();

    let round2 = store.save_round(debate.id, 2).await.unwrap();
    store.save_response(round2, &response("optimist", "still yes")).await.unwrap();

    let loaded = store.get_by_id(debate.id, true, false).await.unwrap();
    assert_eq!(loaded.rounds.len(), 2);
    assert_eq!(loaded.rounds[0].round_number, 1);
    assert_eq!(loaded.rounds[1].round_number, 2);
    // Response order is insertion (declared personality) order.
    let names: Vec<&str> = loaded.rounds[0]
        .responses
        .iter()
        .map(|r| r.personality.as_str())
        .collect();
    assert_eq!(names, vec!["optimist", "pessimist"]);
    assert_eq!(loaded.rounds[0].responses[0].cost, dec!(0.001));
}

#[tokio::test]
async fn test_duplicate_round_number_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();
    store.save_round(debate.id, 1).await.unwrap();
    assert!(store.save_round(debate.id, 1).await.is_err());
}

#[tokio::test]
async fn test_synthesis_unique_per_debate() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();

    store
        .save_synthesis(debate.id, "final view", 100, 50, dec!(0.01))
        .await
        .unwrap();
    let loaded = store.get_by_id(debate.id, false, true).await.unwrap();
    let synthesis = loaded.synthesis.unwrap();
    assert_eq!(synthesis.content, "final view");
    assert_eq!(synthesis.input_tokens, 100);

    // At most one synthesis per debate.
    assert!(store
        .save_synthesis(debate.id, "second", 1, 1, dec!(0))
        .await
        .is_err());
}

#[tokio::test]
async fn test_totals_update() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();

    store
        .update_totals(debate.id, 120, 400, dec!(0.0456))
        .await
        .unwrap();
    let loaded = store.get_by_id(debate.id, false, false).await.unwrap();
    assert_eq!(loaded.total_input_tokens, 120);
    assert_eq!(loaded.total_output_tokens, 400);
    assert_eq!(loaded.total_cost, dec!(0.0456));
}

#[tokio::test]
async fn test_delete_cascades_but_usage_survives() {
    let store = SqliteStore::open_in_memory().unwrap();
    let debate = store.create_debate(draft("u1", "q")).await.unwrap();
    let round = store.save_round(debate.id, 1).await.unwrap();
    store.save_response(round, &response("optimist", "yes")).await.unwrap();
    store
        .save_synthesis(debate.id, "done", 1, 1, dec!(0))
        .await
        .unwrap();

    let record = UsageRecord {
        id: Uuid::new_v4(),
        user_id: "u1".into(),
        debate_id: Some(debate.id),
        provider: "mock".into(),
        model: "echo".into(),
        input_tokens: 10,
        output_tokens: 5,
        cached_tokens: 0,
        total_tokens: 15,
        cost: dec!(0.001),
        operation: Operation::DebateResponse,
        personality: Some("optimist".into()),
        round_number: Some(1),
        estimated: false,
        created_at: Utc::now(),
    };
    store.append(&record).await.unwrap();

    store.delete(debate.id).await.unwrap();
    assert!(store.get_by_id(debate.id, false, false).await.is_err());

    // Usage records are independently owned and outlive deletion.
    let records = store.for_range("u1", None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].debate_id, Some(debate.id));

    // Deleting again is NotFound.
    assert!(store.delete(debate.id).await.is_err());
}

#[tokio::test]
async fn test_pagination_covers_all_in_descending_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    for i in 0..7 {
        store
            .create_debate(draft("u1", &format!("question {i}")))
            .await
            .unwrap();
        // Distinct created_at values so ordering is total.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    // Another user's debates never leak in.
    store.create_debate(draft("u2", "other")).await.unwrap();

    let mut seen = Vec::new();
    let mut page = 1;
    loop {
        let result = store.list_by_user("u1", page, 3, None).await.unwrap();
        assert_eq!(result.total, 7);
        seen.extend(result.debates.iter().map(|d| d.created_at));
        if !result.has_more {
            break;
        }
        page += 1;
    }
    assert_eq!(seen.len(), 7);
    // Strictly descending created_at across page boundaries.
    for pair in seen.windows(2) {
        assert!(pair[0] > pair[1]);
    }
}

#[tokio::test]
async fn test_list_status_filter() {
    let store = SqliteStore::open_in_memory().unwrap();
    let a = store.create_debate(draft("u1", "a")).await.unwrap();
    let _b = store.create_debate(draft("u1", "b")).await.unwrap();
    store
        .update_status(a.id, DebateStatus::Completed, None, None)
        .await
        .unwrap();

    let completed = store
        .list_by_user("u1", 1, 10, Some(DebateStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.total, 1);
    assert_eq!(completed.debates[0].id, a.id);

    let pending = store
        .list_by_user("u1", 1, 10, Some(DebateStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
}

#[tokio::test]
async fn test_usage_list_most_recent_first_with_offset() {
    let store = SqliteStore::open_in_memory().unwrap();
    for i in 0..5u64 {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            debate_id: None,
            provider: "mock".into(),
            model: "echo".into(),
            input_tokens: i,
            output_tokens: 0,
            cached_tokens: 0,
            total_tokens: i,
            cost: dec!(0),
            operation: Operation::DebateResponse,
            personality: None,
            round_number: None,
            estimated: false,
            created_at: Utc::now(),
        };
        store.append(&record).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let first_two = store.list("u1", 2, 0, None).await.unwrap();
    assert_eq!(first_two.len(), 2);
    assert_eq!(first_two[0].input_tokens, 4);
    assert_eq!(first_two[1].input_tokens, 3);

    let next_two = store.list("u1", 2, 2, None).await.unwrap();
    assert_eq!(next_two[0].input_tokens, 2);
}
