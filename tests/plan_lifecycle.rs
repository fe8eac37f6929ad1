// SPDX-License-Identifier: MIT

use chrono::{Duration as ChronoDuration, Utc};
use dca_engine::infrastructure::data::db::Database;
use dca_engine::infrastructure::data::schema::{
    ExecutionStatus, NewExecution, NewPlan, PlanStatus,
};

async fn memory_db() -> Database {
    Database::new("sqlite::memory:").await.expect("db")
}

fn plan(interval_minutes: u32, duration_weeks: u32) -> NewPlan {
    NewPlan {
        user_address: "0x1111111111111111111111111111111111111111".into(),
        from_token: "USDC".into(),
        to_token: "WETH".into(),
        amount: "100".into(),
        interval_minutes,
        duration_weeks,
        slippage: "2".into(),
    }
}

#[tokio::test]
async fn due_plans_come_back_soonest_first() {
    let db = memory_db().await;
    let slow = db.insert_plan(&plan(10_080, 4)).await.unwrap();
    let fast = db.insert_plan(&plan(60, 1)).await.unwrap();

    let far_future = Utc::now().naive_utc() + ChronoDuration::weeks(2);
    let due = db.due_plans(far_future).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].id, fast.id);
    assert_eq!(due[1].id, slow.id);
}

#[tokio::test]
async fn a_plan_runs_to_completion_and_is_never_selected_again() {
    let db = memory_db().await;
    let mut current = db.insert_plan(&plan(10_080, 4)).await.unwrap();
    assert_eq!(current.total_executions, 4);

    for expected_count in 1..=4i64 {
        let now = Utc::now().naive_utc();
        assert!(db.claim_plan(&current.id, now, 900).await.unwrap());
        current = db.advance_plan_after_success(&current, now).await.unwrap();
        assert_eq!(current.execution_count, expected_count);
        assert!(current.execution_count <= current.total_executions);
    }

    assert_eq!(current.status, PlanStatus::Completed);
    assert!(current.next_execution_at.is_none());

    let far_future = Utc::now().naive_utc() + ChronoDuration::weeks(100);
    assert!(db.due_plans(far_future).await.unwrap().is_empty());
}

#[tokio::test]
async fn next_execution_is_deterministic_from_interval_and_timestamp() {
    // A restart between executions must not change the derived schedule:
    // next is always the stored interval past the advance timestamp.
    let db = memory_db().await;
    let created = db.insert_plan(&plan(120, 1)).await.unwrap();

    let now = Utc::now().naive_utc();
    let advanced = db.advance_plan_after_success(&created, now).await.unwrap();
    let expected = now + ChronoDuration::minutes(120);
    assert_eq!(advanced.next_execution_at, Some(expected));

    let reread = db.plan(&created.id).await.unwrap().unwrap();
    assert_eq!(reread.next_execution_at, Some(expected));
}

#[tokio::test]
async fn pause_between_selection_and_claim_skips_execution() {
    let db = memory_db().await;
    let created = db.insert_plan(&plan(10_080, 4)).await.unwrap();

    // Selected...
    let far_future = Utc::now().naive_utc() + ChronoDuration::weeks(2);
    let due = db.due_plans(far_future).await.unwrap();
    assert_eq!(due.len(), 1);

    // ...then another writer pauses it before the claim.
    db.set_plan_status(&created.id, PlanStatus::Paused)
        .await
        .unwrap();
    let claimed = db
        .claim_plan(&created.id, Utc::now().naive_utc(), 900)
        .await
        .unwrap();
    assert!(!claimed);

    // Nothing ran: no execution rows, schedule untouched.
    assert!(db.latest_execution(&created.id).await.unwrap().is_none());
    let reread = db.plan(&created.id).await.unwrap().unwrap();
    assert_eq!(reread.next_execution_at, created.next_execution_at);
}

#[tokio::test]
async fn concurrent_schedulers_cannot_double_claim() {
    let db = memory_db().await;
    let created = db.insert_plan(&plan(10_080, 4)).await.unwrap();
    let now = Utc::now().naive_utc();

    let first = db.claim_plan(&created.id, now, 900).await.unwrap();
    let second = db.claim_plan(&created.id, now, 900).await.unwrap();
    assert!(first);
    assert!(!second);

    // An expired lease is claimable again.
    let after_expiry = now + ChronoDuration::seconds(901);
    assert!(db.claim_plan(&created.id, after_expiry, 900).await.unwrap());
}

#[tokio::test]
async fn history_keeps_failures_and_successes_apart() {
    let db = memory_db().await;
    let created = db.insert_plan(&plan(10_080, 4)).await.unwrap();

    db.record_execution(
        NewExecution {
            plan_id: Some(created.id.clone()),
            from_amount: "100".into(),
            to_amount: "0".into(),
            exchange_rate: "0".into(),
            error_message: Some(
                "Insufficient user approval: required 100000000, approved 50".into(),
            ),
            ..Default::default()
        },
        ExecutionStatus::Failed,
    )
    .await
    .unwrap();

    db.record_execution(
        NewExecution {
            plan_id: Some(created.id.clone()),
            from_amount: "100".into(),
            to_amount: "0.03".into(),
            exchange_rate: "3333.33".into(),
            gas_fee: Some("0.001".into()),
            tx_hash: Some("0xabc".into()),
            ..Default::default()
        },
        ExecutionStatus::Success,
    )
    .await
    .unwrap();

    let latest = db.latest_execution(&created.id).await.unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Success);
    assert_eq!(latest.tx_hash.as_deref(), Some("0xabc"));
    assert_eq!(latest.gas_fee.as_deref(), Some("0.001"));

    // The failed attempt stays in history with its message and no hash.
    // (The plan itself was never advanced by it.)
    let plan_row = db.plan(&created.id).await.unwrap().unwrap();
    assert_eq!(plan_row.execution_count, 0);
}

#[tokio::test]
async fn migrations_run_against_a_file_backed_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}/dca.db?mode=rwc", dir.path().display());
    let db = Database::new(&url).await.expect("file db");

    let created = db.insert_plan(&plan(10_080, 4)).await.unwrap();

    // Reopen: state survives the restart.
    drop(db);
    let db = Database::new(&url).await.expect("reopen");
    let reread = db.plan(&created.id).await.unwrap().unwrap();
    assert_eq!(reread.total_executions, 4);
}
