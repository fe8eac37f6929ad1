// SPDX-License-Identifier: MIT

use crate::common::units;
use crate::domain::error::EngineError;
use crate::infrastructure::data::schema::{
    ExecutionRecord, ExecutionStatus, NewExecution, NewPlan, Plan, PlanStatus, VaultHolding,
    total_executions,
};
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, sqlite::SqlitePoolOptions};
use uuid::Uuid;

/// Single source of truth for plans, executions and vault holdings.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, EngineError> {
        // In-memory SQLite gives every pooled connection its own database;
        // a single connection keeps migrations and queries on one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Database(format!("DB connect failed: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::Database(format!("DB migration failed: {e}")))?;

        Ok(Self { pool })
    }

    // -- plans ------------------------------------------------------------

    /// Insert a plan in ACTIVE state with the first execution one interval
    /// out. The CRUD surface and tests are the writers here.
    pub async fn insert_plan(&self, new: &NewPlan) -> Result<Plan, EngineError> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let total = total_executions(new.duration_weeks, new.interval_minutes);
        let next = now + ChronoDuration::minutes(new.interval_minutes as i64);

        sqlx::query(
            r#"
            INSERT INTO plans
                (id, user_address, from_token, to_token, amount, interval_minutes,
                 duration_weeks, slippage, status, execution_count, total_executions,
                 next_execution_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.user_address)
        .bind(new.from_token.to_uppercase())
        .bind(new.to_token.to_uppercase())
        .bind(&new.amount)
        .bind(new.interval_minutes as i64)
        .bind(new.duration_weeks as i64)
        .bind(&new.slippage)
        .bind(total as i64)
        .bind(next)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.plan(&id)
            .await?
            .ok_or_else(|| EngineError::Database(format!("plan {id} vanished after insert")))
    }

    pub async fn plan(&self, id: &str) -> Result<Option<Plan>, EngineError> {
        let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    /// ACTIVE plans whose `next_execution_at` is at or before `now`,
    /// soonest first.
    pub async fn due_plans(&self, now: NaiveDateTime) -> Result<Vec<Plan>, EngineError> {
        let plans = sqlx::query_as::<_, Plan>(
            r#"
            SELECT * FROM plans
            WHERE status = 'ACTIVE'
              AND next_execution_at IS NOT NULL
              AND next_execution_at <= ?
            ORDER BY next_execution_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    /// Atomically lease a plan for execution. Returns false when the plan
    /// is no longer ACTIVE or another scheduler holds a live lease.
    pub async fn claim_plan(
        &self,
        id: &str,
        now: NaiveDateTime,
        lease_seconds: i64,
    ) -> Result<bool, EngineError> {
        let until = now + ChronoDuration::seconds(lease_seconds);
        let result = sqlx::query(
            r#"
            UPDATE plans
            SET leased_until = ?
            WHERE id = ?
              AND status = 'ACTIVE'
              AND (leased_until IS NULL OR leased_until < ?)
            "#,
        )
        .bind(until)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(&self, id: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE plans SET leased_until = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Advance a plan after a successful pipeline run: bump the count,
    /// transition to COMPLETED on the final execution, otherwise push
    /// `next_execution_at` one interval past `now`. Row-scoped and guarded
    /// on ACTIVE so external pauses are never overwritten.
    pub async fn advance_plan_after_success(
        &self,
        plan: &Plan,
        now: NaiveDateTime,
    ) -> Result<Plan, EngineError> {
        let completing = plan.is_final_execution();
        let next = if completing {
            None
        } else {
            Some(now + ChronoDuration::minutes(plan.interval_minutes))
        };
        let status = if completing {
            PlanStatus::Completed
        } else {
            PlanStatus::Active
        };

        let result = sqlx::query(
            r#"
            UPDATE plans
            SET execution_count = execution_count + 1,
                status = ?,
                next_execution_at = ?,
                leased_until = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'ACTIVE'
            "#,
        )
        .bind(status)
        .bind(next)
        .bind(now)
        .bind(&plan.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(EngineError::Database(format!(
                "plan {} was not ACTIVE during advance",
                plan.id
            )));
        }

        self.plan(&plan.id)
            .await?
            .ok_or_else(|| EngineError::Database(format!("plan {} vanished after advance", plan.id)))
    }

    /// External-writer surface (pause/resume/cancel); the scheduler itself
    /// never calls this.
    pub async fn set_plan_status(&self, id: &str, status: PlanStatus) -> Result<(), EngineError> {
        sqlx::query("UPDATE plans SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().naive_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_active_plans(&self) -> Result<u64, EngineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans WHERE status = 'ACTIVE'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    // -- executions -------------------------------------------------------

    pub async fn record_execution(
        &self,
        new: NewExecution,
        status: ExecutionStatus,
    ) -> Result<ExecutionRecord, EngineError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, plan_id, executed_at, from_amount, to_amount, exchange_rate,
                 gas_fee, tx_hash, status, error_message, vault_address,
                 share_tokens, deposit_tx_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.plan_id)
        .bind(now)
        .bind(&new.from_amount)
        .bind(&new.to_amount)
        .bind(&new.exchange_rate)
        .bind(&new.gas_fee)
        .bind(&new.tx_hash)
        .bind(status)
        .bind(&new.error_message)
        .bind(&new.vault_address)
        .bind(&new.share_tokens)
        .bind(&new.deposit_tx_hash)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, ExecutionRecord>("SELECT * FROM executions WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn latest_execution(
        &self,
        plan_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        let record = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM executions WHERE plan_id = ? ORDER BY executed_at DESC LIMIT 1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    // -- vault holdings ---------------------------------------------------

    pub async fn vault_holding(
        &self,
        user_address: &str,
        vault_address: &str,
    ) -> Result<Option<VaultHolding>, EngineError> {
        let holding = sqlx::query_as::<_, VaultHolding>(
            "SELECT * FROM user_vault_holdings WHERE user_address = ? AND vault_address = ?",
        )
        .bind(user_address)
        .bind(vault_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(holding)
    }

    /// Add `added_shares` (decimal string at the vault's share decimals)
    /// to the holding, creating it when absent. Exact big-integer
    /// arithmetic; no floats touch the stored balance.
    pub async fn add_vault_shares(
        &self,
        user_address: &str,
        vault_address: &str,
        token_symbol: &str,
        added_shares: &str,
        share_decimals: u8,
    ) -> Result<VaultHolding, EngineError> {
        let now = Utc::now().naive_utc();
        match self.vault_holding(user_address, vault_address).await? {
            Some(existing) => {
                let total =
                    units::add_decimal_strings(&existing.share_tokens, added_shares, share_decimals)?;
                sqlx::query(
                    "UPDATE user_vault_holdings SET share_tokens = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&total)
                .bind(now)
                .bind(&existing.id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                // Same rendering as the update path: "99" stores as "99.0".
                let normalized = units::add_decimal_strings("0", added_shares, share_decimals)?;
                sqlx::query(
                    r#"
                    INSERT INTO user_vault_holdings
                        (id, user_address, vault_address, share_tokens, token_symbol,
                         created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(user_address)
                .bind(vault_address)
                .bind(&normalized)
                .bind(token_symbol)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }

        self.vault_holding(user_address, vault_address)
            .await?
            .ok_or_else(|| EngineError::Database("holding vanished after upsert".into()))
    }

    /// Removed only on full withdrawal.
    pub async fn remove_vault_holding(
        &self,
        user_address: &str,
        vault_address: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM user_vault_holdings WHERE user_address = ? AND vault_address = ?")
            .bind(user_address)
            .bind(vault_address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.expect("db")
    }

    fn weekly_plan() -> NewPlan {
        NewPlan {
            user_address: "0x1111111111111111111111111111111111111111".into(),
            from_token: "usdc".into(),
            to_token: "weth".into(),
            amount: "100".into(),
            interval_minutes: 10_080,
            duration_weeks: 4,
            slippage: "2".into(),
        }
    }

    #[tokio::test]
    async fn insert_uppercases_symbols_and_derives_totals() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();
        assert_eq!(plan.from_token, "USDC");
        assert_eq!(plan.to_token, "WETH");
        assert_eq!(plan.total_executions, 4);
        assert_eq!(plan.execution_count, 0);
        assert_eq!(plan.status, PlanStatus::Active);
        assert!(plan.next_execution_at.is_some());
    }

    #[tokio::test]
    async fn invalid_plans_are_rejected() {
        let db = memory_db().await;
        let mut bad = weekly_plan();
        bad.interval_minutes = 1;
        assert!(db.insert_plan(&bad).await.is_err());

        let mut bad = weekly_plan();
        bad.user_address = "not-an-address".into();
        assert!(db.insert_plan(&bad).await.is_err());

        let mut bad = weekly_plan();
        bad.amount = "-5".into();
        assert!(db.insert_plan(&bad).await.is_err());

        // One week of a 30-day interval floors total_executions to zero.
        let mut bad = weekly_plan();
        bad.interval_minutes = 43_200;
        bad.duration_weeks = 1;
        assert!(db.insert_plan(&bad).await.is_err());
    }

    #[tokio::test]
    async fn due_selection_includes_exact_boundary() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();
        let due_at = plan.next_execution_at.unwrap();

        // One microsecond early: not selected.
        let early = due_at - ChronoDuration::microseconds(1);
        assert!(db.due_plans(early).await.unwrap().is_empty());

        // Exactly at the boundary: selected.
        let at = db.due_plans(due_at).await.unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].id, plan.id);
    }

    #[tokio::test]
    async fn paused_plans_are_never_due() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();
        db.set_plan_status(&plan.id, PlanStatus::Paused).await.unwrap();

        let far_future = Utc::now().naive_utc() + ChronoDuration::weeks(10);
        assert!(db.due_plans(far_future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_respects_status() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();
        let now = Utc::now().naive_utc();

        assert!(db.claim_plan(&plan.id, now, 300).await.unwrap());
        // Second claim while the lease is live fails.
        assert!(!db.claim_plan(&plan.id, now, 300).await.unwrap());

        db.release_lease(&plan.id).await.unwrap();
        // Pause between selection and claim: claim fails.
        db.set_plan_status(&plan.id, PlanStatus::Paused).await.unwrap();
        assert!(!db.claim_plan(&plan.id, now, 300).await.unwrap());
    }

    #[tokio::test]
    async fn advance_increments_and_pushes_next() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();
        let prev_next = plan.next_execution_at.unwrap();

        let now = Utc::now().naive_utc();
        let advanced = db.advance_plan_after_success(&plan, now).await.unwrap();
        assert_eq!(advanced.execution_count, 1);
        assert_eq!(advanced.status, PlanStatus::Active);
        let new_next = advanced.next_execution_at.unwrap();
        assert_eq!(new_next, now + ChronoDuration::minutes(10_080));
        assert!(new_next >= prev_next);
        assert!(advanced.leased_until.is_none());
    }

    #[tokio::test]
    async fn final_advance_completes_plan() {
        let db = memory_db().await;
        let mut plan = db.insert_plan(&weekly_plan()).await.unwrap();
        let now = Utc::now().naive_utc();

        for _ in 0..4 {
            plan = db.advance_plan_after_success(&plan, now).await.unwrap();
        }
        assert_eq!(plan.execution_count, 4);
        assert_eq!(plan.status, PlanStatus::Completed);
        assert!(plan.next_execution_at.is_none());

        // Completed plans are never selected again.
        let far_future = now + ChronoDuration::weeks(100);
        assert!(db.due_plans(far_future).await.unwrap().is_empty());
        // And a fifth advance is refused.
        assert!(db.advance_plan_after_success(&plan, now).await.is_err());
    }

    #[tokio::test]
    async fn execution_rows_keep_their_shape() {
        let db = memory_db().await;
        let plan = db.insert_plan(&weekly_plan()).await.unwrap();

        let success = db
            .record_execution(
                NewExecution {
                    plan_id: Some(plan.id.clone()),
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
        assert!(success.tx_hash.is_some() && success.gas_fee.is_some());

        let failed = db
            .record_execution(
                NewExecution {
                    plan_id: Some(plan.id.clone()),
                    from_amount: "100".into(),
                    to_amount: "0".into(),
                    exchange_rate: "0".into(),
                    error_message: Some("Insufficient user approval".into()),
                    ..Default::default()
                },
                ExecutionStatus::Failed,
            )
            .await
            .unwrap();
        assert!(failed.tx_hash.is_none());
        assert!(failed.error_message.is_some());

        let latest = db.latest_execution(&plan.id).await.unwrap().unwrap();
        assert_eq!(latest.id, failed.id);
    }

    #[tokio::test]
    async fn vault_shares_add_exactly() {
        let db = memory_db().await;
        let user = "0x1111111111111111111111111111111111111111";
        let vault = "0x2222222222222222222222222222222222222222";

        let h = db
            .add_vault_shares(user, vault, "USDC", "10.0", 18)
            .await
            .unwrap();
        assert_eq!(h.share_tokens, "10.0");

        let h = db.add_vault_shares(user, vault, "USDC", "99", 18).await.unwrap();
        assert_eq!(h.share_tokens, "109.0");

        db.remove_vault_holding(user, vault).await.unwrap();
        assert!(db.vault_holding(user, vault).await.unwrap().is_none());
    }
}
