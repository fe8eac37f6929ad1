// SPDX-License-Identifier: MIT

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Minutes in one week; `total_executions` is floored from this.
pub const MINUTES_PER_WEEK: u32 = 7 * 24 * 60;

pub const MIN_INTERVAL_MINUTES: u32 = 2;
pub const MAX_INTERVAL_MINUTES: u32 = 43_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, FromRow)]
pub struct Plan {
    pub id: String,
    pub user_address: String,
    pub from_token: String,
    pub to_token: String,
    /// Human-unit decimal string; parsed at the source token's decimals.
    pub amount: String,
    pub interval_minutes: i64,
    pub duration_weeks: i64,
    pub slippage: String,
    pub status: PlanStatus,
    pub execution_count: i64,
    pub total_executions: i64,
    pub next_execution_at: Option<NaiveDateTime>,
    pub leased_until: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Plan {
    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }

    /// True when one more successful execution finishes the plan.
    pub fn is_final_execution(&self) -> bool {
        self.execution_count + 1 >= self.total_executions
    }
}

/// `floor(duration_weeks * 10080 / interval_minutes)`.
pub fn total_executions(duration_weeks: u32, interval_minutes: u32) -> u32 {
    duration_weeks * MINUTES_PER_WEEK / interval_minutes
}

/// Plan fields as supplied by the external CRUD surface.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub user_address: String,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub interval_minutes: u32,
    pub duration_weeks: u32,
    pub slippage: String,
}

impl NewPlan {
    pub fn validate(&self) -> Result<(), crate::domain::error::EngineError> {
        use crate::domain::error::EngineError;
        use std::str::FromStr;

        if alloy::primitives::Address::from_str(&self.user_address).is_err() {
            return Err(EngineError::Validation {
                field: "user_address".into(),
                message: format!("'{}' is not a 20-byte hex address", self.user_address),
            });
        }
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&self.interval_minutes) {
            return Err(EngineError::Validation {
                field: "interval_minutes".into(),
                message: format!(
                    "{} outside {}..={}",
                    self.interval_minutes, MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES
                ),
            });
        }
        if self.duration_weeks == 0 {
            return Err(EngineError::Validation {
                field: "duration_weeks".into(),
                message: "must be positive".into(),
            });
        }
        // total_executions floors; a duration shorter than one interval
        // would floor to zero and complete on its first run.
        if total_executions(self.duration_weeks, self.interval_minutes) == 0 {
            return Err(EngineError::Validation {
                field: "duration_weeks".into(),
                message: format!(
                    "{} weeks is shorter than one {}-minute interval",
                    self.duration_weeks, self.interval_minutes
                ),
            });
        }
        for (field, value) in [("amount", &self.amount), ("slippage", &self.slippage)] {
            if value.trim().starts_with('-') {
                return Err(EngineError::Validation {
                    field: field.into(),
                    message: "must not be negative".into(),
                });
            }
            crate::common::units::to_atomic(value, 18).map_err(|_| EngineError::Validation {
                field: field.into(),
                message: format!("'{value}' is not a decimal number"),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRecord {
    pub id: String,
    pub plan_id: Option<String>,
    pub executed_at: NaiveDateTime,
    pub from_amount: String,
    pub to_amount: String,
    pub exchange_rate: String,
    pub gas_fee: Option<String>,
    pub tx_hash: Option<String>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub vault_address: Option<String>,
    pub share_tokens: Option<String>,
    pub deposit_tx_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExecution {
    pub plan_id: Option<String>,
    pub from_amount: String,
    pub to_amount: String,
    pub exchange_rate: String,
    pub gas_fee: Option<String>,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub vault_address: Option<String>,
    pub share_tokens: Option<String>,
    pub deposit_tx_hash: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VaultHolding {
    pub id: String,
    pub user_address: String,
    pub vault_address: String,
    /// Decimal string at the vault's share decimals.
    pub share_tokens: String,
    pub token_symbol: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
