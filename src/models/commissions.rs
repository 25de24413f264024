use serde::{Deserialize, Serialize};

use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "commission_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommissionKind {
    Task,
    Register,
}

/// One line of the append-only commission ledger.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct CommissionRecord {
    pub id: String,
    pub inviter_id: String,
    pub member_id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_earning_in_cents: i64,
    pub commission_in_cents: i64,
    pub date: chrono::NaiveDateTime,
    pub kind: CommissionKind,
}

impl CommissionRecord {
    pub fn task(
        inviter_id: &str,
        member_id: &str,
        task_id: &str,
        task_name: &str,
        task_earning_in_cents: i64,
        commission_in_cents: i64,
    ) -> Self {
        CommissionRecord {
            id: utils::new_id(),
            inviter_id: inviter_id.to_string(),
            member_id: member_id.to_string(),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            task_earning_in_cents,
            commission_in_cents,
            date: utils::now(),
            kind: CommissionKind::Task,
        }
    }
}

/// A worker's own payout for a completed task.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct TaskEarning {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub task_name: String,
    pub amount_in_cents: i64,
    pub created_at: chrono::NaiveDateTime,
}

impl TaskEarning {
    pub fn new(user_id: &str, task_id: &str, task_name: &str, amount_in_cents: i64) -> Self {
        TaskEarning {
            id: utils::new_id(),
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            amount_in_cents,
            created_at: utils::now(),
        }
    }
}

/// Bounds are inclusive on both ends.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CommissionFilter {
    pub from: Option<chrono::NaiveDateTime>,
    pub to: Option<chrono::NaiveDateTime>,
    pub kind: Option<CommissionKind>,
}

impl CommissionFilter {
    pub fn since(since: Option<chrono::NaiveDateTime>) -> Self {
        CommissionFilter {
            from: since,
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &CommissionRecord) -> bool {
        self.from.map_or(true, |from| record.date >= from)
            && self.to.map_or(true, |to| record.date <= to)
            && self.kind.map_or(true, |kind| record.kind == kind)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SettleTask {
    pub user_id: String,
    pub task_id: String,
    pub task_name: String,
    pub earning_in_cents: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskSettlement {
    pub earning: TaskEarning,
    pub commission: Option<CommissionRecord>,
    /// Set when the worker was paid but the inviter's commission was not.
    /// `record_task_commission` can complete it later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_filter_matches_everything() {
        let record = CommissionRecord::task("a", "b", "t1", "review", 350, 18);
        assert!(CommissionFilter::default().matches(&record));
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let record = CommissionRecord::task("a", "b", "t1", "review", 350, 18);
        let filter = CommissionFilter {
            from: Some(record.date),
            to: Some(record.date),
            kind: None,
        };
        assert!(filter.matches(&record));

        let later = CommissionFilter::since(Some(record.date + Duration::seconds(1)));
        assert!(!later.matches(&record));
    }

    #[test]
    fn filter_by_kind() {
        let record = CommissionRecord::task("a", "b", "t1", "review", 350, 18);
        let register_only = CommissionFilter {
            kind: Some(CommissionKind::Register),
            ..Default::default()
        };
        assert!(!register_only.matches(&record));
    }
}
