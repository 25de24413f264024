use chrono::{Duration, NaiveDate};
use serde::Serialize;

use super::commissions::TaskEarning;

pub const DAILY_SERIES_DAYS: i64 = 7;
pub const WEEK_DAYS: i64 = 7;
pub const MONTH_DAYS: i64 = 30;

#[derive(Clone, Debug, Serialize)]
pub struct EarningsSummary {
    pub user_id: String,
    pub commission_in_cents: i64,
    pub register_rewards_in_cents: i64,
    /// Referral income: task commissions plus completed register rewards.
    pub total_in_cents: i64,
    pub available_in_cents: i64,
    pub frozen_in_cents: i64,
    pub balance_in_cents: i64,
    pub tasks: TaskEarningsReport,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyEarning {
    pub date: NaiveDate,
    pub amount_in_cents: i64,
}

/// A worker's own task payouts grouped by period. Periods count back from
/// `today` inclusive, in UTC days.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskEarningsReport {
    pub total_in_cents: i64,
    pub completed_tasks: usize,
    pub today_in_cents: i64,
    pub yesterday_in_cents: i64,
    pub weekly_in_cents: i64,
    pub monthly_in_cents: i64,
    /// Oldest day first, one entry per day including empty ones.
    pub daily: Vec<DailyEarning>,
}

impl TaskEarningsReport {
    /// Returns `None` if any total overflows.
    pub fn from_earnings(earnings: &[TaskEarning], today: NaiveDate) -> Option<Self> {
        let mut report = TaskEarningsReport {
            completed_tasks: earnings.len(),
            daily: (0..DAILY_SERIES_DAYS)
                .rev()
                .map(|days_back| DailyEarning {
                    date: today - Duration::days(days_back),
                    amount_in_cents: 0,
                })
                .collect(),
            ..Default::default()
        };

        for earning in earnings {
            let amount = earning.amount_in_cents;
            let age = (today - earning.created_at.date()).num_days();

            report.total_in_cents = report.total_in_cents.checked_add(amount)?;
            if age == 0 {
                report.today_in_cents = report.today_in_cents.checked_add(amount)?;
            }
            if age == 1 {
                report.yesterday_in_cents = report.yesterday_in_cents.checked_add(amount)?;
            }
            if (0..WEEK_DAYS).contains(&age) {
                report.weekly_in_cents = report.weekly_in_cents.checked_add(amount)?;
            }
            if (0..MONTH_DAYS).contains(&age) {
                report.monthly_in_cents = report.monthly_in_cents.checked_add(amount)?;
            }
            if (0..DAILY_SERIES_DAYS).contains(&age) {
                let slot = &mut report.daily[(DAILY_SERIES_DAYS - 1 - age) as usize];
                slot.amount_in_cents = slot.amount_in_cents.checked_add(amount)?;
            }
        }

        Some(report)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TeamMember {
    pub member_id: String,
    pub bound_at: Option<chrono::NaiveDateTime>,
    pub completed_tasks: usize,
    pub total_earnings_in_cents: i64,
    pub my_commission_in_cents: i64,
}
