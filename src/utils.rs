use uuid::Uuid;

const BPS_DENOMINATOR: i128 = 10_000;

/// Applies a basis-point rate to an amount in cents, rounding half away from zero.
pub fn apply_rate_bps(amount_in_cents: i64, rate_bps: u32) -> i64 {
    let product = amount_in_cents as i128 * rate_bps as i128;
    let half = BPS_DENOMINATOR / 2;
    let rounded = if product >= 0 {
        (product + half) / BPS_DENOMINATOR
    } else {
        (product - half) / BPS_DENOMINATOR
    };

    rounded as i64
}

/// Sums amounts in cents. Returns `None` on overflow.
pub fn sum_cents<I>(amounts: I) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
}

pub fn new_id() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

pub fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub fn generate_invite_code() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("CM{}", suffix[..8].to_uppercase())
}
