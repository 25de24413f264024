use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_COMMISSION_RATE_BPS: u32 = 500;
pub const DEFAULT_REGISTER_REWARD_IN_CENTS: i64 = 500;
pub const DEFAULT_MIN_WITHDRAWAL_IN_CENTS: i64 = 1_000;
pub const DEFAULT_MAX_WITHDRAWAL_IN_CENTS: i64 = 100_000;
pub const DEFAULT_WITHDRAWAL_FEE_BPS: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen: String,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: Backend,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CommissionPolicy {
    pub commission_rate_bps: u32,
    pub register_reward_in_cents: i64,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        CommissionPolicy {
            commission_rate_bps: DEFAULT_COMMISSION_RATE_BPS,
            register_reward_in_cents: DEFAULT_REGISTER_REWARD_IN_CENTS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WithdrawalPolicy {
    pub min_amount_in_cents: i64,
    pub max_amount_in_cents: i64,
    pub fee_bps: u32,
    /// Freeze amount plus fee at request time instead of checking again at approval.
    pub reserve_on_request: bool,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        WithdrawalPolicy {
            min_amount_in_cents: DEFAULT_MIN_WITHDRAWAL_IN_CENTS,
            max_amount_in_cents: DEFAULT_MAX_WITHDRAWAL_IN_CENTS,
            fee_bps: DEFAULT_WITHDRAWAL_FEE_BPS,
            reserve_on_request: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub postgres: Option<Postgres>,
    pub commission: CommissionPolicy,
    pub withdrawal: WithdrawalPolicy,
}

impl Settings {
    /// Reads `path` if it exists, then applies `LEDGER__SECTION__KEY` overrides.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
