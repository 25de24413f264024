use std::sync::Arc;

use sqlx::PgPool;

pub mod accounts;
pub mod commissions;
pub mod invitations;
pub mod withdrawals;

use accounts::{AccountRepository, MemoryAccountRepository, PgAccountRepository};
use commissions::{CommissionRepository, MemoryCommissionRepository, PgCommissionRepository};
use invitations::{InvitationRepository, MemoryInvitationRepository, PgInvitationRepository};
use withdrawals::{MemoryWithdrawalRepository, PgWithdrawalRepository, WithdrawalRepository};

/// The storage handles injected into the ledger services.
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
    pub commissions: Arc<dyn CommissionRepository>,
    pub withdrawals: Arc<dyn WithdrawalRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Repositories {
            accounts: Arc::new(MemoryAccountRepository::new()),
            invitations: Arc::new(MemoryInvitationRepository::new()),
            commissions: Arc::new(MemoryCommissionRepository::new()),
            withdrawals: Arc::new(MemoryWithdrawalRepository::new()),
        }
    }

    pub fn postgres(conn: PgPool) -> Self {
        Repositories {
            accounts: Arc::new(PgAccountRepository::new(conn.clone())),
            invitations: Arc::new(PgInvitationRepository::new(conn.clone())),
            commissions: Arc::new(PgCommissionRepository::new(conn.clone())),
            withdrawals: Arc::new(PgWithdrawalRepository::new(conn)),
        }
    }
}
