use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    repositories::Repositories,
    settings::{CommissionPolicy, Settings, WithdrawalPolicy},
};

pub mod accounts;
pub mod commissions;
pub mod earnings;
pub mod http;
pub mod invitations;
pub mod withdrawals;

const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("Account already exists: {0}")]
    AccountExists(String),
    #[error("Account is deactivated: {0}")]
    AccountInactive(String),
    #[error("Invitee is already bound: {0}")]
    AlreadyBound(String),
    #[error("Account cannot invite itself: {0}")]
    SelfInvite(String),
    #[error("Member {member} is not bound to inviter {inviter}")]
    NotBound { inviter: String, member: String },
    #[error("Task already settled: {0}")]
    DuplicateTask(String),
    #[error("Insufficient funds in account {0}")]
    InsufficientFunds(String),
    #[error("Amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange { amount: i64, min: i64, max: i64 },
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("Invalid withdrawal method: {0:?}")]
    InvalidMethod(String),
    #[error("Total overflows for {0}")]
    Overflow(String),
    #[error("Withdrawal already processed: {0}")]
    AlreadyProcessed(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub(crate) fn repository(service: &'static str) -> impl FnOnce(anyhow::Error) -> ServiceError {
        move |e| ServiceError::Repository(service.to_string(), e.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(..) => "not_found",
            ServiceError::AccountExists(_) => "account_exists",
            ServiceError::AccountInactive(_) => "account_inactive",
            ServiceError::AlreadyBound(_) => "already_bound",
            ServiceError::SelfInvite(_) => "self_invite",
            ServiceError::NotBound { .. } => "not_bound",
            ServiceError::DuplicateTask(_) => "duplicate_task",
            ServiceError::InsufficientFunds(_) => "insufficient_funds",
            ServiceError::AmountOutOfRange { .. } => "amount_out_of_range",
            ServiceError::InvalidAmount(_) => "invalid_amount",
            ServiceError::InvalidMethod(_) => "invalid_method",
            ServiceError::Overflow(_) => "overflow",
            ServiceError::AlreadyProcessed(_) => "already_processed",
            ServiceError::Repository(..) => "repository",
            ServiceError::Communication(..) => "communication",
            ServiceError::Internal(_) => "internal",
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// The ledger components wired over one set of repositories.
#[derive(Clone)]
pub struct Ledger {
    pub accounts: accounts::AccountStore,
    pub invitations: invitations::InvitationLedger,
    pub commissions: commissions::CommissionLedger,
    pub withdrawals: withdrawals::WithdrawalProcessor,
    pub earnings: earnings::EarningsQuery,
}

impl Ledger {
    pub fn new(repositories: Repositories, settings: &Settings) -> Self {
        Self::with_policies(
            repositories,
            settings.commission.clone(),
            settings.withdrawal.clone(),
        )
    }

    pub fn with_policies(
        repositories: Repositories,
        commission: CommissionPolicy,
        withdrawal: WithdrawalPolicy,
    ) -> Self {
        let accounts = accounts::AccountStore::new(repositories.accounts);
        let invitations = invitations::InvitationLedger::new(
            accounts.clone(),
            repositories.invitations.clone(),
            commission.register_reward_in_cents,
        );
        let commissions = commissions::CommissionLedger::new(
            accounts.clone(),
            repositories.invitations,
            repositories.commissions,
            commission.commission_rate_bps,
        );
        let withdrawals = withdrawals::WithdrawalProcessor::new(
            accounts.clone(),
            repositories.withdrawals,
            withdrawal,
        );
        let earnings = earnings::EarningsQuery::new(
            accounts.clone(),
            invitations.clone(),
            commissions.clone(),
        );

        Ledger {
            accounts,
            invitations,
            commissions,
            withdrawals,
            earnings,
        }
    }
}

/// Starts one service loop per component and returns the channels feeding them.
pub fn spawn_services(ledger: Ledger) -> http::AppState {
    let (account_tx, mut account_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (invitation_tx, mut invitation_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (commission_tx, mut commission_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (withdrawal_tx, mut withdrawal_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (earnings_tx, mut earnings_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut account_service = accounts::AccountService::new();
    let mut invitation_service = invitations::InvitationService::new();
    let mut commission_service = commissions::CommissionService::new();
    let mut withdrawal_service = withdrawals::WithdrawalService::new();
    let mut earnings_service = earnings::EarningsService::new();

    log::info!("Starting account service.");
    let account_handler = ledger.accounts.clone();
    tokio::spawn(async move {
        account_service
            .run(account_handler, &mut account_rx)
            .await;
    });

    log::info!("Starting invitation service.");
    let invitation_handler = ledger.invitations.clone();
    tokio::spawn(async move {
        invitation_service
            .run(invitation_handler, &mut invitation_rx)
            .await;
    });

    log::info!("Starting commission service.");
    let commission_handler = ledger.commissions.clone();
    tokio::spawn(async move {
        commission_service
            .run(commission_handler, &mut commission_rx)
            .await;
    });

    log::info!("Starting withdrawal service.");
    let withdrawal_handler = ledger.withdrawals.clone();
    tokio::spawn(async move {
        withdrawal_service
            .run(withdrawal_handler, &mut withdrawal_rx)
            .await;
    });

    log::info!("Starting earnings service.");
    let earnings_handler = ledger.earnings;
    tokio::spawn(async move {
        earnings_service
            .run(earnings_handler, &mut earnings_rx)
            .await;
    });

    http::AppState {
        account_channel: account_tx,
        invitation_channel: invitation_tx,
        commission_channel: commission_tx,
        withdrawal_channel: withdrawal_tx,
        earnings_channel: earnings_tx,
    }
}

pub async fn start_services(ledger: Ledger, listen: &str) -> Result<(), anyhow::Error> {
    let state = spawn_services(ledger);

    log::info!("Starting HTTP server.");
    http::start_http_server(state, listen).await
}
