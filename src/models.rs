pub mod accounts;
pub mod commissions;
pub mod earnings;
pub mod invitations;
pub mod withdrawals;
