//! Wallet login for the ration distribution dashboards.
//!
//! A connected wallet is classified as admin, shopkeeper, delivery agent or
//! consumer by [`resolver::RoleResolver`], which chains independently fallible
//! [`membership::MembershipCheck`]s. [`flow::LoginFlow`] wraps one resolution
//! per login screen with a re-entrancy guard and cancellation, and persists the
//! result through a [`session::SessionStore`].

pub mod flow;
pub mod membership;
pub mod resolver;
pub mod role;
pub mod session;

use pds_types::wallet::WalletAddressError;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(#[from] WalletAddressError),
    #[error(transparent)]
    Session(#[from] session::SessionError),
    #[error("Login cancelled")]
    Cancelled,
}
