//! Identity and daily-budget seams

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::id::UserId;

/// Resolves a bearer token to a user identity. Rejection surfaces as
/// [`crate::error::CoreError::AuthRejected`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId>;
}

/// Tracks per-user daily conversation minutes. Days roll over on the
/// tracker's calendar, not the client's.
#[async_trait]
pub trait BudgetTracker: Send + Sync {
    /// Minutes left for this user on `day`. Zero means exhausted.
    async fn remaining_minutes(&self, user_id: &UserId, day: NaiveDate) -> Result<u32>;

    /// Record consumed minutes against `day`. Saturates at zero
    /// remaining; never errors on overdraw.
    async fn consume(&self, user_id: &UserId, day: NaiveDate, minutes: u32) -> Result<()>;
}
