//! Per-giver grant allowance over a sliding window.
//!
//! The guard keeps no state of its own. Every check re-reads the ledger so
//! several processes sharing one store agree on the count.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::LedgerConfig;
use crate::domain::beer::UserId;
use crate::ports::{BeerFilter, LedgerStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub window_minutes: u32,
    pub cap: u32,
}

impl CooldownPolicy {
    pub fn new(window_minutes: u32, cap: u32) -> Self {
        Self { window_minutes, cap }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.cooldown_window_minutes, config.cooldown_cap)
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allowance {
    pub allowed: bool,
    pub remaining: u32,
}

pub struct CooldownGuard<S> {
    store: Arc<S>,
    policy: CooldownPolicy,
}

impl<S: LedgerStore> CooldownGuard<S> {
    pub fn new(store: Arc<S>, policy: CooldownPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// Counts the giver's entries created at or after `window_start` and
    /// decides whether `requested` more fit under the cap.
    pub async fn check_allowance(
        &self,
        giver: &UserId,
        window_start: DateTime<Utc>,
        requested: u32,
    ) -> Result<Allowance, StoreError> {
        let recent = self
            .store
            .find(&BeerFilter::all().giver(giver).created_since(window_start))
            .await?;
        let used = u32::try_from(recent.len()).unwrap_or(u32::MAX);
        let remaining = self.policy.cap.saturating_sub(used);

        tracing::debug!(
            event_name = "ledger.cooldown.checked",
            user_id = %giver,
            used,
            remaining,
            requested,
            "cooldown allowance checked"
        );

        Ok(Allowance { allowed: requested <= remaining, remaining })
    }
}
