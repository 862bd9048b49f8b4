//! Per-IP adaptive rate limiting
//!
//! Each client IP gets a visit counter for the current sweep window. Going
//! over the threshold bans the IP until `ban_end_time`. Records are only ever
//! removed by the two periodic sweeps.

use crate::error::{NbError, Result};
use crate::session::Access;
use crate::unix_now;
use dashmap::DashMap;
use nb_types::SpeedLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Length of the visit counting window
pub const SWEEP_WINDOW: Duration = Duration::from_secs(60);

/// Expired bans are collected at least daily, whatever the ban length
const MAX_BAN_SWEEP_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateRecord {
    pub visits: u32,
    pub is_banned: bool,
    /// Unix seconds
    pub ban_end_time: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    records: Arc<DashMap<String, RateRecord>>,
    limits: SpeedLimitConfig,
}

impl RateLimiter {
    pub fn new(limits: SpeedLimitConfig) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            limits,
        }
    }

    /// Reject a banned IP before any session lookup happens
    pub fn precheck(&self, ip: &str) -> Result<()> {
        self.precheck_at(ip, unix_now())
    }

    pub fn precheck_at(&self, ip: &str, now: i64) -> Result<()> {
        let mut record = self.records.entry(ip.to_string()).or_default();
        if record.is_banned {
            if now < record.ban_end_time {
                return Err(NbError::RateLimited);
            }
            // ban elapsed but not yet swept
            *record = RateRecord::default();
        }
        Ok(())
    }

    /// Count one request from `ip` and reject it when over the threshold
    pub fn admit(&self, ip: &str, access: &Access) -> Result<()> {
        self.admit_at(ip, access, unix_now())
    }

    pub fn admit_at(&self, ip: &str, access: &Access, now: i64) -> Result<()> {
        if access.is_administrator() {
            return Ok(());
        }

        let limit = if access.is_authenticated() {
            self.limits.user_max_speed
        } else {
            self.limits.guest_max_speed
        };

        let mut record = self.records.entry(ip.to_string()).or_default();
        if record.is_banned {
            return Err(NbError::RateLimited);
        }

        record.visits += 1;
        if record.visits > limit {
            record.is_banned = true;
            let duration = i64::try_from(self.limits.ban_duration).unwrap_or(i64::MAX);
            record.ban_end_time = now.saturating_add(duration);
            info!(ip, visits = record.visits, "Rate limit exceeded, banning client");
            return Err(NbError::RateLimited);
        }
        Ok(())
    }

    pub fn record(&self, ip: &str) -> Option<RateRecord> {
        self.records.get(ip).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// End of a counting window: forget every IP that is not banned
    pub fn sweep_window(&self) {
        self.records.retain(|_, record| record.is_banned);
    }

    pub fn sweep_expired_bans(&self) {
        self.sweep_expired_bans_at(unix_now())
    }

    pub fn sweep_expired_bans_at(&self, now: i64) {
        self.records
            .retain(|_, record| !(record.is_banned && record.ban_end_time <= now));
    }

    /// Start both sweeps on the runtime
    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        let window = {
            let limiter = self.clone();
            tokio::spawn(async move {
                let mut interval = interval_at(Instant::now() + SWEEP_WINDOW, SWEEP_WINDOW);
                loop {
                    interval.tick().await;
                    limiter.sweep_window();
                    debug!(remaining = limiter.len(), "Rate window swept");
                }
            })
        };

        let bans = {
            let limiter = self.clone();
            let period =
                Duration::from_secs(self.limits.ban_duration.clamp(1, MAX_BAN_SWEEP_SECS));
            tokio::spawn(async move {
                let mut interval = interval_at(Instant::now() + period, period);
                loop {
                    interval.tick().await;
                    limiter.sweep_expired_bans();
                    debug!(remaining = limiter.len(), "Expired bans swept");
                }
            })
        };

        vec![window, bans]
    }
}
