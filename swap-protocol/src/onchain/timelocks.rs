//! Leg policies: the time-lock boundaries that decide who may act on an escrow, and when.
//!
//! Source and Destination instances run the same state machine; the only thing
//! that differs between them is the policy value they were initialized with.

use crate::data_structures::{AccountId, Timestamp};
use crate::onchain::escrow_contract::EscrowError;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LegKind {
    /// Maker deposits; the resolver claims parts.
    Source,
    /// Resolver deposits; parts are withdrawn to the maker.
    Destination,
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegKind::Source => f.write_str("src"),
            LegKind::Destination => f.write_str("dst"),
        }
    }
}

/// Where an instance currently sits on its timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegPhase {
    AwaitingFinality,
    /// Only the counterparty may release parts.
    ExclusiveWithdrawal,
    /// Anyone holding a valid secret may release parts (Destination only).
    PublicWithdrawal,
    /// Releases are closed; the funder may refund.
    Cancellation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegPolicy {
    Source {
        finality_lock: Timestamp,
        cancel_lock: Timestamp,
    },
    Destination {
        finality_lock: Timestamp,
        exclusive_lock: Timestamp,
        cancel_lock: Timestamp,
    },
}

impl LegPolicy {
    pub fn source(finality_lock: Timestamp, cancel_lock: Timestamp) -> Self {
        LegPolicy::Source { finality_lock, cancel_lock }
    }

    pub fn destination(
        finality_lock: Timestamp,
        exclusive_lock: Timestamp,
        cancel_lock: Timestamp,
    ) -> Self {
        LegPolicy::Destination { finality_lock, exclusive_lock, cancel_lock }
    }

    pub fn kind(&self) -> LegKind {
        match self {
            LegPolicy::Source { .. } => LegKind::Source,
            LegPolicy::Destination { .. } => LegKind::Destination,
        }
    }

    pub fn finality_lock(&self) -> Timestamp {
        match *self {
            LegPolicy::Source { finality_lock, .. } => finality_lock,
            LegPolicy::Destination { finality_lock, .. } => finality_lock,
        }
    }

    pub fn cancel_lock(&self) -> Timestamp {
        match *self {
            LegPolicy::Source { cancel_lock, .. } => cancel_lock,
            LegPolicy::Destination { cancel_lock, .. } => cancel_lock,
        }
    }

    pub fn exclusive_lock(&self) -> Option<Timestamp> {
        match *self {
            LegPolicy::Source { .. } => None,
            LegPolicy::Destination { exclusive_lock, .. } => Some(exclusive_lock),
        }
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        match *self {
            LegPolicy::Source { finality_lock, cancel_lock } => {
                if cancel_lock <= finality_lock {
                    return Err(EscrowError::InvalidParameters(format!(
                        "src cancel lock {} must be after finality lock {}",
                        cancel_lock, finality_lock
                    )));
                }
            }
            LegPolicy::Destination { finality_lock, exclusive_lock, cancel_lock } => {
                if exclusive_lock <= finality_lock {
                    return Err(EscrowError::InvalidParameters(format!(
                        "dst exclusive lock {} must be after finality lock {}",
                        exclusive_lock, finality_lock
                    )));
                }
                if cancel_lock <= exclusive_lock {
                    return Err(EscrowError::InvalidParameters(format!(
                        "dst cancel lock {} must be after exclusive lock {}",
                        cancel_lock, exclusive_lock
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn phase(&self, now: Timestamp) -> LegPhase {
        if now < self.finality_lock() {
            LegPhase::AwaitingFinality
        } else if now >= self.cancel_lock() {
            LegPhase::Cancellation
        } else {
            match self.exclusive_lock() {
                Some(exclusive_lock) if now >= exclusive_lock => LegPhase::PublicWithdrawal,
                _ => LegPhase::ExclusiveWithdrawal,
            }
        }
    }

    /// Timing and caller rules for releasing a part.
    ///
    /// Source: counterparty only, inside `[finality, cancel)`.
    /// Destination: inside `[finality, cancel)`; before `exclusive` counterparty only.
    pub fn check_release(
        &self,
        now: Timestamp,
        caller: &AccountId,
        counterparty: &AccountId,
    ) -> Result<(), EscrowError> {
        let is_counterparty = caller == counterparty;
        if self.kind() == LegKind::Source && !is_counterparty {
            return Err(EscrowError::Unauthorized { caller: caller.clone(), action: "claim" });
        }

        match self.phase(now) {
            LegPhase::AwaitingFinality => Err(EscrowError::TooEarly {
                now,
                opens_at: self.finality_lock(),
            }),
            LegPhase::Cancellation => Err(EscrowError::TooLate {
                now,
                closed_at: self.cancel_lock(),
            }),
            LegPhase::ExclusiveWithdrawal if !is_counterparty => {
                Err(EscrowError::Unauthorized { caller: caller.clone(), action: "withdraw" })
            }
            LegPhase::ExclusiveWithdrawal | LegPhase::PublicWithdrawal => Ok(()),
        }
    }

    pub fn check_refund(&self, now: Timestamp) -> Result<(), EscrowError> {
        if now < self.cancel_lock() {
            return Err(EscrowError::TooEarly { now, opens_at: self.cancel_lock() });
        }
        Ok(())
    }
}

impl fmt::Display for LegPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LegPolicy::Source { finality_lock, cancel_lock } => write!(
                f,
                "src[finality {}, cancel {}]",
                format_timestamp(finality_lock),
                format_timestamp(cancel_lock)
            ),
            LegPolicy::Destination { finality_lock, exclusive_lock, cancel_lock } => write!(
                f,
                "dst[finality {}, exclusive {}, cancel {}]",
                format_timestamp(finality_lock),
                format_timestamp(exclusive_lock),
                format_timestamp(cancel_lock)
            ),
        }
    }
}

/// RFC 3339 rendering for log lines; falls back to raw seconds when out of range.
pub fn format_timestamp(ts: Timestamp) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
