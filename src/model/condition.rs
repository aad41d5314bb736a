// src/model/condition.rs

//! Status conditions
//!
//! Every package and revision carries a `Ready` condition (`Available` or
//! `Unavailable`) and a `Synced` condition recording whether the last
//! reconciliation pass succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the object is usable
    Ready,
    /// Whether the last reconciliation pass succeeded
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Unavailable,
    ReconcileSuccess,
    ReconcileError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "Available",
            Self::Unavailable => "Unavailable",
            Self::ReconcileSuccess => "ReconcileSuccess",
            Self::ReconcileError => "ReconcileError",
        };
        write!(f, "{}", s)
    }
}

/// Observed state of one aspect of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(condition_type: ConditionType, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            condition_type,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Ready and usable
    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available)
    }

    /// Not usable
    pub fn unavailable() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Unavailable)
    }

    pub fn reconcile_success() -> Self {
        Self::new(ConditionType::Synced, ConditionStatus::True, ConditionReason::ReconcileSuccess)
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(ConditionType::Synced, ConditionStatus::False, ConditionReason::ReconcileError)
            .with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Equal in everything but transition time
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Set of conditions, at most one per type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }

    /// Set conditions, replacing existing ones of the same type
    ///
    /// An equivalent condition is left alone so its transition time still
    /// reflects when the status last changed.
    pub fn set(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            match self
                .conditions
                .iter_mut()
                .find(|c| c.condition_type == condition.condition_type)
            {
                Some(existing) if existing.equivalent(&condition) => {}
                Some(existing) => *existing = condition,
                None => self.conditions.push(condition),
            }
        }
    }

    /// True when the `Ready` condition says `Available`
    pub fn is_available(&self) -> bool {
        self.get(ConditionType::Ready)
            .is_some_and(|c| c.reason == ConditionReason::Available)
    }
}
