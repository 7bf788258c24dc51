//! Aggregate counts over the full activity collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Activity, ActivityStatus};

/// Dashboard figures derived from every activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetrics {
  pub total: u64,
  pub planned: u64,
  pub in_progress: u64,
  pub completed: u64,
  pub cancelled: u64,
  /// Still open with a scheduled time in the past
  pub overdue: u64,
  /// completed / total, 0 for an empty collection
  pub completion_rate: f64,
  #[serde(default)]
  pub by_type: BTreeMap<String, u64>,
}

impl ActivityMetrics {
  /// Compute the aggregate locally, as the store does.
  pub fn from_activities(activities: &[Activity], now: DateTime<Utc>) -> Self {
    let mut metrics = Self {
      total: activities.len() as u64,
      ..Self::default()
    };

    for activity in activities {
      match activity.status {
        ActivityStatus::Planned => metrics.planned += 1,
        ActivityStatus::InProgress => metrics.in_progress += 1,
        ActivityStatus::Completed => metrics.completed += 1,
        ActivityStatus::Cancelled => metrics.cancelled += 1,
      }
      if activity.is_overdue(now) {
        metrics.overdue += 1;
      }
      *metrics
        .by_type
        .entry(activity.activity_type.to_string())
        .or_default() += 1;
    }

    if metrics.total > 0 {
      metrics.completion_rate = metrics.completed as f64 / metrics.total as f64;
    }

    metrics
  }
}
