//! The shared timer record, one per binding target.

use chrono::{DateTime, TimeZone, Utc};
use habit_domain::lenient;
use habit_domain::BindingTarget;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl TimerState {
    /// Unknown names read as `Idle`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            _ => Self::Idle,
        }
    }
}

impl<'de> Deserialize<'de> for TimerState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .map(Self::from_name)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerDocument {
    #[serde(default)]
    pub state: TimerState,
    #[serde(default, deserialize_with = "lenient::number")]
    pub accumulated_sec: f64,
    #[serde(default, deserialize_with = "timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::version")]
    pub version: u64,
}

/// RFC 3339 strings or epoch milliseconds; anything else is absent.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|ms| ms.is_finite())
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        _ => None,
    })
}

/// `{itemId}__{date}__{L<tier>|N}`
pub fn timer_doc_id(target: &BindingTarget) -> String {
    let tier = if target.is_level_habit() {
        format!("L{}", target.main_level_index.unwrap_or(0))
    } else {
        "N".to_string()
    };
    format!("{}__{}__{}", target.item_id, target.date, tier)
}

fn whole_seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let ms = (to - from).num_milliseconds();
    if ms > 0 {
        (ms / 1000) as f64
    } else {
        0.0
    }
}

impl TimerDocument {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// `None` for a missing document; malformed content reads as idle.
    pub fn from_snapshot(snapshot: Option<&Value>) -> Option<Self> {
        snapshot.map(|value| serde_json::from_value(value.clone()).unwrap_or_default())
    }

    /// Whole seconds of the current running period.
    pub fn running_seconds(&self, now: DateTime<Utc>) -> f64 {
        match (self.state, self.started_at) {
            (TimerState::Running, Some(started)) => whole_seconds_between(started, now),
            _ => 0.0,
        }
    }

    pub fn total_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.accumulated_sec.max(0.0) + self.running_seconds(now)
    }

    /// Transition into `running`; `None` when another client already holds it.
    pub fn claim_running(&self, now: DateTime<Utc>) -> Option<Self> {
        if self.state == TimerState::Running {
            return None;
        }
        Some(Self {
            state: TimerState::Running,
            accumulated_sec: self.accumulated_sec.max(0.0),
            started_at: Some(now),
            updated_at: Some(now),
            version: self.version + 1,
        })
    }

    /// Folds the running period into the accumulated total.
    pub fn paused(&self, now: DateTime<Utc>) -> Option<Self> {
        if self.state != TimerState::Running || self.started_at.is_none() {
            return None;
        }
        Some(Self {
            state: TimerState::Paused,
            accumulated_sec: self.total_seconds(now),
            started_at: None,
            updated_at: Some(now),
            version: self.version + 1,
        })
    }

    /// The idle successor and the total that was timed.
    pub fn reset(&self, now: DateTime<Utc>) -> (Self, f64) {
        let total = self.total_seconds(now);
        let next = Self {
            version: self.version + 1,
            ..Self::idle(now)
        };
        (next, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 27, 8, 0, 0).unwrap()
    }

    #[test]
    fn doc_id_formats() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 27).unwrap();
        assert_eq!(
            timer_doc_id(&BindingTarget::daily("a", date)),
            "a__2025-06-27__N"
        );
        assert_eq!(
            timer_doc_id(&BindingTarget::tiered("a", date, 0)),
            "a__2025-06-27__L0"
        );
    }

    #[test]
    fn decodes_loose_documents() {
        let doc = TimerDocument::from_snapshot(Some(&json!({
            "state": "RUNNING",
            "accumulatedSec": "12",
            "startedAt": 1_751_011_200_000_i64,
            "version": null
        })))
        .unwrap();
        assert_eq!(doc.state, TimerState::Running);
        assert_eq!(doc.accumulated_sec, 12.0);
        assert_eq!(doc.started_at, Some(t0()));
        assert_eq!(doc.version, 0);

        let garbage = TimerDocument::from_snapshot(Some(&json!("nope"))).unwrap();
        assert_eq!(garbage.state, TimerState::Idle);
        assert_eq!(TimerDocument::from_snapshot(None), None);
    }

    #[test]
    fn pause_folds_running_period() {
        let running = TimerDocument::idle(t0()).claim_running(t0()).unwrap();
        assert_eq!(running.version, 1);
        assert!(running.claim_running(t0()).is_none());

        let paused = running.paused(t0() + Duration::milliseconds(30_900)).unwrap();
        assert_eq!(paused.state, TimerState::Paused);
        assert_eq!(paused.accumulated_sec, 30.0);
        assert_eq!(paused.started_at, None);
        assert!(paused.paused(t0()).is_none());

        let resumed = paused.claim_running(t0() + Duration::seconds(100)).unwrap();
        let (idle, total) = resumed.reset(t0() + Duration::seconds(115));
        assert_eq!(total, 45.0);
        assert_eq!(idle.state, TimerState::Idle);
        assert_eq!(idle.accumulated_sec, 0.0);
        assert_eq!(idle.version, resumed.version + 1);
    }

    #[test]
    fn started_at_serializes_as_null_when_cleared() {
        let value = serde_json::to_value(TimerDocument::idle(t0())).unwrap();
        assert_eq!(value["startedAt"], Value::Null);
        assert_eq!(value["state"], json!("idle"));
    }
}
