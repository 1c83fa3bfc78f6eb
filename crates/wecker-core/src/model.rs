use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// All weekdays in display order (Monday first, like the day strip on the
/// alarm screen).
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: u32,
    pub display_name: String,
    pub stream_url: String,
}

/// Wall-clock time an alarm goes off, local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTime {
    pub hour: u8,
    pub minute: u8,
}

impl AlarmTime {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: u32,
    pub time: AlarmTime,
    pub enabled: bool,
    /// Days this alarm repeats on. Empty means one-shot: it fires on the next
    /// matching time regardless of weekday and is disabled after firing.
    #[serde(with = "weekday_names", default)]
    pub repeat_days: Vec<Weekday>,
    pub station_id: u32,
}

impl Alarm {
    pub fn repeats_on(&self, day: Weekday) -> bool {
        self.repeat_days.is_empty() || self.repeat_days.contains(&day)
    }
}

/// Playback state machine, owned by the engine.
///
/// ```text
/// Stopped ──play──▶ Connecting ──prebuffered──▶ Playing
///    ▲                  │  ▲                       │
///    │                  ▼  └──retry (backoff)──┐   ▼
///    └──stop── any    Error ◀──────────────────┴─ failure
/// ```
///
/// `Error` retries with capped exponential backoff; once the consecutive
/// attempt limit is exhausted it stays put until the user acts.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Stopped,
    Connecting {
        since: DateTime<Utc>,
    },
    Playing {
        station_id: u32,
    },
    Error {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing { .. } | PlaybackState::Connecting { .. }
        )
    }
}

/// Serialize weekdays as lowercase three-letter names so the alarm file stays
/// hand-editable (`repeat_days = ["mon", "tue", "fri"]`).
mod weekday_names {
    use chrono::Weekday;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

    pub fn serialize<S: Serializer>(days: &[Weekday], ser: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = days
            .iter()
            .map(|d| NAMES[d.num_days_from_monday() as usize])
            .collect();
        ser.collect_seq(names)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Weekday>, D::Error> {
        let names: Vec<String> = Vec::deserialize(de)?;
        names
            .iter()
            .map(|n| {
                NAMES
                    .iter()
                    .position(|k| k == &n.as_str())
                    .map(|i| super::WEEKDAYS[i])
                    .ok_or_else(|| D::Error::custom(format!("unknown weekday {n:?}")))
            })
            .collect()
    }
}
