//! Wall-clock alarm firing.
//!
//! The scheduler never sleeps or schedules ahead: it is handed the current
//! time once per tick and answers "which alarms go off right now". A stalled
//! process therefore skips occurrences instead of firing them late.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::collections::HashSet;
use tracing::info;

use crate::model::Alarm;
use crate::store::AlarmStore;

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Alarms that fire on this tick, in store order.
    pub fired: Vec<u32>,
    /// True when the scan disabled a one-shot alarm and the store needs
    /// persisting.
    pub store_changed: bool,
}

pub struct AlarmScheduler {
    /// Alarms already fired during `minute`; re-armed when the minute
    /// advances, so jittered ticks inside one minute cannot double-fire.
    fired: HashSet<u32>,
    minute: Option<(NaiveDate, u32, u32)>,
}

impl AlarmScheduler {
    pub fn new() -> Self {
        Self {
            fired: HashSet::new(),
            minute: None,
        }
    }

    /// Scan enabled alarms against the current local time. One-shot alarms
    /// (empty repeat set) are disabled in the store after firing.
    pub fn check(&mut self, store: &mut AlarmStore, now: NaiveDateTime) -> ScanResult {
        let key = (now.date(), now.hour(), now.minute());
        if self.minute != Some(key) {
            self.minute = Some(key);
            self.fired.clear();
        }

        let mut result = ScanResult::default();
        let weekday = now.weekday();
        for alarm in store.alarms() {
            if !alarm.enabled
                || u32::from(alarm.time.hour) != now.hour()
                || u32::from(alarm.time.minute) != now.minute()
                || !alarm.repeats_on(weekday)
                || self.fired.contains(&alarm.id)
            {
                continue;
            }
            result.fired.push(alarm.id);
        }

        for &id in &result.fired {
            self.fired.insert(id);
            let one_shot = store.get(id).map(|a| a.repeat_days.is_empty()) == Some(true);
            if one_shot {
                store.set_enabled(id, false);
                result.store_changed = true;
            }
            info!("alarm {id} fired at {now}");
        }
        result
    }
}

impl Default for AlarmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Soonest upcoming occurrence over the next week: `(when, alarm id)`.
/// Shown on the clock screen's bottom line.
pub fn next_occurrence(alarms: &[Alarm], now: NaiveDateTime) -> Option<(NaiveDateTime, u32)> {
    let mut best: Option<(NaiveDateTime, u32)> = None;
    for alarm in alarms.iter().filter(|a| a.enabled) {
        for day_offset in 0..=7i64 {
            let date = now.date() + chrono::Duration::days(day_offset);
            if !alarm.repeats_on(date.weekday()) {
                continue;
            }
            let Some(at) = date.and_hms_opt(
                u32::from(alarm.time.hour),
                u32::from(alarm.time.minute),
                0,
            ) else {
                continue;
            };
            if at <= now {
                continue;
            }
            if best.map(|(b, _)| at < b).unwrap_or(true) {
                best = Some((at, alarm.id));
            }
            break;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlarmTime;
    use crate::store::StationStore;
    use chrono::Weekday;

    fn stations() -> StationStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.toml");
        std::fs::write(
            &path,
            "[[station]]\nid = 1\nname = \"one\"\nurl = \"http://example.net/1\"\n",
        )
        .unwrap();
        StationStore::load(&path)
    }

    fn store_with(alarms: Vec<Alarm>) -> AlarmStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarms.toml");
        let stations = stations();
        let mut store = AlarmStore::load(&path, &stations);
        for alarm in alarms {
            store.upsert(alarm);
        }
        store
    }

    fn weekday_alarm(id: u32, hour: u8, minute: u8, days: Vec<Weekday>) -> Alarm {
        Alarm {
            id,
            time: AlarmTime::new(hour, minute),
            enabled: true,
            repeat_days: days,
            station_id: 1,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    // 2026-08-17 is a Monday.

    #[test]
    fn fires_once_per_matching_minute_despite_jitter() {
        let mut store = store_with(vec![weekday_alarm(1, 7, 0, vec![Weekday::Mon])]);
        let mut sched = AlarmScheduler::new();

        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 6, 59, 59)).fired, Vec::<u32>::new());
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 0, 0)).fired, vec![1]);
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 0, 7)).fired, Vec::<u32>::new());
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 0, 59)).fired, Vec::<u32>::new());
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 1, 0)).fired, Vec::<u32>::new());
    }

    #[test]
    fn skips_non_matching_weekday_then_fires_next_match() {
        let mut store = store_with(vec![weekday_alarm(1, 7, 0, vec![Weekday::Tue])]);
        let mut sched = AlarmScheduler::new();

        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 0, 0)).fired, Vec::<u32>::new());
        assert_eq!(sched.check(&mut store, at(2026, 8, 18, 7, 0, 30)).fired, vec![1]);
    }

    #[test]
    fn stalled_minute_is_skipped_not_queued() {
        let mut store = store_with(vec![weekday_alarm(1, 7, 0, vec![Weekday::Mon])]);
        let mut sched = AlarmScheduler::new();

        // Process stalled through the whole 07:00 minute.
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 6, 59, 0)).fired, Vec::<u32>::new());
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 2, 11)).fired, Vec::<u32>::new());
    }

    #[test]
    fn one_shot_fires_any_day_then_disables() {
        let mut store = store_with(vec![weekday_alarm(1, 7, 0, vec![])]);
        let mut sched = AlarmScheduler::new();

        let result = sched.check(&mut store, at(2026, 8, 17, 7, 0, 3));
        assert_eq!(result.fired, vec![1]);
        assert!(result.store_changed);
        assert!(!store.get(1).unwrap().enabled);

        // Next week, same time: stays quiet.
        assert_eq!(sched.check(&mut store, at(2026, 8, 24, 7, 0, 3)).fired, Vec::<u32>::new());
    }

    #[test]
    fn disabled_alarm_never_fires() {
        let mut alarm = weekday_alarm(1, 7, 0, vec![Weekday::Mon]);
        alarm.enabled = false;
        let mut store = store_with(vec![alarm]);
        let mut sched = AlarmScheduler::new();
        assert_eq!(sched.check(&mut store, at(2026, 8, 17, 7, 0, 0)).fired, Vec::<u32>::new());
    }

    #[test]
    fn two_alarms_same_minute_both_fire() {
        let mut store = store_with(vec![
            weekday_alarm(1, 7, 0, vec![Weekday::Mon]),
            weekday_alarm(2, 7, 0, vec![Weekday::Mon]),
        ]);
        let mut sched = AlarmScheduler::new();
        assert_eq!(
            sched.check(&mut store, at(2026, 8, 17, 7, 0, 0)).fired,
            vec![1, 2]
        );
    }

    #[test]
    fn next_occurrence_prefers_soonest_enabled() {
        let alarms = vec![
            weekday_alarm(1, 7, 0, vec![Weekday::Mon]),
            weekday_alarm(2, 22, 30, vec![Weekday::Mon]),
        ];
        let now = at(2026, 8, 17, 8, 0, 0);
        let (when, id) = next_occurrence(&alarms, now).unwrap();
        assert_eq!(id, 2);
        assert_eq!(when, at(2026, 8, 17, 22, 30, 0));

        // After the evening alarm, the morning one next Monday is up.
        let later = at(2026, 8, 17, 23, 0, 0);
        let (when, id) = next_occurrence(&alarms, later).unwrap();
        assert_eq!(id, 1);
        assert_eq!(when, at(2026, 8, 24, 7, 0, 0));
    }

    #[test]
    fn next_occurrence_ignores_disabled() {
        let mut alarm = weekday_alarm(1, 7, 0, vec![Weekday::Mon]);
        alarm.enabled = false;
        assert_eq!(next_occurrence(&[alarm], at(2026, 8, 17, 6, 0, 0)), None);
    }
}
