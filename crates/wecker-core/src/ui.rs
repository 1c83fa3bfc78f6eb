//! Navigation state machine.
//!
//! ```text
//!            Press                    Press(select)
//!   Clock ─────────▶ StationList ───────────────────▶ NowPlaying
//!     │ ▲  LongPress      │ LongPress                     │ LongPress(stop)
//!     │ └─────────────────┴───────◀───────────────────────┘
//!     │ LongPress
//!     ▼           Press(row)             Press(last field)
//!   Settings ──────────────▶ AlarmSetup ──────────────▶ Settings
//! ```
//!
//! The controller is the sole writer of the current screen. It never touches
//! hardware: playback and persistence leave as [`Command`]s for the host loop
//! to execute, and everything it knows about playback arrived as an event.

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::input::InputEvent;
use crate::model::{Alarm, AlarmTime, PlaybackState, Station, WEEKDAYS};
use crate::store::{AlarmStore, StationStore};

/// Everything the controller reacts to, already serialized into one stream.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Input(InputEvent),
    AlarmFired(u32),
    Tick,
    PlaybackChanged(PlaybackState),
    TitleChanged(Option<String>),
}

/// Side effects requested by the controller, executed by the host loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(u32),
    Stop,
    SetVolume(u8),
    PersistAlarms,
    PersistRuntime,
}

/// Field cursor inside the alarm editor, in edit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Hour,
    Minute,
    /// Index into [`WEEKDAYS`].
    Day(usize),
    Enabled,
    Station,
}

impl EditField {
    fn next(self) -> Option<EditField> {
        match self {
            EditField::Hour => Some(EditField::Minute),
            EditField::Minute => Some(EditField::Day(0)),
            EditField::Day(i) if i < 6 => Some(EditField::Day(i + 1)),
            EditField::Day(_) => Some(EditField::Enabled),
            EditField::Enabled => Some(EditField::Station),
            EditField::Station => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Clock,
    StationList {
        selected: usize,
    },
    NowPlaying,
    AlarmSetup {
        /// Id of the alarm being edited; `None` while creating a new one.
        existing: Option<u32>,
        draft: Alarm,
        field: EditField,
    },
    Settings {
        selected: usize,
    },
}

/// Read-only snapshot handed to the renderer each frame.
#[derive(Debug, Clone)]
pub struct RenderModel {
    pub screen: Screen,
    pub playback: PlaybackState,
    pub now: DateTime<Local>,
    pub stations: Vec<Station>,
    pub alarms: Vec<Alarm>,
    pub current_station: Option<u32>,
    pub title: Option<String>,
    pub volume: u8,
}

pub struct UiController {
    screen: Screen,
    playback: PlaybackState,
    title: Option<String>,
    volume: u8,
    volume_step: u8,
    /// Station playback is (or was last) pointed at. Survives stop so a
    /// press on the now-playing screen can resume.
    current_station: Option<u32>,
}

impl UiController {
    pub fn new(volume: u8, volume_step: u8, last_station: Option<u32>) -> Self {
        Self {
            screen: Screen::Clock,
            playback: PlaybackState::Stopped,
            title: None,
            volume: volume.min(100),
            volume_step: volume_step.max(1),
            current_station: last_station,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn current_station(&self) -> Option<u32> {
        self.current_station
    }

    /// Apply one event. Returns the side effects the host must carry out, in
    /// order. Undefined (screen, event) pairs are logged and do nothing.
    pub fn handle(
        &mut self,
        event: UiEvent,
        stations: &StationStore,
        alarms: &mut AlarmStore,
    ) -> Vec<Command> {
        match event {
            UiEvent::Tick => Vec::new(),
            UiEvent::PlaybackChanged(state) => {
                if let PlaybackState::Playing { station_id } = state {
                    self.current_station = Some(station_id);
                }
                self.playback = state;
                Vec::new()
            }
            UiEvent::TitleChanged(title) => {
                self.title = title;
                Vec::new()
            }
            UiEvent::AlarmFired(id) => self.on_alarm_fired(id, stations, alarms),
            UiEvent::Input(input) => {
                let screen = std::mem::replace(&mut self.screen, Screen::Clock);
                let (next, commands) = self.on_input(screen, input, stations, alarms);
                self.screen = next;
                commands
            }
        }
    }

    /// Build the frame snapshot. Pure: no commands, no state changes.
    pub fn render_model(
        &self,
        stations: &StationStore,
        alarms: &AlarmStore,
        now: DateTime<Local>,
    ) -> RenderModel {
        RenderModel {
            screen: self.screen.clone(),
            playback: self.playback.clone(),
            now,
            stations: stations.stations().to_vec(),
            alarms: alarms.alarms().to_vec(),
            current_station: self.current_station,
            title: self.title.clone(),
            volume: self.volume,
        }
    }

    // ── event handling ────────────────────────────────────────────────────────

    fn on_alarm_fired(
        &mut self,
        id: u32,
        stations: &StationStore,
        alarms: &mut AlarmStore,
    ) -> Vec<Command> {
        let Some(alarm) = alarms.get(id) else {
            warn!("alarm {id} fired but no longer exists");
            return Vec::new();
        };
        let station_id = alarm.station_id;
        if stations.get(station_id).is_none() {
            // Station deleted after the alarm was validated at load time.
            warn!("alarm {id} fired for missing station {station_id}; disabling");
            alarms.set_enabled(id, false);
            return vec![Command::PersistAlarms];
        }
        // Wake-up preempts whatever the user was doing, a half-edited alarm
        // draft included.
        self.current_station = Some(station_id);
        self.screen = Screen::NowPlaying;
        vec![Command::Play(station_id)]
    }

    fn on_input(
        &mut self,
        screen: Screen,
        input: InputEvent,
        stations: &StationStore,
        alarms: &mut AlarmStore,
    ) -> (Screen, Vec<Command>) {
        match screen {
            Screen::Clock => self.on_clock(input, stations),
            Screen::StationList { selected } => self.on_station_list(selected, input, stations),
            Screen::NowPlaying => self.on_now_playing(input, stations),
            Screen::Settings { selected } => self.on_settings(selected, input, stations, alarms),
            Screen::AlarmSetup {
                existing,
                draft,
                field,
            } => self.on_alarm_setup(existing, draft, field, input, stations, alarms),
        }
    }

    fn on_clock(&mut self, input: InputEvent, stations: &StationStore) -> (Screen, Vec<Command>) {
        match input {
            InputEvent::Press => {
                let selected = self
                    .current_station
                    .and_then(|id| stations.index_of(id))
                    .unwrap_or(0);
                (Screen::StationList { selected }, Vec::new())
            }
            InputEvent::LongPress => (Screen::Settings { selected: 0 }, Vec::new()),
            other => {
                debug!("no transition for {other:?} on clock screen");
                (Screen::Clock, Vec::new())
            }
        }
    }

    fn on_station_list(
        &mut self,
        selected: usize,
        input: InputEvent,
        stations: &StationStore,
    ) -> (Screen, Vec<Command>) {
        let len = stations.len();
        match input {
            InputEvent::RotateCw if len > 0 => (
                Screen::StationList {
                    selected: (selected + 1) % len,
                },
                Vec::new(),
            ),
            InputEvent::RotateCcw if len > 0 => (
                Screen::StationList {
                    selected: (selected + len - 1) % len,
                },
                Vec::new(),
            ),
            InputEvent::Press if len > 0 => {
                let station = &stations.stations()[selected.min(len - 1)];
                self.current_station = Some(station.id);
                (
                    Screen::NowPlaying,
                    vec![Command::Play(station.id), Command::PersistRuntime],
                )
            }
            InputEvent::LongPress => (Screen::Clock, Vec::new()),
            other => {
                debug!("no transition for {other:?} on station list ({len} stations)");
                (Screen::StationList { selected }, Vec::new())
            }
        }
    }

    fn on_now_playing(
        &mut self,
        input: InputEvent,
        stations: &StationStore,
    ) -> (Screen, Vec<Command>) {
        match input {
            InputEvent::Press => {
                if self.playback.is_active() {
                    (Screen::NowPlaying, vec![Command::Stop])
                } else {
                    match self.current_station.filter(|&id| stations.get(id).is_some()) {
                        Some(id) => (Screen::NowPlaying, vec![Command::Play(id)]),
                        None => {
                            debug!("press on now-playing with no station to resume");
                            (Screen::NowPlaying, Vec::new())
                        }
                    }
                }
            }
            InputEvent::LongPress => (Screen::Clock, vec![Command::Stop]),
            InputEvent::RotateCw => {
                self.volume = self.volume.saturating_add(self.volume_step).min(100);
                (
                    Screen::NowPlaying,
                    vec![Command::SetVolume(self.volume), Command::PersistRuntime],
                )
            }
            InputEvent::RotateCcw => {
                self.volume = self.volume.saturating_sub(self.volume_step);
                (
                    Screen::NowPlaying,
                    vec![Command::SetVolume(self.volume), Command::PersistRuntime],
                )
            }
        }
    }

    fn on_settings(
        &mut self,
        selected: usize,
        input: InputEvent,
        stations: &StationStore,
        alarms: &mut AlarmStore,
    ) -> (Screen, Vec<Command>) {
        // Rows: one per alarm, then "add alarm", then "back".
        let rows = alarms.len() + 2;
        match input {
            InputEvent::RotateCw => (
                Screen::Settings {
                    selected: (selected + 1) % rows,
                },
                Vec::new(),
            ),
            InputEvent::RotateCcw => (
                Screen::Settings {
                    selected: (selected + rows - 1) % rows,
                },
                Vec::new(),
            ),
            InputEvent::Press => {
                if selected < alarms.len() {
                    let alarm = alarms.alarms()[selected].clone();
                    (
                        Screen::AlarmSetup {
                            existing: Some(alarm.id),
                            draft: alarm,
                            field: EditField::Hour,
                        },
                        Vec::new(),
                    )
                } else if selected == alarms.len() {
                    (
                        Screen::AlarmSetup {
                            existing: None,
                            draft: self.new_draft(stations),
                            field: EditField::Hour,
                        },
                        Vec::new(),
                    )
                } else {
                    (Screen::Clock, Vec::new())
                }
            }
            InputEvent::LongPress => {
                if selected < alarms.len() {
                    let id = alarms.alarms()[selected].id;
                    alarms.delete(id);
                    let rows = alarms.len() + 2;
                    (
                        Screen::Settings {
                            selected: selected.min(rows - 1),
                        },
                        vec![Command::PersistAlarms],
                    )
                } else {
                    (Screen::Clock, Vec::new())
                }
            }
        }
    }

    fn on_alarm_setup(
        &mut self,
        existing: Option<u32>,
        mut draft: Alarm,
        field: EditField,
        input: InputEvent,
        stations: &StationStore,
        alarms: &mut AlarmStore,
    ) -> (Screen, Vec<Command>) {
        match input {
            InputEvent::RotateCw | InputEvent::RotateCcw => {
                let up = input == InputEvent::RotateCw;
                adjust_field(&mut draft, field, up, stations);
                (
                    Screen::AlarmSetup {
                        existing,
                        draft,
                        field,
                    },
                    Vec::new(),
                )
            }
            InputEvent::Press => match field.next() {
                Some(next) => (
                    Screen::AlarmSetup {
                        existing,
                        draft,
                        field: next,
                    },
                    Vec::new(),
                ),
                None => {
                    if stations.get(draft.station_id).is_none() {
                        warn!(
                            "alarm {} committed with missing station {}; storing disabled",
                            draft.id, draft.station_id
                        );
                        draft.enabled = false;
                    }
                    let id = alarms.upsert(draft);
                    let selected = alarms
                        .alarms()
                        .iter()
                        .position(|a| a.id == id)
                        .unwrap_or(0);
                    (
                        Screen::Settings { selected },
                        vec![Command::PersistAlarms],
                    )
                }
            },
            InputEvent::LongPress => {
                // Abandon the edit; nothing was written yet.
                (Screen::Settings { selected: 0 }, Vec::new())
            }
        }
    }

    fn new_draft(&self, stations: &StationStore) -> Alarm {
        let station_id = self
            .current_station
            .filter(|&id| stations.get(id).is_some())
            .or_else(|| stations.stations().first().map(|s| s.id))
            .unwrap_or(0);
        Alarm {
            id: 0,
            time: AlarmTime::new(7, 0),
            enabled: true,
            repeat_days: WEEKDAYS.to_vec(),
            station_id,
        }
    }
}

fn adjust_field(draft: &mut Alarm, field: EditField, up: bool, stations: &StationStore) {
    match field {
        EditField::Hour => {
            let step = if up { 1 } else { 23 };
            draft.time.hour = ((u32::from(draft.time.hour) + step) % 24) as u8;
        }
        EditField::Minute => {
            let step = if up { 1 } else { 59 };
            draft.time.minute = ((u32::from(draft.time.minute) + step) % 60) as u8;
        }
        EditField::Day(i) => {
            let day = WEEKDAYS[i];
            if let Some(pos) = draft.repeat_days.iter().position(|&d| d == day) {
                draft.repeat_days.remove(pos);
            } else {
                draft.repeat_days.push(day);
                draft
                    .repeat_days
                    .sort_by_key(|d| d.num_days_from_monday());
            }
        }
        EditField::Enabled => draft.enabled = !draft.enabled,
        EditField::Station => {
            let len = stations.len();
            if len == 0 {
                return;
            }
            let idx = stations.index_of(draft.station_id).unwrap_or(0);
            let next = if up { (idx + 1) % len } else { (idx + len - 1) % len };
            draft.station_id = stations.stations()[next].id;
        }
    }
}
