use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::model::{Alarm, Station};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("store serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("state serialize: {0}")]
    Json(#[from] serde_json::Error),
}

// ── station store ─────────────────────────────────────────────────────────────

/// Intermediate struct matching the TOML `[[station]]` table. Kept separate
/// from `Station` so the file schema can diverge from the in-memory type
/// without breaking either.
#[derive(Debug, Serialize, Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TomlStation {
    id: u32,
    name: String,
    url: String,
}

pub struct StationStore {
    path: PathBuf,
    stations: Vec<Station>,
}

impl StationStore {
    /// Load the station file, falling back to an empty store if it is missing
    /// or unreadable. The appliance must come up even with a damaged card.
    pub fn load(path: &Path) -> Self {
        let stations = match std::fs::read_to_string(path) {
            Ok(content) => match parse_stations(&content) {
                Ok(stations) => stations,
                Err(e) => {
                    warn!("station file {} unparseable: {e}; starting empty", path.display());
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("station file {} unreadable: {e}; starting empty", path.display());
                Vec::new()
            }
        };
        info!("loaded {} stations", stations.len());
        Self {
            path: path.to_path_buf(),
            stations,
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.stations.iter().position(|s| s.id == id)
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let file = TomlStationFile {
            station: self
                .stations
                .iter()
                .map(|s| TomlStation {
                    id: s.id,
                    name: s.display_name.clone(),
                    url: s.stream_url.clone(),
                })
                .collect(),
        };
        write_atomic(&self.path, &toml::to_string_pretty(&file)?)
    }
}

fn parse_stations(content: &str) -> Result<Vec<Station>, StoreError> {
    let file: TomlStationFile = toml::from_str(content)?;
    Ok(file
        .station
        .into_iter()
        .map(|s| Station {
            id: s.id,
            display_name: s.name,
            stream_url: s.url,
        })
        .collect())
}

// ── alarm store ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct TomlAlarmFile {
    #[serde(default)]
    alarm: Vec<Alarm>,
}

pub struct AlarmStore {
    path: PathBuf,
    alarms: Vec<Alarm>,
}

impl AlarmStore {
    /// Load alarms and validate station references: an alarm pointing at a
    /// station that no longer exists is disabled, not dropped, so the user
    /// can re-point it from the settings screen.
    pub fn load(path: &Path, stations: &StationStore) -> Self {
        let mut alarms = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<TomlAlarmFile>(&content) {
                Ok(file) => file.alarm,
                Err(e) => {
                    warn!("alarm file {} unparseable: {e}; starting empty", path.display());
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("alarm file {} unreadable: {e}; starting empty", path.display());
                Vec::new()
            }
        };

        for alarm in &mut alarms {
            if alarm.enabled && stations.get(alarm.station_id).is_none() {
                warn!(
                    "alarm {} references missing station {}; disabling",
                    alarm.id, alarm.station_id
                );
                alarm.enabled = false;
            }
        }

        info!("loaded {} alarms", alarms.len());
        Self {
            path: path.to_path_buf(),
            alarms,
        }
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.id == id)
    }

    pub fn next_id(&self) -> u32 {
        self.alarms.iter().map(|a| a.id).max().unwrap_or(0) + 1
    }

    /// Insert or replace by id. A zero id means "new"; it is assigned the
    /// next free id. Returns the id actually stored.
    pub fn upsert(&mut self, mut alarm: Alarm) -> u32 {
        if alarm.id == 0 {
            alarm.id = self.next_id();
        }
        let id = alarm.id;
        match self.alarms.iter_mut().find(|a| a.id == id) {
            Some(slot) => *slot = alarm,
            None => self.alarms.push(alarm),
        }
        id
    }

    pub fn delete(&mut self, id: u32) -> bool {
        let before = self.alarms.len();
        self.alarms.retain(|a| a.id != id);
        self.alarms.len() != before
    }

    pub fn set_enabled(&mut self, id: u32, enabled: bool) -> bool {
        match self.alarms.iter_mut().find(|a| a.id == id) {
            Some(alarm) => {
                alarm.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Serialized file content for the current alarms, for callers that hand
    /// the actual disk write to someone else.
    pub fn to_toml(&self) -> Result<String, StoreError> {
        let file = TomlAlarmFile {
            alarm: self.alarms.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_atomic(&self.path, &self.to_toml()?)
    }
}

// ── runtime state ─────────────────────────────────────────────────────────────

/// Small JSON blob surviving restarts: volume and the station the user last
/// listened to. Restored at startup to pre-select that station; playback is
/// never auto-resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub last_station_id: Option<u32>,
    pub volume: u8,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            last_station_id: None,
            volume: 50,
        }
    }
}

impl RuntimeState {
    pub fn load(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(state) = serde_json::from_str::<RuntimeState>(&content) {
                return state;
            }
        }
        Self::default()
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_atomic(path, &self.to_json()?)
    }
}

/// Write via a temp file and rename so a power cut mid-write cannot leave a
/// truncated store behind.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
