//! Hardware access: evdev input readers, the framebuffer display, and the
//! external player process.
//!
//! Everything here is the thin edge of the system. Input devices produce
//! [`RawEdge`]s on a channel, the display swallows finished [`Frame`]s, and
//! the player is an ordinary child process fed audio bytes on stdin. All
//! decisions live elsewhere.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wecker_core::config::{AudioConfig, InputConfig};
use wecker_core::input::{Line, RawEdge};
use wecker_core::render::Frame;

// ── evdev input ───────────────────────────────────────────────────────────────

const EV_KEY: u16 = 1;
/// Autorepeat value on key events; the decoder only wants real edges.
const KEY_AUTOREPEAT: i32 = 2;
/// `struct input_event` on a 64-bit kernel: two 64-bit timeval words, then
/// type, code, value.
const INPUT_EVENT_SIZE: usize = 24;

/// One decoded `struct input_event` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EvdevEvent {
    at_ms: u64,
    kind: u16,
    code: u16,
    value: i32,
}

impl EvdevEvent {
    fn parse(raw: &[u8; INPUT_EVENT_SIZE]) -> Self {
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&raw[0..8]);
        let mut micros = [0u8; 8];
        micros.copy_from_slice(&raw[8..16]);
        let secs = i64::from_ne_bytes(secs).max(0) as u64;
        let micros = i64::from_ne_bytes(micros).max(0) as u64;
        Self {
            at_ms: secs * 1_000 + micros / 1_000,
            kind: u16::from_ne_bytes([raw[16], raw[17]]),
            code: u16::from_ne_bytes([raw[18], raw[19]]),
            value: i32::from_ne_bytes([raw[20], raw[21], raw[22], raw[23]]),
        }
    }
}

/// Maps gpio-keys keycodes to logical input lines. The codes must match the
/// device-tree overlay that exposes the encoder pins and the button as keys.
#[derive(Debug, Clone, Copy)]
pub struct KeyMap {
    encoder_a: u16,
    encoder_b: u16,
    button: u16,
}

impl KeyMap {
    pub fn from_config(config: &InputConfig) -> Self {
        Self {
            encoder_a: config.encoder_a_keycode,
            encoder_b: config.encoder_b_keycode,
            button: config.button_keycode,
        }
    }

    fn line_for(&self, code: u16) -> Option<Line> {
        if code == self.encoder_a {
            Some(Line::EncoderA)
        } else if code == self.encoder_b {
            Some(Line::EncoderB)
        } else if code == self.button {
            Some(Line::Button)
        } else {
            None
        }
    }
}

/// Spawn blocking readers for the configured input devices. Edges arrive on
/// `tx` stamped with the kernel's event time; both devices share one channel
/// (and one reader, if they are the same device node).
pub fn start_input(config: &InputConfig, tx: mpsc::Sender<RawEdge>) {
    let map = KeyMap::from_config(config);
    spawn_reader(config.encoder_device.clone(), map, tx.clone());
    if config.button_device != config.encoder_device {
        spawn_reader(config.button_device.clone(), map, tx);
    }
}

fn spawn_reader(device: PathBuf, map: KeyMap, tx: mpsc::Sender<RawEdge>) {
    tokio::task::spawn_blocking(move || {
        let mut announced_missing = false;
        loop {
            let mut file = match std::fs::File::open(&device) {
                Ok(file) => file,
                Err(e) => {
                    if !announced_missing {
                        warn!("input device {} unavailable: {e}; retrying", device.display());
                        announced_missing = true;
                    }
                    std::thread::sleep(std::time::Duration::from_secs(2));
                    continue;
                }
            };
            announced_missing = false;
            info!("reading input events from {}", device.display());

            let mut raw = [0u8; INPUT_EVENT_SIZE];
            loop {
                if let Err(e) = file.read_exact(&mut raw) {
                    warn!("input device {} read failed: {e}; reopening", device.display());
                    break;
                }
                let event = EvdevEvent::parse(&raw);
                if event.kind != EV_KEY || event.value == KEY_AUTOREPEAT {
                    continue;
                }
                let Some(line) = map.line_for(event.code) else {
                    continue;
                };
                let edge = RawEdge {
                    line,
                    level: event.value != 0,
                    at_ms: event.at_ms,
                };
                if tx.blocking_send(edge).is_err() {
                    // Consumer gone, daemon is shutting down.
                    return;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    });
}

/// Milliseconds since the epoch, on the same clock evdev stamps events with.
pub fn wall_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── display ───────────────────────────────────────────────────────────────────

/// Sink for finished frames, writing the raw 1-bpp buffer to a
/// framebuffer-style character device. The device is opened lazily and
/// reopened after a failed write, so a display that appears late or drops out
/// cannot keep the daemon down.
pub struct FbDisplay {
    device: PathBuf,
    file: Option<std::fs::File>,
    healthy: bool,
}

impl FbDisplay {
    pub fn new(device: &Path) -> Self {
        Self {
            device: device.to_path_buf(),
            file: None,
            healthy: true,
        }
    }

    /// Write one frame. Failures are logged once per outage, not once per
    /// frame; flush runs at frame rate.
    pub fn flush(&mut self, frame: &Frame) {
        match self.try_flush(frame) {
            Ok(()) => {
                if !self.healthy {
                    info!("display {} recovered", self.device.display());
                    self.healthy = true;
                }
            }
            Err(e) => {
                self.file = None;
                if self.healthy {
                    warn!("display {} write failed: {e}", self.device.display());
                    self.healthy = false;
                }
            }
        }
    }

    fn try_flush(&mut self, frame: &Frame) -> std::io::Result<()> {
        if self.file.is_none() {
            self.file = Some(std::fs::OpenOptions::new().write(true).open(&self.device)?);
        }
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(frame.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }
}

// ── player process ────────────────────────────────────────────────────────────

/// External audio player consuming raw stream bytes on stdin.
///
/// The appended flags follow mpv's command line: `--volume=N` always, plus
/// `--input-ipc-server=PATH` when `audio.ipc_socket` is set. A different
/// player needs a `player_command` override that accepts the same flags, or
/// an unset `ipc_socket`.
pub struct Player {
    child: Child,
    stdin: ChildStdin,
}

impl Player {
    /// Spawn the configured player. Audio goes to stdin; the player's own
    /// stdout/stderr are discarded.
    pub async fn spawn(audio: &AudioConfig, volume: u8) -> anyhow::Result<Self> {
        let (program, args) = audio
            .player_command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("audio.player_command is empty"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(format!("--volume={}", volume.min(100)));
        if let Some(socket) = &audio.ipc_socket {
            let _ = tokio::fs::remove_file(socket).await;
            command.arg(format!("--input-ipc-server={}", socket.display()));
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("player stdin not piped"))?;
        info!("player spawned: {program}");
        Ok(Self { child, stdin })
    }

    /// Write one chunk of audio. Waits while the player's pipe is full, which
    /// is the backpressure that keeps stream buffering bounded.
    pub async fn feed(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(chunk).await
    }

    pub async fn shutdown(self) {
        let Self { mut child, stdin } = self;
        drop(stdin);
        if let Err(e) = child.kill().await {
            debug!("player kill: {e}");
        }
    }
}

/// Best-effort live volume change over the player's IPC socket. Failures are
/// logged at debug and otherwise ignored; the volume passed at spawn still
/// applies to the next player.
pub async fn set_player_volume(audio: &AudioConfig, volume: u8) {
    let Some(socket) = &audio.ipc_socket else {
        debug!("no player ipc socket configured; volume applies on next start");
        return;
    };
    match send_ipc_line(socket, &volume_command(volume)).await {
        Ok(()) => debug!("player volume set to {volume}"),
        Err(e) => debug!("player volume change failed: {e}"),
    }
}

fn volume_command(volume: u8) -> String {
    let mut line = serde_json::json!({
        "command": ["set_property", "volume", volume.min(100)]
    })
    .to_string();
    line.push('\n');
    line
}

async fn send_ipc_line(socket: &Path, line: &str) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(socket).await?;
    stream.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_event(secs: i64, micros: i64, kind: u16, code: u16, value: i32) -> [u8; 24] {
        let mut raw = [0u8; 24];
        raw[0..8].copy_from_slice(&secs.to_ne_bytes());
        raw[8..16].copy_from_slice(&micros.to_ne_bytes());
        raw[16..18].copy_from_slice(&kind.to_ne_bytes());
        raw[18..20].copy_from_slice(&code.to_ne_bytes());
        raw[20..24].copy_from_slice(&value.to_ne_bytes());
        raw
    }

    #[test]
    fn evdev_record_parses_fields_and_timestamp() {
        let raw = raw_event(2, 500_000, EV_KEY, 30, 1);
        let event = EvdevEvent::parse(&raw);
        assert_eq!(
            event,
            EvdevEvent {
                at_ms: 2_500,
                kind: EV_KEY,
                code: 30,
                value: 1,
            }
        );
    }

    #[test]
    fn keymap_routes_configured_codes_only() {
        let map = KeyMap::from_config(&InputConfig::default());
        assert_eq!(map.line_for(30), Some(Line::EncoderA));
        assert_eq!(map.line_for(48), Some(Line::EncoderB));
        assert_eq!(map.line_for(28), Some(Line::Button));
        assert_eq!(map.line_for(99), None);
    }

    #[test]
    fn volume_command_is_one_json_line() {
        let line = volume_command(60);
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["command"][0], "set_property");
        assert_eq!(value["command"][1], "volume");
        assert_eq!(value["command"][2], 60);
    }

    #[test]
    fn volume_command_clamps_to_100() {
        let value: serde_json::Value =
            serde_json::from_str(volume_command(250).trim()).unwrap();
        assert_eq!(value["command"][2], 100);
    }
}
