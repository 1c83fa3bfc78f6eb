//! Playback: connect to the station, strip the ICY interleave, prebuffer,
//! then keep the player process fed, reporting progress to the event loop.
//!
//! Split in two layers so the retry policy is testable without a network:
//! [`EngineLogic`] is a pure state machine deciding what should happen next,
//! [`PlaybackEngine`] executes its decisions with tokio tasks. Every stream
//! task is tagged with a generation number; user actions bump the generation,
//! which turns reports from superseded tasks into recognisable stale noise.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wecker_core::config::{AudioConfig, PlaybackConfig};
use wecker_core::model::{PlaybackState, Station};

use crate::core::AppEvent;
use crate::hal::{self, Player};
use crate::icy;

// ── events and actions ────────────────────────────────────────────────────────

/// Progress reports from a stream task, tagged with the generation that
/// spawned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Enough audio is buffered; the player is running.
    Prebuffered { generation: u64 },
    /// The ICY title changed.
    Title { generation: u64, title: String },
    /// The task is done: clean end of stream (`None`) or a failure.
    Ended {
        generation: u64,
        error: Option<String>,
    },
}

/// What the shell must do after a logic step.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Cancel,
    Start { generation: u64, station: Station },
    ScheduleRetry { generation: u64, delay_ms: u64 },
}

// ── pure logic ────────────────────────────────────────────────────────────────

/// Decides transitions of the playback state machine. Holds no I/O; time
/// comes in as arguments and side effects leave as [`Action`]s.
struct EngineLogic {
    state: PlaybackState,
    station: Option<Station>,
    attempts: u32,
    generation: u64,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    max_attempts: u32,
}

impl EngineLogic {
    fn new(playback: &PlaybackConfig) -> Self {
        Self {
            state: PlaybackState::Stopped,
            station: None,
            attempts: 0,
            generation: 0,
            backoff_base_ms: playback.backoff_base_ms,
            backoff_cap_ms: playback.backoff_cap_ms,
            max_attempts: playback.max_attempts.max(1),
        }
    }

    fn state(&self) -> &PlaybackState {
        &self.state
    }

    fn on_play(&mut self, station: &Station, now: DateTime<Utc>) -> Vec<Action> {
        if self.state.is_active() && self.station.as_ref().map(|s| s.id) == Some(station.id) {
            debug!("play {}: already active", station.id);
            return Vec::new();
        }
        self.generation += 1;
        self.attempts = 0;
        self.station = Some(station.clone());
        self.state = PlaybackState::Connecting { since: now };
        vec![
            Action::Cancel,
            Action::Start {
                generation: self.generation,
                station: station.clone(),
            },
        ]
    }

    fn on_stop(&mut self) -> Vec<Action> {
        self.generation += 1;
        self.attempts = 0;
        self.state = PlaybackState::Stopped;
        vec![Action::Cancel]
    }

    fn on_prebuffered(&mut self, generation: u64) -> Vec<Action> {
        if generation != self.generation {
            debug!("stale prebuffer report (generation {generation})");
            return Vec::new();
        }
        let Some(station) = &self.station else {
            return Vec::new();
        };
        self.attempts = 0;
        self.state = PlaybackState::Playing {
            station_id: station.id,
        };
        Vec::new()
    }

    fn on_ended(
        &mut self,
        generation: u64,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Action> {
        if generation != self.generation {
            debug!("stale stream end (generation {generation})");
            return Vec::new();
        }
        self.attempts += 1;
        let reason = error.unwrap_or_else(|| "stream ended".to_string());
        self.state = PlaybackState::Error { reason, since: now };
        if self.attempts >= self.max_attempts {
            warn!("giving up after {} failed attempts", self.attempts);
            return Vec::new();
        }
        vec![Action::ScheduleRetry {
            generation: self.generation,
            delay_ms: self.backoff_ms(),
        }]
    }

    fn on_retry_due(&mut self, generation: u64, now: DateTime<Utc>) -> Vec<Action> {
        if generation != self.generation {
            debug!("stale retry timer (generation {generation})");
            return Vec::new();
        }
        if !matches!(self.state, PlaybackState::Error { .. }) {
            return Vec::new();
        }
        let Some(station) = self.station.clone() else {
            return Vec::new();
        };
        self.state = PlaybackState::Connecting { since: now };
        vec![Action::Start {
            generation: self.generation,
            station,
        }]
    }

    /// Doubling delay for the next reconnect, counted from the first failure
    /// of the current run. `attempts` is at least 1 when this is consulted.
    fn backoff_ms(&self) -> u64 {
        let exp = self.attempts.saturating_sub(1).min(16);
        self.backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms)
    }
}

// ── shell ─────────────────────────────────────────────────────────────────────

pub struct PlaybackEngine {
    logic: EngineLogic,
    client: reqwest::Client,
    audio: AudioConfig,
    playback: PlaybackConfig,
    volume: u8,
    events: mpsc::Sender<AppEvent>,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(
        playback: PlaybackConfig,
        audio: AudioConfig,
        volume: u8,
        events: mpsc::Sender<AppEvent>,
    ) -> anyhow::Result<Self> {
        // Send the ICY metadata request header on every connect; redirects
        // are common for Icecast mounts.
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Icy-MetaData",
            reqwest::header::HeaderValue::from_static("1"),
        );
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(playback.connect_timeout_secs))
            .build()?;

        Ok(Self {
            logic: EngineLogic::new(&playback),
            client,
            audio,
            playback,
            volume: volume.min(100),
            events,
            cancel: None,
            task: None,
        })
    }

    /// True when `generation` belongs to the stream task currently wanted.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.logic.generation
    }

    pub async fn play(&mut self, station: &Station) -> Option<PlaybackState> {
        let before = self.logic.state().clone();
        let actions = self.logic.on_play(station, Utc::now());
        self.execute(actions).await;
        self.changed(before)
    }

    pub async fn stop(&mut self) -> Option<PlaybackState> {
        let before = self.logic.state().clone();
        let actions = self.logic.on_stop();
        self.execute(actions).await;
        self.changed(before)
    }

    /// Remember the volume for future player spawns and push it to the live
    /// player, if one is reachable.
    pub async fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        hal::set_player_volume(&self.audio, self.volume).await;
    }

    pub async fn on_stream_event(&mut self, event: StreamEvent) -> Option<PlaybackState> {
        let before = self.logic.state().clone();
        let actions = match event {
            StreamEvent::Prebuffered { generation } => self.logic.on_prebuffered(generation),
            StreamEvent::Ended { generation, error } => {
                self.logic.on_ended(generation, error, Utc::now())
            }
            // Titles are routed by the event loop, not the state machine.
            StreamEvent::Title { .. } => Vec::new(),
        };
        self.execute(actions).await;
        self.changed(before)
    }

    pub async fn on_retry_due(&mut self, generation: u64) -> Option<PlaybackState> {
        let before = self.logic.state().clone();
        let actions = self.logic.on_retry_due(generation, Utc::now());
        self.execute(actions).await;
        self.changed(before)
    }

    fn changed(&self, before: PlaybackState) -> Option<PlaybackState> {
        let state = self.logic.state();
        (*state != before).then(|| state.clone())
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Cancel => self.cancel_task().await,
                Action::Start {
                    generation,
                    station,
                } => self.start_task(generation, station),
                Action::ScheduleRetry {
                    generation,
                    delay_ms,
                } => {
                    debug!("retrying in {delay_ms}ms (generation {generation})");
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        let _ = events.send(AppEvent::RetryDue { generation }).await;
                    });
                }
            }
        }
    }

    async fn cancel_task(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                warn!("stream task ignored cancel; aborting");
                task.abort();
            }
        }
    }

    fn start_task(&mut self, generation: u64, station: Station) {
        info!(
            "connecting to station {} ({})",
            station.id, station.display_name
        );
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel = Some(cancel_tx);
        let ctx = StreamContext {
            client: self.client.clone(),
            audio: self.audio.clone(),
            playback: self.playback.clone(),
            events: self.events.clone(),
            generation,
            url: station.stream_url,
            volume: self.volume,
        };
        self.task = Some(tokio::spawn(stream_task(ctx, cancel_rx)));
    }
}

// ── stream task ───────────────────────────────────────────────────────────────

struct StreamContext {
    client: reqwest::Client,
    audio: AudioConfig,
    playback: PlaybackConfig,
    events: mpsc::Sender<AppEvent>,
    generation: u64,
    url: String,
    volume: u8,
}

async fn stream_task(ctx: StreamContext, mut cancel: watch::Receiver<bool>) {
    let generation = ctx.generation;
    let events = ctx.events.clone();
    // Dropping the run future on cancel closes the connection and, through
    // kill_on_drop, the player process.
    tokio::select! {
        _ = cancel.changed() => {
            debug!("stream task cancelled (generation {generation})");
        }
        result = run_stream(ctx) => {
            let error = match result {
                Ok(()) => {
                    info!("stream ended (generation {generation})");
                    None
                }
                Err(e) => {
                    warn!("stream failed (generation {generation}): {e:#}");
                    Some(e.to_string())
                }
            };
            let _ = events
                .send(AppEvent::Stream(StreamEvent::Ended { generation, error }))
                .await;
        }
    }
}

async fn run_stream(ctx: StreamContext) -> anyhow::Result<()> {
    let mut url = ctx.url.clone();
    let mut hops = 0;
    let response = loop {
        let response = connect(&ctx.client, &url).await?;
        let content_type = header_str(&response, "content-type");
        if !icy::looks_like_playlist(&url, content_type.as_deref()) {
            break response;
        }
        if hops >= 1 {
            anyhow::bail!("nested playlist");
        }
        hops += 1;
        let body = response.text().await.context("playlist read failed")?;
        url = icy::playlist_target(&url, &body)
            .ok_or_else(|| anyhow::anyhow!("playlist has no playable entry"))?;
        info!("playlist resolved to {url}");
    };

    let metaint = header_str(&response, "icy-metaint").and_then(|v| icy::parse_metaint(&v));
    let bitrate = header_str(&response, "icy-br")
        .and_then(|v| icy::parse_bitrate(&v))
        .unwrap_or(ctx.playback.fallback_bitrate_kbps);
    let prebuffer_bytes = (ctx.playback.prebuffer_secs * u64::from(bitrate) * 1000 / 8) as usize;
    debug!("stream up: metaint={metaint:?} bitrate={bitrate}kbps prebuffer={prebuffer_bytes}B");

    let mut strip = metaint.map(icy::MetaInterleave::new);
    let mut stream = response.bytes_stream();
    let mut player: Option<Player> = None;
    let mut buffered: Vec<u8> = Vec::with_capacity(prebuffer_bytes + 16 * 1024);
    let mut last_title: Option<String> = None;
    let mut audio: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream read failed")?;
        audio.clear();
        let title = match strip.as_mut() {
            Some(strip) => strip.feed(&chunk, &mut audio),
            None => {
                audio.extend_from_slice(&chunk);
                None
            }
        };

        if let Some(title) = title {
            if last_title.as_deref() != Some(title.as_str()) {
                info!("stream title: {title}");
                last_title = Some(title.clone());
                let _ = ctx
                    .events
                    .send(AppEvent::Stream(StreamEvent::Title {
                        generation: ctx.generation,
                        title,
                    }))
                    .await;
            }
        }

        match player.as_mut() {
            Some(player) => player.feed(&audio).await.context("player write failed")?,
            None => {
                buffered.extend_from_slice(&audio);
                if buffered.len() >= prebuffer_bytes {
                    let mut started = Player::spawn(&ctx.audio, ctx.volume)
                        .await
                        .context("player spawn failed")?;
                    started
                        .feed(&buffered)
                        .await
                        .context("player write failed")?;
                    buffered = Vec::new();
                    player = Some(started);
                    let _ = ctx
                        .events
                        .send(AppEvent::Stream(StreamEvent::Prebuffered {
                            generation: ctx.generation,
                        }))
                        .await;
                }
            }
        }
    }

    if let Some(player) = player.take() {
        player.shutdown().await;
    }
    Ok(())
}

async fn connect(client: &reqwest::Client, url: &str) -> anyhow::Result<reqwest::Response> {
    let response = client.get(url).send().await.context("connect failed")?;
    let response = response
        .error_for_status()
        .context("bad upstream status")?;
    Ok(response)
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()
        .map(|v| v.trim().to_string())
}
