//! The daemon event loop. Every external stimulus (input edges, stream task
//! reports, retry timers, the 1 Hz tick) funnels into the single consumer in
//! [`AppCore::run`], which owns all mutable state. Nothing here is shared or
//! locked.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use wecker_core::alarm::AlarmScheduler;
use wecker_core::config::Config;
use wecker_core::input::{InputDecoder, RawEdge};
use wecker_core::model::PlaybackState;
use wecker_core::render::{DisplayRenderer, Frame};
use wecker_core::store::{self, AlarmStore, RuntimeState, StationStore};
use wecker_core::ui::{Command, UiController, UiEvent};

use crate::engine::{PlaybackEngine, StreamEvent};
use crate::hal::{self, FbDisplay};

/// Reports from the daemon's own async tasks. Raw input edges travel on a
/// separate channel straight from the device readers.
#[derive(Debug)]
pub enum AppEvent {
    Stream(StreamEvent),
    RetryDue { generation: u64 },
    SaveFailed(StoreKind),
    Shutdown,
}

/// Which persisted file a background write was for.
#[derive(Debug, Clone, Copy)]
pub enum StoreKind {
    Alarms,
    Runtime,
}

pub struct AppCore {
    config: Config,
    stations: StationStore,
    alarms: AlarmStore,
    ui: UiController,
    decoder: InputDecoder,
    scheduler: AlarmScheduler,
    renderer: DisplayRenderer,
    display: FbDisplay,
    engine: PlaybackEngine,
    events_tx: mpsc::Sender<AppEvent>,
    events_rx: mpsc::Receiver<AppEvent>,
    edges_rx: mpsc::Receiver<RawEdge>,
    alarms_dirty: bool,
    runtime_dirty: bool,
}

impl AppCore {
    pub fn new(
        config: Config,
        stations: StationStore,
        alarms: AlarmStore,
        runtime: RuntimeState,
        events_tx: mpsc::Sender<AppEvent>,
        events_rx: mpsc::Receiver<AppEvent>,
        edges_rx: mpsc::Receiver<RawEdge>,
    ) -> anyhow::Result<Self> {
        let engine = PlaybackEngine::new(
            config.playback.clone(),
            config.audio.clone(),
            runtime.volume,
            events_tx.clone(),
        )?;
        let ui = UiController::new(
            runtime.volume,
            config.audio.volume_step,
            runtime.last_station_id,
        );
        let decoder = InputDecoder::new(config.input.debounce_ms, config.input.long_press_ms);
        let renderer = DisplayRenderer::new(config.display.scroll_step_ms);
        let display = FbDisplay::new(&config.display.device);
        Ok(Self {
            config,
            stations,
            alarms,
            ui,
            decoder,
            scheduler: AlarmScheduler::new(),
            renderer,
            display,
            engine,
            events_tx,
            events_rx,
            edges_rx,
            alarms_dirty: false,
            runtime_dirty: false,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut second = tokio::time::interval(Duration::from_secs(1));
        second.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frame = tokio::time::interval(Duration::from_millis(
            self.config.display.frame_interval_ms.max(50),
        ));
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("event loop running");
        loop {
            tokio::select! {
                Some(edge) = self.edges_rx.recv() => self.on_edge(edge).await,
                Some(event) = self.events_rx.recv() => {
                    if !self.on_event(event).await {
                        break;
                    }
                }
                _ = second.tick() => self.on_second().await,
                _ = frame.tick() => self.on_frame().await,
            }
        }
        self.shutdown().await;
        Ok(())
    }

    // ── event handling ────────────────────────────────────────────────────────

    async fn on_edge(&mut self, edge: RawEdge) {
        if let Some(input) = self.decoder.on_edge(edge) {
            debug!("input: {input:?}");
            self.dispatch(UiEvent::Input(input)).await;
        }
    }

    async fn on_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Stream(StreamEvent::Title { generation, title }) => {
                if self.engine.is_current(generation) {
                    self.dispatch(UiEvent::TitleChanged(Some(title))).await;
                }
            }
            AppEvent::Stream(event) => {
                if let Some(state) = self.engine.on_stream_event(event).await {
                    self.apply_playback(state);
                }
            }
            AppEvent::RetryDue { generation } => {
                if let Some(state) = self.engine.on_retry_due(generation).await {
                    self.apply_playback(state);
                }
            }
            AppEvent::SaveFailed(StoreKind::Alarms) => self.alarms_dirty = true,
            AppEvent::SaveFailed(StoreKind::Runtime) => self.runtime_dirty = true,
            AppEvent::Shutdown => return false,
        }
        true
    }

    async fn on_second(&mut self) {
        let now = Local::now();
        let scan = self.scheduler.check(&mut self.alarms, now.naive_local());
        if scan.store_changed {
            self.persist_alarms();
        }
        for id in scan.fired {
            self.dispatch(UiEvent::AlarmFired(id)).await;
        }
        self.dispatch(UiEvent::Tick).await;
    }

    async fn on_frame(&mut self) {
        // The decoder reports long presses while the button is still held.
        if let Some(input) = self.decoder.poll(hal::wall_ms()) {
            debug!("input: {input:?}");
            self.dispatch(UiEvent::Input(input)).await;
        }
        let model = self
            .ui
            .render_model(&self.stations, &self.alarms, Local::now());
        let frame = self.renderer.render(&model);
        self.display.flush(&frame);
    }

    /// Run one event through the controller and carry out what it asks for.
    async fn dispatch(&mut self, event: UiEvent) {
        let commands = self.ui.handle(event, &self.stations, &mut self.alarms);
        for command in commands {
            self.execute(command).await;
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Play(station_id) => {
                let Some(station) = self.stations.get(station_id) else {
                    warn!("play command for unknown station {station_id}");
                    return;
                };
                let station = station.clone();
                if let Some(state) = self.engine.play(&station).await {
                    self.apply_playback(state);
                }
            }
            Command::Stop => {
                if let Some(state) = self.engine.stop().await {
                    self.apply_playback(state);
                }
            }
            Command::SetVolume(volume) => self.engine.set_volume(volume).await,
            Command::PersistAlarms => self.persist_alarms(),
            Command::PersistRuntime => self.persist_runtime(),
        }
    }

    /// Feed a playback transition straight into the controller. Playback and
    /// title events never produce commands, so this cannot recurse back into
    /// `execute`.
    fn apply_playback(&mut self, state: PlaybackState) {
        if !state.is_playing() {
            let commands =
                self.ui
                    .handle(UiEvent::TitleChanged(None), &self.stations, &mut self.alarms);
            debug_assert!(commands.is_empty());
        }
        let commands = self.ui.handle(
            UiEvent::PlaybackChanged(state),
            &self.stations,
            &mut self.alarms,
        );
        debug_assert!(commands.is_empty());
    }

    // ── persistence ───────────────────────────────────────────────────────────

    fn persist_alarms(&mut self) {
        self.alarms_dirty = false;
        match self.alarms.to_toml() {
            Ok(content) => {
                let path = self.config.paths.alarms_file.clone();
                self.spawn_write(StoreKind::Alarms, path, content);
            }
            Err(e) => {
                warn!("alarm serialize failed: {e}; retrying on next change");
                self.alarms_dirty = true;
            }
        }
    }

    fn persist_runtime(&mut self) {
        self.runtime_dirty = false;
        match self.runtime_snapshot().to_json() {
            Ok(content) => {
                let path = self.config.paths.state_file.clone();
                self.spawn_write(StoreKind::Runtime, path, content);
            }
            Err(e) => {
                warn!("runtime state serialize failed: {e}; retrying on next change");
                self.runtime_dirty = true;
            }
        }
    }

    fn runtime_snapshot(&self) -> RuntimeState {
        RuntimeState {
            last_station_id: self.ui.current_station(),
            volume: self.ui.volume(),
        }
    }

    /// The disk write happens off the loop; a failure comes back as an event
    /// and re-arms the dirty flag, retried on the next mutation.
    fn spawn_write(&self, kind: StoreKind, path: PathBuf, content: String) {
        let events = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store::write_atomic(&path, &content) {
                warn!("{kind:?} write to {} failed: {e}", path.display());
                let _ = events.blocking_send(AppEvent::SaveFailed(kind));
            } else {
                debug!("{kind:?} written to {}", path.display());
            }
        });
    }

    async fn shutdown(&mut self) {
        info!("shutting down");
        let _ = self.engine.stop().await;
        if self.alarms_dirty {
            if let Err(e) = self.alarms.save() {
                warn!("final alarm save failed: {e}");
            }
        }
        if self.runtime_dirty {
            if let Err(e) = self.runtime_snapshot().save(&self.config.paths.state_file) {
                warn!("final runtime state save failed: {e}");
            }
        }
        self.display.flush(&Frame::new());
    }
}
