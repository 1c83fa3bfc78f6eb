//! Bitmap rendering for the 128x64 1-bit display.
//!
//! Every frame is drawn from scratch out of a [`RenderModel`]; the only
//! state surviving between frames is the marquee position of an overlong
//! now-playing title. The packed framebuffer leaves through the display sink
//! unmodified, so everything visible is testable right here.

use chrono::{Timelike, Utc};
use core::convert::Infallible;
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};

use crate::alarm::next_occurrence;
use crate::model::{Alarm, PlaybackState, WEEKDAYS};
use crate::ui::{EditField, RenderModel, Screen};

pub const WIDTH: usize = 128;
pub const HEIGHT: usize = 64;
pub const FRAME_BYTES: usize = WIDTH * HEIGHT / 8;

/// Characters of FONT_6X10 that fit on one line.
const LINE_CHARS: usize = WIDTH / 6;
/// Steps the title marquee rests at either end before reversing.
const SCROLL_END_HOLD: u8 = 3;

/// One display frame, packed the way the panel wants it: page-major, one
/// byte per 8-pixel vertical strip, least significant bit on top.
pub struct Frame {
    bytes: [u8; FRAME_BYTES],
}

impl Frame {
    pub fn new() -> Self {
        Self {
            bytes: [0; FRAME_BYTES],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_lit(&self, x: usize, y: usize) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return false;
        }
        self.bytes[(y / 8) * WIDTH + x] & (1 << (y % 8)) != 0
    }

    pub fn lit_count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for Frame {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if (0..WIDTH as i32).contains(&point.x) && (0..HEIGHT as i32).contains(&point.y) {
                let (x, y) = (point.x as usize, point.y as usize);
                let bit = 1u8 << (y % 8);
                let byte = &mut self.bytes[(y / 8) * WIDTH + x];
                match color {
                    BinaryColor::On => *byte |= bit,
                    BinaryColor::Off => *byte &= !bit,
                }
            }
        }
        Ok(())
    }
}

// ── marquee ───────────────────────────────────────────────────────────────────

struct ScrollState {
    text: String,
    offset: usize,
    back: bool,
    hold: u8,
    last_step_ms: Option<i64>,
}

impl ScrollState {
    fn new() -> Self {
        Self {
            text: String::new(),
            offset: 0,
            back: false,
            hold: SCROLL_END_HOLD,
            last_step_ms: None,
        }
    }

    fn reset(&mut self, text: &str) {
        self.text = text.to_string();
        self.offset = 0;
        self.back = false;
        self.hold = SCROLL_END_HOLD;
        self.last_step_ms = None;
    }

    /// Visible slice of `text` at `now_ms`, advancing one character per
    /// `step_ms` with a rest at both ends.
    fn view(&mut self, text: &str, now_ms: i64, step_ms: i64, visible: usize) -> String {
        if self.text != text {
            self.reset(text);
        }
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= visible {
            return text.to_string();
        }
        let overflow = chars.len() - visible;

        let due = match self.last_step_ms {
            None => false,
            Some(last) => now_ms.saturating_sub(last) >= step_ms,
        };
        if self.last_step_ms.is_none() {
            self.last_step_ms = Some(now_ms);
        } else if due {
            self.last_step_ms = Some(now_ms);
            self.step(overflow);
        }

        chars[self.offset.min(overflow)..][..visible].iter().collect()
    }

    fn step(&mut self, overflow: usize) {
        if self.hold > 0 {
            self.hold -= 1;
            return;
        }
        if self.back {
            self.offset = self.offset.saturating_sub(1);
            if self.offset == 0 {
                self.back = false;
                self.hold = SCROLL_END_HOLD;
            }
        } else {
            self.offset += 1;
            if self.offset >= overflow {
                self.offset = overflow;
                self.back = true;
                self.hold = SCROLL_END_HOLD;
            }
        }
    }
}

// ── renderer ──────────────────────────────────────────────────────────────────

pub struct DisplayRenderer {
    scroll: ScrollState,
    scroll_step_ms: i64,
}

impl DisplayRenderer {
    pub fn new(scroll_step_ms: u64) -> Self {
        Self {
            scroll: ScrollState::new(),
            scroll_step_ms: scroll_step_ms.max(1) as i64,
        }
    }

    pub fn render(&mut self, model: &RenderModel) -> Frame {
        let mut frame = Frame::new();
        // Drawing into the memory framebuffer cannot fail.
        let _ = self.paint(&mut frame, model);
        frame
    }

    fn paint(&mut self, frame: &mut Frame, model: &RenderModel) -> Result<(), Infallible> {
        match &model.screen {
            Screen::Clock => self.paint_clock(frame, model),
            Screen::StationList { selected } => self.paint_station_list(frame, model, *selected),
            Screen::NowPlaying => self.paint_now_playing(frame, model),
            Screen::AlarmSetup { draft, field, .. } => {
                self.paint_alarm_setup(frame, model, draft, *field)
            }
            Screen::Settings { selected } => self.paint_settings(frame, model, *selected),
        }
    }

    fn paint_clock(&mut self, frame: &mut Frame, model: &RenderModel) -> Result<(), Infallible> {
        let date = model.now.format("%a %d %b").to_string();
        text(frame, &date, centered_x(date.len(), 6), 0, &FONT_6X10, BinaryColor::On)?;

        if model.playback.is_active() {
            text(frame, ">", (WIDTH - 8) as i32, 0, &FONT_6X10, BinaryColor::On)?;
        }

        let time = clock_text(model);
        text(frame, &time, centered_x(time.len(), 10), 20, &FONT_10X20, BinaryColor::On)?;

        if let Some((when, _)) = next_occurrence(&model.alarms, model.now.naive_local()) {
            let line = format!("next {}", when.format("%a %H:%M"));
            text(frame, &line, centered_x(line.len(), 6), 52, &FONT_6X10, BinaryColor::On)?;
        }
        Ok(())
    }

    fn paint_station_list(
        &mut self,
        frame: &mut Frame,
        model: &RenderModel,
        selected: usize,
    ) -> Result<(), Infallible> {
        if model.stations.is_empty() {
            text(frame, "no stations", centered_x(11, 6), 22, &FONT_6X10, BinaryColor::On)?;
            let hint = "edit stations.toml";
            text(frame, hint, centered_x(hint.len(), 6), 36, &FONT_6X10, BinaryColor::On)?;
            return Ok(());
        }

        let start = window_start(selected, model.stations.len(), 3);
        for (row, idx) in (start..model.stations.len()).take(3).enumerate() {
            let station = &model.stations[idx];
            let label = fit(&format!("{:03} {}", idx + 1, station.display_name), LINE_CHARS);
            row_text(frame, &label, 6 + row as i32 * 19, idx == selected)?;
        }
        Ok(())
    }

    fn paint_now_playing(
        &mut self,
        frame: &mut Frame,
        model: &RenderModel,
    ) -> Result<(), Infallible> {
        let name = model
            .current_station
            .and_then(|id| model.stations.iter().find(|s| s.id == id))
            .map(|s| s.display_name.as_str())
            .unwrap_or("---");
        text(frame, &fit(name, LINE_CHARS), 0, 2, &FONT_6X10, BinaryColor::On)?;

        if let Some(title) = model.title.as_deref().filter(|t| !t.is_empty()) {
            let now_ms = model.now.with_timezone(&Utc).timestamp_millis();
            let visible = self.scroll.view(title, now_ms, self.scroll_step_ms, LINE_CHARS);
            text(frame, &visible, 0, 20, &FONT_6X10, BinaryColor::On)?;
        }

        let status = fit(&status_line(model), LINE_CHARS);
        text(frame, &status, 0, 36, &FONT_6X10, BinaryColor::On)?;

        // Volume bar along the bottom.
        rect(frame, 0, 54, WIDTH as u32, 10, PrimitiveStyle::with_stroke(BinaryColor::On, 1))?;
        let fill_w = (u32::from(model.volume) * (WIDTH as u32 - 4)) / 100;
        if fill_w > 0 {
            rect(frame, 2, 56, fill_w, 6, PrimitiveStyle::with_fill(BinaryColor::On))?;
        }
        Ok(())
    }

    fn paint_alarm_setup(
        &mut self,
        frame: &mut Frame,
        model: &RenderModel,
        draft: &Alarm,
        field: EditField,
    ) -> Result<(), Infallible> {
        let hour = format!("{:02}", draft.time.hour);
        let minute = format!("{:02}", draft.time.minute);
        label(frame, &hour, 8, 4, &FONT_10X20, field == EditField::Hour)?;
        text(frame, ":", 30, 4, &FONT_10X20, BinaryColor::On)?;
        label(frame, &minute, 42, 4, &FONT_10X20, field == EditField::Minute)?;

        const DAY_LETTERS: [char; 7] = ['M', 'T', 'W', 'T', 'F', 'S', 'S'];
        for (i, letter) in DAY_LETTERS.iter().enumerate() {
            let x = 8 + i as i32 * 16;
            let enabled = draft.repeat_days.contains(&WEEKDAYS[i]);
            label(frame, &letter.to_string(), x, 30, &FONT_6X10, enabled)?;
            if field == EditField::Day(i) {
                rect(frame, x - 1, 42, 8, 2, PrimitiveStyle::with_fill(BinaryColor::On))?;
            }
        }

        let switch = if draft.enabled { "on " } else { "off" };
        label(frame, switch, 8, 50, &FONT_6X10, field == EditField::Enabled)?;

        let station = model
            .stations
            .iter()
            .find(|s| s.id == draft.station_id)
            .map(|s| s.display_name.as_str())
            .unwrap_or("???");
        label(frame, &fit(station, 13), 40, 50, &FONT_6X10, field == EditField::Station)?;
        Ok(())
    }

    fn paint_settings(
        &mut self,
        frame: &mut Frame,
        model: &RenderModel,
        selected: usize,
    ) -> Result<(), Infallible> {
        let mut rows: Vec<String> = model.alarms.iter().map(alarm_summary).collect();
        rows.push("add alarm".to_string());
        rows.push("back".to_string());

        let start = window_start(selected, rows.len(), 3);
        for (row, idx) in (start..rows.len()).take(3).enumerate() {
            row_text(frame, &fit(&rows[idx], LINE_CHARS), 6 + row as i32 * 19, idx == selected)?;
        }
        Ok(())
    }
}

// ── layout helpers ────────────────────────────────────────────────────────────

/// `HH:MM` for the big clock: leading zero of the hour shown as a blank and
/// the colon blanked every other second.
fn clock_text(model: &RenderModel) -> String {
    let sep = if model.now.second() % 2 == 0 { ':' } else { ' ' };
    format!("{:2}{}{:02}", model.now.hour(), sep, model.now.minute())
}

fn status_line(model: &RenderModel) -> String {
    match &model.playback {
        PlaybackState::Stopped => "stopped".to_string(),
        PlaybackState::Playing { .. } => "playing".to_string(),
        PlaybackState::Connecting { .. } => {
            let dots = (model.now.second() as usize % 3) + 1;
            format!("connecting{}", ".".repeat(dots))
        }
        PlaybackState::Error { reason, since } => {
            let elapsed = (model.now.with_timezone(&Utc) - *since)
                .num_seconds()
                .max(0);
            format!("error {elapsed}s {reason}")
        }
    }
}

/// `06:30 MTWTF-- on` style summary for a settings row.
fn alarm_summary(alarm: &Alarm) -> String {
    const DAY_LETTERS: [char; 7] = ['M', 'T', 'W', 'T', 'F', 'S', 'S'];
    let days: String = if alarm.repeat_days.is_empty() {
        "once   ".to_string()
    } else {
        WEEKDAYS
            .iter()
            .zip(DAY_LETTERS)
            .map(|(day, letter)| {
                if alarm.repeat_days.contains(day) {
                    letter
                } else {
                    '-'
                }
            })
            .collect()
    };
    format!(
        "{:02}:{:02} {} {}",
        alarm.time.hour,
        alarm.time.minute,
        days,
        if alarm.enabled { "on" } else { "off" }
    )
}

/// First visible index so the selection sits mid-window where possible.
fn window_start(selected: usize, len: usize, visible: usize) -> usize {
    if len <= visible {
        0
    } else {
        selected.saturating_sub(visible / 2).min(len - visible)
    }
}

fn fit(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn centered_x(chars: usize, char_w: usize) -> i32 {
    (WIDTH.saturating_sub(chars * char_w) / 2) as i32
}

fn text(
    frame: &mut Frame,
    s: &str,
    x: i32,
    y: i32,
    font: &'static MonoFont<'static>,
    color: BinaryColor,
) -> Result<(), Infallible> {
    Text::with_baseline(s, Point::new(x, y), MonoTextStyle::new(font, color), Baseline::Top)
        .draw(frame)
        .map(|_| ())
}

fn rect(
    frame: &mut Frame,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    style: PrimitiveStyle<BinaryColor>,
) -> Result<(), Infallible> {
    Rectangle::new(Point::new(x, y), Size::new(w, h))
        .into_styled(style)
        .draw(frame)
}

/// Text with an inverted box behind it when highlighted.
fn label(
    frame: &mut Frame,
    s: &str,
    x: i32,
    y: i32,
    font: &'static MonoFont<'static>,
    highlighted: bool,
) -> Result<(), Infallible> {
    if highlighted {
        let w = (s.chars().count() as u32) * font.character_size.width + 2;
        let h = font.character_size.height + 2;
        rect(frame, x - 1, y - 1, w, h, PrimitiveStyle::with_fill(BinaryColor::On))?;
        text(frame, s, x, y, font, BinaryColor::Off)
    } else {
        text(frame, s, x, y, font, BinaryColor::On)
    }
}

/// Full-width list row, inverted when selected.
fn row_text(frame: &mut Frame, s: &str, y: i32, selected: bool) -> Result<(), Infallible> {
    if selected {
        rect(frame, 0, y - 2, WIDTH as u32, 14, PrimitiveStyle::with_fill(BinaryColor::On))?;
        text(frame, s, 2, y, &FONT_6X10, BinaryColor::Off)
    } else {
        text(frame, s, 2, y, &FONT_6X10, BinaryColor::On)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlarmTime, Station};
    use chrono::{Local, TimeZone, Weekday};

    fn station(id: u32, name: &str) -> Station {
        Station {
            id,
            display_name: name.to_string(),
            stream_url: format!("http://example.net/{id}"),
        }
    }

    fn model(screen: Screen) -> RenderModel {
        RenderModel {
            screen,
            playback: PlaybackState::Stopped,
            now: Local.with_ymd_and_hms(2026, 8, 17, 7, 5, 0).unwrap(),
            stations: vec![station(1, "morning radio"), station(2, "late jazz")],
            alarms: vec![],
            current_station: Some(1),
            title: None,
            volume: 50,
        }
    }

    #[test]
    fn framebuffer_packs_page_major_lsb_top() {
        let mut frame = Frame::new();
        frame
            .draw_iter([Pixel(Point::new(1, 9), BinaryColor::On)])
            .unwrap();
        assert_eq!(frame.as_bytes()[WIDTH + 1], 0b0000_0010);
        assert!(frame.is_lit(1, 9));
        assert!(!frame.is_lit(1, 8));
    }

    #[test]
    fn out_of_bounds_pixels_are_dropped() {
        let mut frame = Frame::new();
        frame
            .draw_iter([
                Pixel(Point::new(-1, 0), BinaryColor::On),
                Pixel(Point::new(128, 63), BinaryColor::On),
                Pixel(Point::new(0, 64), BinaryColor::On),
            ])
            .unwrap();
        assert_eq!(frame.lit_count(), 0);
    }

    #[test]
    fn clock_pads_single_digit_hour_with_blank() {
        let m = model(Screen::Clock);
        assert_eq!(clock_text(&m), " 7:05");

        let mut late = m;
        late.now = Local.with_ymd_and_hms(2026, 8, 17, 17, 5, 0).unwrap();
        assert_eq!(clock_text(&late), "17:05");
    }

    #[test]
    fn clock_colon_blinks_on_odd_seconds() {
        let mut m = model(Screen::Clock);
        m.now = Local.with_ymd_and_hms(2026, 8, 17, 7, 5, 1).unwrap();
        assert_eq!(clock_text(&m), " 7 05");
    }

    #[test]
    fn every_screen_renders_something() {
        let mut renderer = DisplayRenderer::new(300);
        let draft = Alarm {
            id: 1,
            time: AlarmTime::new(7, 0),
            enabled: true,
            repeat_days: vec![Weekday::Mon],
            station_id: 1,
        };
        let screens = [
            Screen::Clock,
            Screen::StationList { selected: 1 },
            Screen::NowPlaying,
            Screen::Settings { selected: 0 },
            Screen::AlarmSetup {
                existing: Some(1),
                draft,
                field: EditField::Minute,
            },
        ];
        for screen in screens {
            let frame = renderer.render(&model(screen.clone()));
            assert!(frame.lit_count() > 0, "blank frame for {screen:?}");
        }
    }

    #[test]
    fn selected_row_renders_inverted() {
        let mut renderer = DisplayRenderer::new(300);
        let selected = renderer.render(&model(Screen::StationList { selected: 0 }));
        let unselected = renderer.render(&model(Screen::StationList { selected: 1 }));
        // The inverted bar makes the selected variant much brighter.
        assert!(selected.lit_count() != unselected.lit_count());
        // Past the text but inside the fill bar of the first row.
        assert!(selected.is_lit(120, 8), "fill bar should cover the first row");
    }

    #[test]
    fn alarm_summary_is_compact() {
        let alarm = Alarm {
            id: 1,
            time: AlarmTime::new(6, 30),
            enabled: true,
            repeat_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            station_id: 1,
        };
        assert_eq!(alarm_summary(&alarm), "06:30 MTWTF-- on");

        let once = Alarm {
            repeat_days: vec![],
            enabled: false,
            ..alarm
        };
        assert_eq!(alarm_summary(&once), "06:30 once    off");
    }

    #[test]
    fn window_keeps_selection_visible() {
        assert_eq!(window_start(0, 10, 3), 0);
        assert_eq!(window_start(1, 10, 3), 0);
        assert_eq!(window_start(2, 10, 3), 1);
        assert_eq!(window_start(9, 10, 3), 7);
        assert_eq!(window_start(1, 2, 3), 0);
    }

    #[test]
    fn marquee_holds_three_steps_at_each_end() {
        let mut scroll = ScrollState::new();
        let text = "abcdefgh"; // 8 chars
        let visible = 6; // overflow 2
        let step = 300i64;

        let mut offsets = Vec::new();
        let mut now = 0i64;
        for _ in 0..16 {
            let view = scroll.view(text, now, step, visible);
            offsets.push(text.find(&view[..1]).unwrap());
            now += step;
        }
        assert_eq!(
            offsets,
            vec![0, 0, 0, 0, 1, 2, 2, 2, 2, 1, 0, 0, 0, 0, 1, 2],
            "bounce with three-step end holds"
        );
        assert!(offsets.iter().all(|&o| o <= 2));
    }

    #[test]
    fn marquee_resets_when_title_changes() {
        let mut scroll = ScrollState::new();
        let long = "a very long title indeed";
        for i in 0..10 {
            scroll.view(long, i * 300, 300, 6);
        }
        assert!(scroll.offset > 0);
        let view = scroll.view("another long title here", 4_000, 300, 6);
        assert_eq!(view, "anothe");
    }

    #[test]
    fn short_title_never_scrolls() {
        let mut scroll = ScrollState::new();
        for i in 0..10 {
            assert_eq!(scroll.view("short", i * 300, 300, 6), "short");
        }
    }

    #[test]
    fn status_line_reports_error_age_and_reason() {
        let mut m = model(Screen::NowPlaying);
        let since = m.now.with_timezone(&Utc) - chrono::Duration::seconds(12);
        m.playback = PlaybackState::Error {
            reason: "dns failure".to_string(),
            since,
        };
        assert_eq!(status_line(&m), "error 12s dns failure");
    }
}
