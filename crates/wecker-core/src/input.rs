//! Raw edge decoding: quadrature detents and button presses.
//!
//! The host feeds timestamped line edges in; out come at most the four
//! discrete events the UI understands. All timing is carried in the edges
//! themselves (milliseconds), so tests drive the decoder with synthetic
//! sequences and never sleep.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    RotateCw,
    RotateCcw,
    Press,
    LongPress,
}

/// Which physical line an edge arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    EncoderA,
    EncoderB,
    Button,
}

/// One raw level change, timestamped by the host input subsystem.
#[derive(Debug, Clone, Copy)]
pub struct RawEdge {
    pub line: Line,
    /// Encoder lines: signal level. Button: true = pressed.
    pub level: bool,
    pub at_ms: u64,
}

/// Per-transition contribution to a detent, indexed by `(prev << 2) | curr`
/// over the 2-bit `(A,B)` state. A full clockwise cycle
/// 00→01→11→10→00 sums to +4, counter-clockwise to −4; bounces that back out
/// cancel to 0, and impossible double-bit flips map to 0 and reset the cycle.
const QUAD_TABLE: [i8; 16] = [0, 1, -1, 0, -1, 0, 0, 1, 1, 0, 0, -1, 0, -1, 1, 0];

const QUAD_REST: u8 = 0b00;

pub struct InputDecoder {
    quad_state: u8,
    accum: i8,
    button_level: bool,
    button_last_edge_ms: Option<u64>,
    pressed_at_ms: Option<u64>,
    long_fired: bool,
    debounce_ms: u64,
    long_press_ms: u64,
}

impl InputDecoder {
    pub fn new(debounce_ms: u64, long_press_ms: u64) -> Self {
        Self {
            quad_state: QUAD_REST,
            accum: 0,
            button_level: false,
            button_last_edge_ms: None,
            pressed_at_ms: None,
            long_fired: false,
            debounce_ms,
            long_press_ms,
        }
    }

    /// Feed one raw edge; returns the decoded event, if the edge completes
    /// one. Glitches and partial detent cycles produce nothing.
    pub fn on_edge(&mut self, edge: RawEdge) -> Option<InputEvent> {
        match edge.line {
            Line::EncoderA => {
                let state = (u8::from(edge.level) << 1) | (self.quad_state & 0b01);
                self.apply_quad_state(state)
            }
            Line::EncoderB => {
                let state = (self.quad_state & 0b10) | u8::from(edge.level);
                self.apply_quad_state(state)
            }
            Line::Button => self.on_button_edge(edge.level, edge.at_ms),
        }
    }

    /// Time-driven check so a long press is reported while the knob is still
    /// held, not on release. Call at frame rate.
    pub fn poll(&mut self, now_ms: u64) -> Option<InputEvent> {
        let pressed_at = self.pressed_at_ms?;
        if !self.long_fired && now_ms.saturating_sub(pressed_at) >= self.long_press_ms {
            self.long_fired = true;
            return Some(InputEvent::LongPress);
        }
        None
    }

    /// Advance the quadrature state machine to `state`. A detent is emitted
    /// only when the full 4-step cycle returns to rest; anything short of
    /// that is electrical noise and evaporates.
    fn apply_quad_state(&mut self, state: u8) -> Option<InputEvent> {
        let state = state & 0b11;
        if state == self.quad_state {
            return None;
        }

        let step = QUAD_TABLE[usize::from((self.quad_state << 2) | state)];
        if step == 0 {
            debug!(
                "quadrature glitch {:02b} -> {:02b}, discarding cycle",
                self.quad_state, state
            );
            self.quad_state = state;
            self.accum = 0;
            return None;
        }

        self.quad_state = state;
        self.accum += step;

        if state != QUAD_REST {
            return None;
        }
        let accum = std::mem::replace(&mut self.accum, 0);
        match accum {
            4 => Some(InputEvent::RotateCw),
            -4 => Some(InputEvent::RotateCcw),
            _ => None,
        }
    }

    fn on_button_edge(&mut self, pressed: bool, at_ms: u64) -> Option<InputEvent> {
        if pressed == self.button_level {
            return None;
        }
        // Contact bounce: edges inside the window of the last accepted edge
        // are ignored wholesale.
        if let Some(last) = self.button_last_edge_ms {
            if at_ms.saturating_sub(last) < self.debounce_ms {
                return None;
            }
        }
        self.button_level = pressed;
        self.button_last_edge_ms = Some(at_ms);

        if pressed {
            self.pressed_at_ms = Some(at_ms);
            self.long_fired = false;
            return None;
        }

        let pressed_at = self.pressed_at_ms.take()?;
        if self.long_fired {
            // Already reported while held.
            return None;
        }
        if at_ms.saturating_sub(pressed_at) >= self.long_press_ms {
            Some(InputEvent::LongPress)
        } else {
            Some(InputEvent::Press)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: u64 = 20;
    const LONG: u64 = 800;

    fn decoder() -> InputDecoder {
        InputDecoder::new(DEBOUNCE, LONG)
    }

    fn feed(dec: &mut InputDecoder, edges: &[(Line, bool)]) -> Vec<InputEvent> {
        edges
            .iter()
            .enumerate()
            .filter_map(|(i, &(line, level))| {
                dec.on_edge(RawEdge {
                    line,
                    level,
                    at_ms: (i as u64) * 2,
                })
            })
            .collect()
    }

    // 00→01→11→10→00, expressed as single-line edges.
    const CW_CYCLE: [(Line, bool); 4] = [
        (Line::EncoderB, true),
        (Line::EncoderA, true),
        (Line::EncoderB, false),
        (Line::EncoderA, false),
    ];

    const CCW_CYCLE: [(Line, bool); 4] = [
        (Line::EncoderA, true),
        (Line::EncoderB, true),
        (Line::EncoderA, false),
        (Line::EncoderB, false),
    ];

    #[test]
    fn full_cw_cycle_yields_one_event() {
        let mut dec = decoder();
        assert_eq!(feed(&mut dec, &CW_CYCLE), vec![InputEvent::RotateCw]);
    }

    #[test]
    fn full_ccw_cycle_yields_one_event() {
        let mut dec = decoder();
        assert_eq!(feed(&mut dec, &CCW_CYCLE), vec![InputEvent::RotateCcw]);
    }

    #[test]
    fn consecutive_detents_each_emit() {
        let mut dec = decoder();
        let mut events = feed(&mut dec, &CW_CYCLE);
        events.extend(feed(&mut dec, &CW_CYCLE));
        events.extend(feed(&mut dec, &CCW_CYCLE));
        assert_eq!(
            events,
            vec![
                InputEvent::RotateCw,
                InputEvent::RotateCw,
                InputEvent::RotateCcw
            ]
        );
    }

    #[test]
    fn partial_cycle_backing_out_is_silent() {
        let mut dec = decoder();
        let bounce = [
            (Line::EncoderB, true),  // 00→01
            (Line::EncoderB, false), // back to rest
            (Line::EncoderB, true),
            (Line::EncoderA, true), // 01→11
            (Line::EncoderA, false),
            (Line::EncoderB, false), // back to rest, never via 10
        ];
        assert_eq!(feed(&mut dec, &bounce), vec![]);
    }

    #[test]
    fn double_bit_glitch_resets_cycle() {
        let mut dec = decoder();
        dec.apply_quad_state(0b01);
        // Both lines flip at once: impossible, discard the half-done cycle.
        assert_eq!(dec.apply_quad_state(0b10), None);
        assert_eq!(dec.apply_quad_state(0b00), None);
        // Decoder still works afterwards.
        assert_eq!(feed(&mut dec, &CW_CYCLE), vec![InputEvent::RotateCw]);
    }

    fn press_edge(dec: &mut InputDecoder, pressed: bool, at_ms: u64) -> Option<InputEvent> {
        dec.on_edge(RawEdge {
            line: Line::Button,
            level: pressed,
            at_ms,
        })
    }

    #[test]
    fn short_press_emits_press_on_release() {
        let mut dec = decoder();
        assert_eq!(press_edge(&mut dec, true, 1_000), None);
        assert_eq!(press_edge(&mut dec, false, 1_150), Some(InputEvent::Press));
    }

    #[test]
    fn held_press_emits_long_press_while_held_and_swallows_release() {
        let mut dec = decoder();
        press_edge(&mut dec, true, 1_000);
        assert_eq!(dec.poll(1_500), None);
        assert_eq!(dec.poll(1_800), Some(InputEvent::LongPress));
        assert_eq!(dec.poll(2_000), None);
        assert_eq!(press_edge(&mut dec, false, 2_100), None);
    }

    #[test]
    fn long_hold_without_poll_still_classifies_on_release() {
        let mut dec = decoder();
        press_edge(&mut dec, true, 1_000);
        assert_eq!(
            press_edge(&mut dec, false, 1_000 + LONG),
            Some(InputEvent::LongPress)
        );
    }

    #[test]
    fn never_both_press_and_long_press() {
        let mut dec = decoder();
        press_edge(&mut dec, true, 0);
        let mut events = vec![];
        events.extend(dec.poll(LONG));
        events.extend(press_edge(&mut dec, false, LONG + 100));
        assert_eq!(events, vec![InputEvent::LongPress]);
    }

    #[test]
    fn bouncing_edges_inside_window_are_ignored() {
        let mut dec = decoder();
        assert_eq!(press_edge(&mut dec, true, 1_000), None);
        // Bounce: release+press flutter 5ms after the accepted edge.
        assert_eq!(press_edge(&mut dec, false, 1_005), None);
        assert_eq!(press_edge(&mut dec, true, 1_010), None);
        // Real release later still classifies against the original press.
        assert_eq!(press_edge(&mut dec, false, 1_200), Some(InputEvent::Press));
    }
}
