//! VT sequence parser
//!
//! Parses the cursor/erase subset of ANSI escape sequences and applies it to
//! a [`TerminalGrid`]. Anything outside that subset (SGR, OSC titles, DEC
//! private modes other than auto-wrap) is consumed and ignored.

use super::grid::TerminalGrid;

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<char>,
    current_param: Option<u16>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    EscapeInOsc, // ESC received within OSC, waiting for backslash
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
        }
    }

    /// True when not in the middle of an escape sequence
    pub fn is_ground(&self) -> bool {
        self.state == ParserState::Ground
    }

    /// Drop any partially parsed sequence
    pub fn reset(&mut self) {
        self.state = ParserState::Ground;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    /// Feed a single decoded character to the parser
    pub fn feed(&mut self, ch: char, grid: &mut TerminalGrid) {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::EscapeInOsc);

        // C0 controls act anywhere except inside an OSC string
        if (ch as u32) < 0x20 && !in_osc {
            match ch {
                '\x1b' => self.enter_escape(),
                '\x08' => grid.backspace(),
                '\t' => grid.horizontal_tab(),
                '\n' | '\x0b' | '\x0c' => grid.linefeed(),
                '\r' => grid.carriage_return(),
                // CAN / SUB abort a sequence in progress
                '\x18' | '\x1a' => self.reset(),
                _ => {}
            }
            return;
        }

        match self.state {
            ParserState::Ground => self.ground(ch, grid),
            ParserState::Escape => self.escape(ch, grid),
            ParserState::EscapeIntermediate => self.escape_intermediate(ch),
            ParserState::CsiEntry => self.csi_entry(ch, grid),
            ParserState::CsiParam => self.csi_param(ch, grid),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, grid),
            ParserState::OscString => self.osc_string(ch),
            ParserState::EscapeInOsc => self.escape_in_osc(ch, grid),
        }
    }

    fn enter_escape(&mut self) {
        self.reset();
        self.state = ParserState::Escape;
    }

    fn ground(&mut self, ch: char, grid: &mut TerminalGrid) {
        // DEL and C1 controls have no glyph
        if ch == '\x7f' || ('\u{80}'..='\u{9f}').contains(&ch) {
            return;
        }
        grid.put_char(ch);
    }

    fn escape(&mut self, ch: char, grid: &mut TerminalGrid) {
        self.state = ParserState::Ground;
        match ch {
            '[' => self.state = ParserState::CsiEntry,
            ']' => self.state = ParserState::OscString,
            // DECSC / DECRC
            '7' => grid.save_cursor(),
            '8' => grid.restore_cursor(),
            // IND
            'D' => grid.index(),
            // NEL
            'E' => {
                grid.carriage_return();
                grid.linefeed();
            }
            // RI
            'M' => grid.reverse_index(),
            // RIS
            'c' => grid.reset(),
            '\x20'..='\x2f' => {
                self.intermediates.push(ch);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => tracing::debug!("Ignoring ESC {:?}", ch),
        }
    }

    fn escape_intermediate(&mut self, ch: char) {
        match ch {
            '\x20'..='\x2f' => self.intermediates.push(ch),
            // Charset designations and the like - nothing to track
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_entry(&mut self, ch: char, grid: &mut TerminalGrid) {
        match ch {
            '0'..='9' => {
                self.current_param = Some(digit(ch));
                self.state = ParserState::CsiParam;
            }
            ';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            '?' | '>' | '!' | '=' => self.intermediates.push(ch),
            '\x20'..='\x2f' => {
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '\x40'..='\x7e' => self.execute_csi(ch, grid),
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_param(&mut self, ch: char, grid: &mut TerminalGrid) {
        match ch {
            '0'..='9' => {
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit(ch)),
                );
            }
            ';' | ':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            '\x20'..='\x2f' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '\x40'..='\x7e' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.execute_csi(ch, grid);
            }
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_intermediate(&mut self, ch: char, grid: &mut TerminalGrid) {
        match ch {
            '\x20'..='\x2f' => self.intermediates.push(ch),
            '\x40'..='\x7e' => self.execute_csi(ch, grid),
            _ => self.state = ParserState::Ground,
        }
    }

    fn osc_string(&mut self, ch: char) {
        match ch {
            // BEL or ST terminates
            '\x07' | '\u{9c}' => self.state = ParserState::Ground,
            '\x1b' => self.state = ParserState::EscapeInOsc,
            _ => {}
        }
    }

    fn escape_in_osc(&mut self, ch: char, grid: &mut TerminalGrid) {
        if ch == '\\' {
            self.state = ParserState::Ground;
        } else {
            // Not ST: the OSC ends here and this char starts a new escape
            self.enter_escape();
            self.escape(ch, grid);
        }
    }

    /// First parameter with VT defaulting (missing or 0 means `default`)
    fn param(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index).copied() {
            Some(0) | None => default,
            Some(n) => n,
        }
    }

    fn execute_csi(&mut self, final_char: char, grid: &mut TerminalGrid) {
        self.state = ParserState::Ground;

        if self.intermediates.contains(&'?') {
            // DEC private modes: only auto-wrap affects the grid
            if matches!(final_char, 'h' | 'l') && self.params.contains(&7) {
                grid.auto_wrap = final_char == 'h';
            }
            return;
        }
        if !self.intermediates.is_empty() {
            tracing::debug!(
                "Ignoring CSI: intermediates={:?}, params={:?}, final={:?}",
                self.intermediates,
                self.params,
                final_char
            );
            return;
        }

        match final_char {
            'A' => grid.cursor_up(self.param(0, 1)),
            'B' => grid.cursor_down(self.param(0, 1)),
            'C' => grid.cursor_forward(self.param(0, 1)),
            'D' => grid.cursor_backward(self.param(0, 1)),
            // CNL / CPL
            'E' => {
                grid.cursor_down(self.param(0, 1));
                grid.carriage_return();
            }
            'F' => {
                grid.cursor_up(self.param(0, 1));
                grid.carriage_return();
            }
            'G' => grid.set_column(self.param(0, 1)),
            'H' | 'f' => grid.cursor_position(self.param(0, 1), self.param(1, 1)),
            'd' => grid.set_row(self.param(0, 1)),
            'J' => grid.erase_in_display(self.params.first().copied().unwrap_or(0)),
            'K' => grid.erase_in_line(self.params.first().copied().unwrap_or(0)),
            'S' => grid.scroll_up(self.param(0, 1)),
            'T' => grid.scroll_down(self.param(0, 1)),
            's' => grid.save_cursor(),
            'u' => grid.restore_cursor(),
            // SGR carries no grid state here
            'm' => {}
            _ => tracing::debug!(
                "Unknown CSI: params={:?}, final={:?}",
                self.params,
                final_char
            ),
        }
    }
}

fn digit(ch: char) -> u16 {
    ch.to_digit(10).unwrap_or(0) as u16
}
