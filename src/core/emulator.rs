//! Terminal emulator worker
//!
//! A permanent chain member that decodes every chunk, runs it through the VT
//! parser into the grid and tells the renderer to redraw. Renderers read the
//! grid through [`Screen`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::chain::{Worker, WorkerError};
use super::term::{TerminalGrid, Utf8Decoder, VtParser};

/// Notifications for the rendering side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEvent {
    /// Grid content or cursor changed
    Redraw,
    /// Grid was reallocated
    Resized { rows: u16, columns: u16 },
}

/// Decoder, parser and grid fed as one unit
struct TerminalEmulator {
    grid: TerminalGrid,
    parser: VtParser,
    decoder: Utf8Decoder,
}

impl TerminalEmulator {
    fn new(rows: u16, columns: u16) -> Self {
        Self {
            grid: TerminalGrid::new(rows, columns),
            parser: VtParser::new(),
            decoder: Utf8Decoder::new(),
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        let Self {
            grid,
            parser,
            decoder,
        } = self;
        decoder.decode(bytes, |ch| parser.feed(ch, grid));
    }
}

/// Shared read handle to the emulated screen
#[derive(Clone)]
pub struct Screen {
    emulator: Arc<RwLock<TerminalEmulator>>,
    events: Sender<ScreenEvent>,
}

impl Screen {
    /// New blank screen plus the receiver for its events
    pub fn new(rows: u16, columns: u16) -> (Self, Receiver<ScreenEvent>) {
        let (events, rx) = mpsc::channel();
        let screen = Self {
            emulator: Arc::new(RwLock::new(TerminalEmulator::new(rows, columns))),
            events,
        };
        (screen, rx)
    }

    fn read(&self) -> RwLockReadGuard<'_, TerminalEmulator> {
        self.emulator.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TerminalEmulator> {
        self.emulator.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: ScreenEvent) {
        // Nobody rendering is fine
        let _ = self.events.send(event);
    }

    pub fn rows(&self) -> u16 {
        self.read().grid.rows()
    }

    pub fn columns(&self) -> u16 {
        self.read().grid.columns()
    }

    pub fn cell_at(&self, row: u16, col: u16) -> char {
        self.read().grid.cell_at(row, col)
    }

    /// Cursor as (row, col). `col` equals `columns()` while a wrap is pending.
    pub fn cursor_position(&self) -> (u16, u16) {
        let cursor = self.read().grid.cursor();
        (cursor.row, cursor.col)
    }

    /// Text of every row, trailing blanks trimmed
    pub fn lines(&self) -> Vec<String> {
        let emulator = self.read();
        (0..emulator.grid.rows())
            .map(|row| emulator.grid.line_text(row))
            .collect()
    }

    /// Reallocate the grid and home the cursor. Content is not reflowed.
    pub fn resize(&self, rows: u16, columns: u16) {
        let (rows, columns) = {
            let mut emulator = self.write();
            emulator.grid.resize(rows, columns);
            (emulator.grid.rows(), emulator.grid.columns())
        };
        tracing::debug!("Screen resized to {}x{}", columns, rows);
        self.notify(ScreenEvent::Resized { rows, columns });
    }

    /// Feed raw device bytes
    pub fn feed(&self, bytes: &[u8]) {
        self.write().feed(bytes);
        self.notify(ScreenEvent::Redraw);
    }

    /// The chain worker that keeps this screen up to date
    pub fn worker(&self) -> EmulatorWorker {
        EmulatorWorker {
            screen: self.clone(),
        }
    }
}

/// Permanent worker feeding a [`Screen`]
pub struct EmulatorWorker {
    screen: Screen,
}

impl Worker for EmulatorWorker {
    fn name(&self) -> &str {
        "terminal"
    }

    fn offer(&mut self, chunk: &[u8]) -> Result<bool, WorkerError> {
        self.screen.feed(chunk);
        Ok(false)
    }

    fn is_permanent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_return_linefeed_write() {
        let (screen, _rx) = Screen::new(24, 80);
        let mut worker = screen.worker();

        assert!(!worker.offer(b"A\r\n").unwrap());
        assert_eq!(screen.cell_at(0, 0), 'A');
        assert_eq!(screen.cursor_position(), (1, 0));

        worker.offer(b"B").unwrap();
        assert_eq!(screen.cell_at(1, 0), 'B');
        assert_eq!(screen.cursor_position(), (1, 1));
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let (screen, _rx) = Screen::new(2, 10);
        let mut worker = screen.worker();
        let bytes = "é!".as_bytes();

        worker.offer(&bytes[..1]).unwrap();
        worker.offer(&bytes[1..]).unwrap();
        assert_eq!(screen.lines()[0], "é!");
    }

    #[test]
    fn test_invalid_bytes_render_as_replacement() {
        let (screen, _rx) = Screen::new(2, 10);
        screen.worker().offer(b"a\xffb").unwrap();
        assert_eq!(screen.lines()[0], "a\u{FFFD}b");
    }

    #[test]
    fn test_every_chunk_requests_redraw() {
        let (screen, rx) = Screen::new(2, 10);
        let mut worker = screen.worker();
        worker.offer(b"x").unwrap();
        worker.offer(b"y").unwrap();

        let events: Vec<ScreenEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![ScreenEvent::Redraw, ScreenEvent::Redraw]);
    }

    #[test]
    fn test_resize_notifies_and_homes_cursor() {
        let (screen, rx) = Screen::new(24, 80);
        screen.worker().offer(b"hello\r\nworld").unwrap();
        rx.try_iter().count();

        screen.resize(10, 40);
        assert_eq!((screen.rows(), screen.columns()), (10, 40));
        assert_eq!(screen.cursor_position(), (0, 0));
        assert_eq!(rx.try_recv().unwrap(), ScreenEvent::Resized { rows: 10, columns: 40 });
    }

    #[test]
    fn test_cursor_stays_in_bounds_under_flood() {
        let (screen, _rx) = Screen::new(3, 5);
        let mut worker = screen.worker();
        for _ in 0..50 {
            worker.offer(b"abcdefg\n\x1b[99B\x1b[99C\x08\tz").unwrap();
            let (row, col) = screen.cursor_position();
            assert!(row < 3);
            assert!(col <= 5);
        }
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (screen, rx) = Screen::new(2, 10);
        drop(rx);
        assert!(!screen.worker().offer(b"still fine").unwrap());
        assert_eq!(screen.lines()[0], "still fine");
    }

    #[test]
    fn test_worker_is_permanent() {
        let (screen, _rx) = Screen::new(2, 2);
        assert!(screen.worker().is_permanent());
    }
}
