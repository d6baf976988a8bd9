//! Replay of asciicast events through the terminal emulator: time
//! coalescing, dirty-row collection, cursor virtualization, and the
//! per-row line-event timeline consumed by the SVG compositor.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::mem;

use crate::asciicast::{Event, EventKind, Header, Theme};
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::render::cell::CharacterCell;
use crate::render::frame::{line_buffer_from_row, Frame, LineBuffer, LineEvent};
use crate::terminal::{CursorSnapshot, TerminalState};

/// A coalesced span of terminal output: every byte that arrived during
/// `[time_ms, time_ms + duration_ms)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameChunk {
    pub time_ms: u64,
    pub duration_ms: u64,
    pub data: Vec<u8>,
}

/// Validated screen geometry from an asciicast header.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub columns: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn from_header(header: &Header) -> Result<Self> {
        if header.width <= 0 || header.height <= 0 || header.width > i64::from(u16::MAX)
            || header.height > i64::from(u16::MAX)
        {
            return Err(Error::GeometryError {
                columns: header.width,
                rows: header.height,
            });
        }
        Ok(Self {
            columns: header.width as u16,
            rows: header.height as u16,
        })
    }
}

/// Pick the theme for a render: an explicit override wins, then the
/// recording's own theme. Rendering without any theme is refused rather
/// than silently substituting colors.
pub fn resolve_theme(header: &Header, config: &RenderConfig) -> Result<Theme> {
    config
        .theme
        .clone()
        .or_else(|| header.theme.clone())
        .ok_or_else(|| {
            Error::record("recording carries no theme and no override was given")
        })
}

/// Merge events that are close together and compute frame durations.
///
/// Every emitted frame lasts at least `min_frame_ms`. When a gap exceeds
/// `max_frame_ms` the excess is deducted from the running clock, so long
/// idle pauses collapse while later frames keep exact relative timing. The
/// final frame collects any leftover bytes and lasts `last_frame_ms`.
pub struct FrameIter<E> {
    events: E,
    min_frame_ms: u64,
    max_frame_ms: Option<u64>,
    last_frame_ms: u64,
    buffer: Vec<u8>,
    clock_ms: u64,
    dropped_s: f64,
    prev_time_s: f64,
    done: bool,
}

impl<E> FrameIter<E>
where
    E: Iterator<Item = Result<Event>>,
{
    pub fn new(
        events: E,
        min_frame_ms: u64,
        max_frame_ms: Option<u64>,
        last_frame_ms: u64,
    ) -> Self {
        Self {
            events,
            min_frame_ms: min_frame_ms.max(1),
            max_frame_ms,
            last_frame_ms: last_frame_ms.max(1),
            buffer: Vec::new(),
            clock_ms: 0,
            dropped_s: 0.0,
            prev_time_s: f64::NEG_INFINITY,
            done: false,
        }
    }

    /// Coalescer for a recording, falling back to the header's
    /// `idle_time_limit` when the caller set no cap.
    pub fn for_recording(events: E, header: &Header, config: &RenderConfig) -> Self {
        let max_frame_ms = config.max_frame_ms.or_else(|| {
            header
                .idle_time_limit
                .map(|limit| (limit * 1000.0).round() as u64)
        });
        Self::new(events, config.min_frame_ms, max_frame_ms, config.last_frame_ms)
    }
}

impl<E> Iterator for FrameIter<E>
where
    E: Iterator<Item = Result<Event>>,
{
    type Item = Result<FrameChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let event = match self.events.next() {
                None => {
                    self.done = true;
                    if self.buffer.is_empty() {
                        return None;
                    }
                    return Some(Ok(FrameChunk {
                        time_ms: self.clock_ms,
                        duration_ms: self.last_frame_ms,
                        data: mem::take(&mut self.buffer),
                    }));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(event)) => event,
            };

            if event.time < self.prev_time_s {
                self.done = true;
                return Some(Err(Error::record(format!(
                    "non-monotonic event time: {} after {}",
                    event.time, self.prev_time_s
                ))));
            }
            self.prev_time_s = event.time;

            if event.kind != EventKind::Output {
                continue;
            }

            let elapsed_s = self.clock_ms as f64 / 1000.0 + self.dropped_s;
            let mut gap_s = event.time - elapsed_s;
            if gap_s * 1000.0 >= self.min_frame_ms as f64 {
                if let Some(max_ms) = self.max_frame_ms {
                    let max_s = max_ms as f64 / 1000.0;
                    if gap_s > max_s {
                        self.dropped_s += gap_s - max_s;
                        gap_s = max_s;
                    }
                }
                let duration_ms = ((gap_s * 1000.0).round() as u64).max(self.min_frame_ms);
                let chunk = FrameChunk {
                    time_ms: self.clock_ms,
                    duration_ms,
                    data: mem::take(&mut self.buffer),
                };
                self.clock_ms += duration_ms;
                self.buffer.extend_from_slice(event.data.as_bytes());
                return Some(Ok(chunk));
            }

            self.buffer.extend_from_slice(event.data.as_bytes());
        }
    }
}

struct PendingLine {
    line: LineBuffer,
    time_ms: u64,
    duration_ms: u64,
}

/// Replay frames through the emulator and emit the per-row timeline: one
/// closed `LineEvent` for every span a row's content stayed on screen.
pub struct LineEvents<E> {
    frames: FrameIter<E>,
    parser: vte::Parser,
    term: TerminalState,
    bright_palette: bool,
    pending: BTreeMap<u16, PendingLine>,
    queue: VecDeque<LineEvent>,
    clock_ms: u64,
    last_cursor: Option<CursorSnapshot>,
    drained: bool,
}

impl<E> LineEvents<E>
where
    E: Iterator<Item = Result<Event>>,
{
    pub fn new(frames: FrameIter<E>, geometry: Geometry, bright_palette: bool) -> Self {
        Self {
            frames,
            parser: vte::Parser::new(),
            term: TerminalState::new(geometry.rows, geometry.columns),
            bright_palette,
            pending: BTreeMap::new(),
            queue: VecDeque::new(),
            clock_ms: 0,
            last_cursor: None,
            drained: false,
        }
    }

    fn process_chunk(&mut self, chunk: FrameChunk) {
        self.term.feed(&mut self.parser, &chunk.data);

        // Rows the emulator touched, plus the rows where the cursor must be
        // painted or erased.
        let mut dirty: BTreeSet<u16> = self.term.take_dirty_rows().into_iter().collect();
        let cursor = self.term.cursor_snapshot();
        if self.last_cursor != Some(cursor) {
            if cursor.visible {
                dirty.insert(cursor.row);
            }
            if let Some(last) = self.last_cursor {
                if last.visible {
                    dirty.insert(last.row);
                }
            }
        }

        let mut redraw: BTreeMap<u16, LineBuffer> = BTreeMap::new();
        for &row in &dirty {
            let line = line_buffer_from_row(self.term.active_grid().row(row), self.bright_palette);
            redraw.insert(row, line);
        }

        // The visible cursor is painted as a reverse-video overlay cell; it
        // never persists into the terminal buffer itself.
        if cursor.visible {
            if let Some(line) = redraw.get_mut(&cursor.row) {
                let text = self
                    .term
                    .active_grid()
                    .row(cursor.row)
                    .cells
                    .get(cursor.col as usize)
                    .map(|c| c.text.clone())
                    .unwrap_or_else(|| " ".to_string());
                line.insert(cursor.col, CharacterCell::cursor_overlay(&text));
            }
        }
        self.last_cursor = Some(cursor);

        let duration = chunk.duration_ms;
        let mut completed: Vec<(u16, PendingLine)> = Vec::new();

        for (&row, pending) in self.pending.iter_mut() {
            if !redraw.contains_key(&row) {
                // The line stays on screen untouched
                pending.duration_ms += duration;
            }
        }

        for (row, line) in redraw {
            if let Some(old) = self.pending.remove(&row) {
                completed.push((row, old));
            }
            if !line.is_empty() {
                self.pending.insert(
                    row,
                    PendingLine {
                        line,
                        time_ms: self.clock_ms,
                        duration_ms: duration,
                    },
                );
            }
        }

        completed.sort_by_key(|(row, p)| (p.time_ms, p.duration_ms, *row));
        self.queue.extend(completed.into_iter().map(|(row, p)| LineEvent {
            row,
            line: p.line,
            time_ms: p.time_ms,
            duration_ms: p.duration_ms,
        }));

        self.clock_ms += duration;
    }

    fn drain_pending(&mut self) {
        let pending = mem::take(&mut self.pending);
        let mut rest: Vec<(u16, PendingLine)> = pending.into_iter().collect();
        rest.sort_by_key(|(row, p)| (p.time_ms, p.duration_ms, *row));
        tracing::debug!(
            open_lines = rest.len(),
            clock_ms = self.clock_ms,
            "replay finished"
        );
        self.queue.extend(rest.into_iter().map(|(row, p)| LineEvent {
            row,
            line: p.line,
            time_ms: p.time_ms,
            duration_ms: p.duration_ms,
        }));
        self.drained = true;
    }
}

impl<E> Iterator for LineEvents<E>
where
    E: Iterator<Item = Result<Event>>,
{
    type Item = Result<LineEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(Ok(event));
            }
            if self.drained {
                return None;
            }
            match self.frames.next() {
                Some(Ok(chunk)) => self.process_chunk(chunk),
                Some(Err(e)) => {
                    self.drained = true;
                    return Some(Err(e));
                }
                None => self.drain_pending(),
            }
        }
    }
}

/// Replay frames through the emulator and emit one full-screen snapshot per
/// coalesced frame, for still-frame rendering.
pub struct Frames<E> {
    frames: FrameIter<E>,
    parser: vte::Parser,
    term: TerminalState,
    bright_palette: bool,
}

impl<E> Frames<E>
where
    E: Iterator<Item = Result<Event>>,
{
    pub fn new(frames: FrameIter<E>, geometry: Geometry, bright_palette: bool) -> Self {
        Self {
            frames,
            parser: vte::Parser::new(),
            term: TerminalState::new(geometry.rows, geometry.columns),
            bright_palette,
        }
    }
}

impl<E> Iterator for Frames<E>
where
    E: Iterator<Item = Result<Event>>,
{
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.frames.next()? {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(e)),
        };

        self.term.feed(&mut self.parser, &chunk.data);
        // Still frames are full snapshots; dirty flags only need draining.
        let _ = self.term.take_dirty_rows();
        let cursor = self.term.cursor_snapshot();

        let mut lines = BTreeMap::new();
        let grid = self.term.active_grid();
        for row in 0..grid.visible_rows {
            let mut line = line_buffer_from_row(grid.row(row), self.bright_palette);
            if cursor.visible && cursor.row == row {
                let text = grid
                    .row(row)
                    .cells
                    .get(cursor.col as usize)
                    .map(|c| c.text.clone())
                    .unwrap_or_else(|| " ".to_string());
                line.insert(cursor.col, CharacterCell::cursor_overlay(&text));
            }
            if !line.is_empty() {
                lines.insert(row, line);
            }
        }

        Some(Ok(Frame {
            time_ms: chunk.time_ms,
            duration_ms: chunk.duration_ms,
            lines,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cell::CellColor;

    fn ok_events(events: Vec<Event>) -> impl Iterator<Item = Result<Event>> {
        events.into_iter().map(Ok)
    }

    fn output(time: f64, data: &str) -> Event {
        Event::output(time, data)
    }

    fn chunk_text(chunk: &FrameChunk) -> String {
        String::from_utf8_lossy(&chunk.data).into_owned()
    }

    #[test]
    fn coalesces_with_max_cap() {
        let events = vec![
            output(0.0, "1"),
            output(5.0, "2"),
            output(8.0, "3"),
            output(20.0, "4"),
            output(21.0, "5"),
            output(30.0, "6"),
            output(31.0, "7"),
            output(32.0, "8"),
            output(33.0, "9"),
            output(43.0, "10"),
        ];
        let frames: Vec<FrameChunk> = FrameIter::new(ok_events(events), 5000, Some(6000), 1234)
            .collect::<Result<_>>()
            .unwrap();

        let summary: Vec<(u64, String, u64)> = frames
            .iter()
            .map(|f| (f.time_ms, chunk_text(f), f.duration_ms))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "1".into(), 5000),
                (5000, "23".into(), 6000),
                (11000, "45".into(), 6000),
                (17000, "6789".into(), 6000),
                (23000, "10".into(), 1234),
            ]
        );
    }

    #[test]
    fn coalesces_without_max_cap() {
        let events = vec![
            output(0.0, "1"),
            output(5.0, "2"),
            output(8.0, "3"),
            output(20.0, "4"),
            output(21.0, "5"),
            output(30.0, "6"),
            output(31.0, "7"),
            output(32.0, "8"),
            output(33.0, "9"),
            output(43.0, "10"),
        ];
        let frames: Vec<FrameChunk> = FrameIter::new(ok_events(events), 5000, None, 1234)
            .collect::<Result<_>>()
            .unwrap();

        let summary: Vec<(u64, String, u64)> = frames
            .iter()
            .map(|f| (f.time_ms, chunk_text(f), f.duration_ms))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "1".into(), 5000),
                (5000, "23".into(), 15000),
                (20000, "45".into(), 10000),
                (30000, "6789".into(), 13000),
                (43000, "10".into(), 1234),
            ]
        );
    }

    #[test]
    fn consecutive_frames_tile_the_clock() {
        let events = vec![
            output(0.0, "a"),
            output(0.4, "b"),
            output(1.1, "c"),
            output(9.0, "d"),
        ];
        let frames: Vec<FrameChunk> = FrameIter::new(ok_events(events), 1, Some(2000), 1000)
            .collect::<Result<_>>()
            .unwrap();

        for pair in frames.windows(2) {
            assert_eq!(pair[0].time_ms + pair[0].duration_ms, pair[1].time_ms);
        }
        assert!(frames.iter().all(|f| f.duration_ms >= 1));
        assert!(frames[..frames.len() - 1]
            .iter()
            .all(|f| f.duration_ms <= 2000));
        assert_eq!(frames.last().unwrap().duration_ms, 1000);
    }

    #[test]
    fn idle_gap_is_capped_and_clock_translated() {
        let events = vec![output(0.0, "a"), output(60.0, "b")];
        let frames: Vec<FrameChunk> = FrameIter::new(ok_events(events), 1, Some(1000), 500)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].duration_ms, 1000);
        // The second frame lands 59 seconds earlier than recorded
        assert_eq!(frames[1].time_ms, 1000);
        assert_eq!(frames[1].duration_ms, 500);
    }

    #[test]
    fn input_events_are_dropped() {
        let events = vec![
            output(0.0, "a"),
            Event {
                time: 0.5,
                kind: EventKind::Input,
                data: "typed".into(),
            },
            output(1.0, "b"),
        ];
        let frames: Vec<FrameChunk> = FrameIter::new(ok_events(events), 1, None, 1000)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(chunk_text(&frames[0]), "a");
        assert_eq!(chunk_text(&frames[1]), "b");
    }

    #[test]
    fn non_monotonic_times_fail() {
        let events = vec![output(1.0, "a"), output(0.5, "b")];
        let result: Result<Vec<FrameChunk>> =
            FrameIter::new(ok_events(events), 1, None, 1000).collect();
        assert!(matches!(result, Err(Error::MalformedRecord(_))));
    }

    fn geometry() -> Geometry {
        Geometry {
            columns: 80,
            rows: 24,
        }
    }

    fn collect_line_events(events: Vec<Event>, last_ms: u64) -> Vec<LineEvent> {
        let frames = FrameIter::new(ok_events(events), 1, None, last_ms);
        LineEvents::new(frames, geometry(), true)
            .collect::<Result<_>>()
            .unwrap()
    }

    fn line_text(line: &LineBuffer) -> String {
        line.values().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn single_line_single_event() {
        let events = collect_line_events(vec![output(0.0, "0\r\n")], 1000);

        // Row 0 carries the printed character; the cursor sits on row 1.
        let row0: Vec<&LineEvent> = events.iter().filter(|e| e.row == 0).collect();
        assert_eq!(row0.len(), 1);
        assert_eq!(line_text(&row0[0].line), "0");
        assert_eq!(row0[0].time_ms, 0);
        assert!(row0[0].duration_ms >= 1000);

        let row1: Vec<&LineEvent> = events.iter().filter(|e| e.row == 1).collect();
        assert_eq!(row1.len(), 1, "cursor row expected");
        assert_eq!(row1[0].line[&0].color, CellColor::Background);
        assert_eq!(row1[0].line[&0].background_color, CellColor::Foreground);
    }

    #[test]
    fn hidden_cursor_is_not_painted() {
        let events = collect_line_events(
            vec![
                output(0.0, "\x1b[?25haaaa"),
                output(1.0, "\r\n\x1b[?25lbbbb"),
                output(2.0, "\r\n\x1b[?25hcccc"),
            ],
            1000,
        );

        // First event: cursor painted after "aaaa"
        assert_eq!(events[0].row, 0);
        assert_eq!(events[0].line[&4].color, CellColor::Background);
        assert_eq!(events[0].line[&4].background_color, CellColor::Foreground);

        // Cursor erased from row 0 once it moves away
        assert_eq!(events[1].row, 0);
        assert!(!events[1].line.contains_key(&4));

        // Hidden cursor: row 1 has no overlay
        let row1 = events.iter().find(|e| e.row == 1).unwrap();
        assert!(!row1.line.contains_key(&4));

        // Visible again: row 2 carries the overlay
        let row2 = events.iter().find(|e| e.row == 2).unwrap();
        assert_eq!(row2.line[&4].color, CellColor::Background);
    }

    #[test]
    fn row_intervals_are_disjoint() {
        let events = collect_line_events(
            vec![
                output(0.0, "first"),
                output(1.0, "\rsecond"),
                output(2.0, "\rthird!"),
            ],
            1000,
        );

        let mut by_row: BTreeMap<u16, Vec<(u64, u64)>> = BTreeMap::new();
        for event in &events {
            by_row
                .entry(event.row)
                .or_default()
                .push((event.time_ms, event.time_ms + event.duration_ms));
        }
        for intervals in by_row.values_mut() {
            intervals.sort();
            for pair in intervals.windows(2) {
                assert!(
                    pair[0].1 <= pair[1].0,
                    "overlapping intervals: {:?}",
                    intervals
                );
            }
        }

        // Row 0 was rewritten three times
        assert_eq!(by_row[&0].len(), 3);
    }

    #[test]
    fn erased_line_closes_its_event() {
        let events = collect_line_events(
            vec![output(0.0, "gone"), output(1.0, "\r\x1b[2K")],
            1000,
        );

        let row0: Vec<&LineEvent> = events.iter().filter(|e| e.row == 0).collect();
        // The text span closes at 1000ms; only the cursor overlay remains on
        // row 0 afterwards. The first event carries "gone" plus the overlay
        // cell sitting after it.
        assert_eq!(line_text(&row0[0].line).trim_end(), "gone");
        assert_eq!(row0[0].time_ms, 0);
        assert_eq!(row0[0].duration_ms, 1000);
    }

    #[test]
    fn still_frames_snapshot_whole_screen() {
        let events = vec![output(0.0, "top\r\n\r\nbottom")];
        let frames = FrameIter::new(ok_events(events), 1, None, 1000);
        let frames: Vec<Frame> = Frames::new(frames, geometry(), true)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.duration_ms, 1000);
        assert_eq!(line_text(&frame.lines[&0]), "top");
        // Row 2 includes the trailing cursor overlay cell
        assert!(line_text(&frame.lines[&2]).starts_with("bottom"));
    }

    #[test]
    fn geometry_validation() {
        let header = Header {
            version: 2,
            width: 0,
            height: 24,
            theme: None,
            idle_time_limit: None,
        };
        assert!(matches!(
            Geometry::from_header(&header),
            Err(Error::GeometryError { .. })
        ));
    }
}
