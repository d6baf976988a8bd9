//! SVG compositor: turns line events into background rectangles, reusable
//! text groups, and SMIL-animated frame groups. Markup is written with
//! `std::fmt::Write` in a fixed attribute order so that identical content
//! always serializes identically; the definition table is keyed on that
//! canonical serialization.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::config::RenderConfig;
use crate::error::Result;
use crate::render::cell::{CellColor, CharacterCell};
use crate::render::frame::{Frame, LineBuffer, LineEvent};

/// The sentinel id stamped onto the final `<animate>` so that every chained
/// `begin` resolves and the animation loops.
pub const ANIM_LAST: &str = "anim_last";

/// Content-addressed table of rendered line-text groups. Ids are assigned in
/// first-seen order and never dropped within one render.
#[derive(Debug, Default)]
pub struct Definitions {
    ids: HashMap<String, u32>,
    entries: Vec<String>,
}

impl Definitions {
    /// Intern a canonical text-group body, returning its id and whether a
    /// new definition was created.
    fn intern(&mut self, body: String) -> (u32, bool) {
        if let Some(&id) = self.ids.get(&body) {
            return (id, false);
        }
        let id = self.ids.len() as u32 + 1;
        let mut entry = String::with_capacity(body.len() + 16);
        let _ = write!(entry, "<g id=\"g{}\">{}</g>", id, body);
        self.entries.push(entry);
        self.ids.insert(body, id);
        (id, true)
    }

    /// Serialized definitions in assignment order, ready for `<defs>`.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An animation composed from line events: frame groups chained to the
/// `anim_last` sentinel, plus the definitions they reference.
#[derive(Debug)]
pub struct ComposedAnimation {
    pub definitions: Definitions,
    pub groups: Vec<String>,
    /// Loop period: the end of the last visible span.
    pub duration_ms: u64,
}

/// A vertical-scroll layout for WAAPI-driven templates: per-time views
/// stacked below one another, and the keyframes that scroll through them.
#[derive(Debug)]
pub struct ComposedScroll {
    pub definitions: Definitions,
    pub views: Vec<String>,
    /// JSON array of WAAPI keyframes, one per view.
    pub keyframes: String,
    pub duration_ms: u64,
}

fn color_attr(out: &mut String, color: CellColor) {
    match color {
        CellColor::Foreground => out.push_str("class=\"foreground\""),
        CellColor::Background => out.push_str("class=\"background\""),
        CellColor::Indexed(i) => {
            let _ = write!(out, "class=\"color{}\"", i);
        }
        CellColor::Rgb(rgb) => {
            let _ = write!(out, "fill=\"#{:06x}\"", rgb);
        }
    }
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            // Keep run widths: spaces collapse in XML, non-breaking ones don't
            ' ' => out.push('\u{00A0}'),
            c => out.push(c),
        }
    }
}

/// The cells of a line in visual order: `(column, cell, display width)` with
/// wide-glyph spacer columns consumed.
fn visual_cells(line: &LineBuffer) -> Vec<(u16, &CharacterCell, u16)> {
    let mut out = Vec::with_capacity(line.len());
    let mut iter = line.iter().peekable();
    while let Some((&col, cell)) = iter.next() {
        let width = cell.display_width();
        if width == 2 {
            if let Some(&(&next_col, next_cell)) = iter.peek() {
                if next_col == col + 1 && next_cell == cell {
                    iter.next();
                }
            }
        }
        out.push((col, cell, width));
    }
    out
}

/// Emit one rectangle per maximal run of adjacent columns sharing a
/// non-default background color.
fn render_line_bg(out: &mut String, line: &LineBuffer, y: u64, config: &RenderConfig) {
    let cells = visual_cells(line);
    let cw = u64::from(config.cell_width);
    let ch = u64::from(config.cell_height);

    let mut i = 0;
    while i < cells.len() {
        let (start_col, first, first_width) = cells[i];
        let bg = first.background_color;
        let mut width_cells = u64::from(first_width);
        let mut expected = start_col + first_width;
        let mut j = i + 1;
        while j < cells.len() {
            let (col, cell, width) = cells[j];
            if col != expected || cell.background_color != bg {
                break;
            }
            width_cells += u64::from(width);
            expected = col + width;
            j += 1;
        }

        if bg != CellColor::Background {
            let _ = write!(
                out,
                "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" ",
                u64::from(start_col) * cw,
                y,
                width_cells * cw,
                ch,
            );
            color_attr(out, bg);
            out.push_str("/>");
        }
        i = j;
    }
}

fn style_key(cell: &CharacterCell) -> (CellColor, bool, bool, bool, bool) {
    (
        cell.color,
        cell.bold,
        cell.italic,
        cell.underline,
        cell.strikethrough,
    )
}

/// Render the text content of a line as a canonical group body: one `<text>`
/// per maximal run of adjacent columns with identical style. The `y` offset
/// is left to the `<use>` reference so identical lines dedupe across rows.
fn render_line_text(line: &LineBuffer, config: &RenderConfig) -> String {
    let cells = visual_cells(line);
    let cw = u64::from(config.cell_width);
    let mut body = String::new();

    let mut i = 0;
    while i < cells.len() {
        let (start_col, first, first_width) = cells[i];
        let key = style_key(first);
        let mut width_cells = u64::from(first_width);
        let mut expected = start_col + first_width;
        let mut text = String::new();
        text.push_str(&first.text);

        let mut j = i + 1;
        while j < cells.len() {
            let (col, cell, width) = cells[j];
            if col != expected || style_key(cell) != key {
                break;
            }
            text.push_str(&cell.text);
            width_cells += u64::from(width);
            expected = col + width;
            j += 1;
        }

        let _ = write!(
            body,
            "<text x=\"{}\" textLength=\"{}\" lengthAdjust=\"spacingAndGlyphs\" ",
            u64::from(start_col) * cw,
            width_cells * cw,
        );
        color_attr(&mut body, first.color);
        if first.bold {
            body.push_str(" font-weight=\"bold\"");
        }
        if first.italic {
            body.push_str(" font-style=\"italic\"");
        }
        if first.underline || first.strikethrough {
            body.push_str(" text-decoration=\"");
            if first.underline {
                body.push_str("underline");
            }
            if first.strikethrough {
                if first.underline {
                    body.push(' ');
                }
                body.push_str("line-through");
            }
            body.push('"');
        }
        body.push('>');
        escape_text(&mut body, &text);
        body.push_str("</text>");

        i = j;
    }

    body
}

/// Emit one line event into a frame group: background rectangles followed by
/// a `<use>` of the interned text group.
fn render_event(out: &mut String, defs: &mut Definitions, line: &LineBuffer, y: u64, config: &RenderConfig) {
    render_line_bg(out, line, y, config);
    let body = render_line_text(line, config);
    let (id, _) = defs.intern(body);
    let _ = write!(out, "<use xlink:href=\"#g{}\" y=\"{}\"/>", id, y);
}

struct BufferedGroup {
    body: String,
    time_ms: u64,
    duration_ms: u64,
}

impl BufferedGroup {
    /// Serialize the group. The sentinel id is only known once iteration has
    /// finished, so the last group stays buffered until then; serialized
    /// text is never edited after the fact.
    fn finalize(self, last: bool) -> String {
        let mut out = String::with_capacity(self.body.len() + 160);
        out.push_str("<g display=\"none\">");
        out.push_str(&self.body);
        out.push_str("<animate attributeName=\"display\" from=\"inline\" to=\"inline\" begin=\"");
        if self.time_ms == 0 {
            let _ = write!(out, "0ms; {}.end", ANIM_LAST);
        } else {
            let _ = write!(out, "{}ms; {}.end+{}ms", self.time_ms, ANIM_LAST, self.time_ms);
        }
        let _ = write!(out, "\" dur=\"{}ms\"", self.duration_ms);
        if last {
            let _ = write!(out, " id=\"{}\"", ANIM_LAST);
        }
        out.push_str("/></g>");
        out
    }
}

/// Compose the SMIL animation: one `<g display="none">` per group of
/// co-timed line events, each carrying a `display` animation chained to the
/// loop sentinel.
pub fn compose_animation<I>(events: I, config: &RenderConfig) -> Result<ComposedAnimation>
where
    I: Iterator<Item = Result<LineEvent>>,
{
    let mut defs = Definitions::default();
    let mut groups: Vec<String> = Vec::new();
    let mut buffered: Option<BufferedGroup> = None;
    let mut current: Option<(u64, u64, String)> = None;
    let mut duration_ms = 0u64;

    let ch = u64::from(config.cell_height);

    for event in events {
        let event = event?;
        duration_ms = duration_ms.max(event.time_ms + event.duration_ms);
        let key = (event.time_ms, event.duration_ms);

        let start_new = match &current {
            Some((t, d, _)) => (*t, *d) != key,
            None => true,
        };
        if start_new {
            if let Some((t, d, body)) = current.take() {
                if let Some(prev) = buffered.take() {
                    groups.push(prev.finalize(false));
                }
                buffered = Some(BufferedGroup {
                    body,
                    time_ms: t,
                    duration_ms: d,
                });
            }
            current = Some((key.0, key.1, String::new()));
        }

        let (_, _, body) = current.as_mut().expect("current group exists");
        let y = u64::from(event.row) * ch;
        render_event(body, &mut defs, &event.line, y, config);
    }

    if let Some((t, d, body)) = current.take() {
        if let Some(prev) = buffered.take() {
            groups.push(prev.finalize(false));
        }
        buffered = Some(BufferedGroup {
            body,
            time_ms: t,
            duration_ms: d,
        });
    }
    if let Some(last) = buffered.take() {
        groups.push(last.finalize(true));
    }

    tracing::debug!(
        groups = groups.len(),
        definitions = defs.len(),
        duration_ms,
        "composed animation"
    );

    Ok(ComposedAnimation {
        definitions: defs,
        groups,
        duration_ms,
    })
}

/// Render one full frame as a static group: every non-empty row becomes a
/// background+text group anchored at its row offset, with no animation.
pub fn compose_still(frame: &Frame, defs: &mut Definitions, config: &RenderConfig) -> String {
    let ch = u64::from(config.cell_height);
    let mut out = String::new();
    for (&row, line) in &frame.lines {
        let y = u64::from(row) * ch;
        out.push_str("<g>");
        render_event(&mut out, defs, line, y, config);
        out.push_str("</g>");
    }
    out
}

/// Compose the vertical-scroll layout for WAAPI templates: the screen state
/// at every distinct event time becomes one view, views are stacked
/// downward, and the keyframe list steps the stack upward through the
/// viewport. The whole event set is buffered; the per-time views cannot be
/// known until every row's span is.
pub fn compose_scroll<I>(
    events: I,
    screen_rows: u16,
    config: &RenderConfig,
) -> Result<ComposedScroll>
where
    I: Iterator<Item = Result<LineEvent>>,
{
    let events: Vec<LineEvent> = events.collect::<Result<_>>()?;
    let mut defs = Definitions::default();
    let ch = u64::from(config.cell_height);
    let stride = (u64::from(screen_rows) + u64::from(config.frame_cell_spacing)) * ch;

    let duration_ms = events
        .iter()
        .map(|e| e.time_ms + e.duration_ms)
        .max()
        .unwrap_or(0);

    // Every distinct appearance time gets a view; an initial blank view
    // covers any leading pause.
    let mut times: BTreeSet<u64> = events.iter().map(|e| e.time_ms).collect();
    times.insert(0);

    let mut views = Vec::with_capacity(times.len());
    let mut keyframes = String::from("[");
    for (index, &time) in times.iter().enumerate() {
        let base = index as u64 * stride;

        let mut view = String::new();
        view.push_str("<g>");
        for event in &events {
            if event.time_ms <= time && time < event.time_ms + event.duration_ms {
                let y = base + u64::from(event.row) * ch;
                render_event(&mut view, &mut defs, &event.line, y, config);
            }
        }
        view.push_str("</g>");
        views.push(view);

        let offset = if duration_ms == 0 {
            0.0
        } else {
            time as f64 / duration_ms as f64
        };
        if index > 0 {
            keyframes.push_str(", ");
        }
        let _ = write!(
            keyframes,
            "{{\"transform\": \"translate3D(0, -{}px, 0)\", \"easing\": \"steps(1, end)\", \"offset\": {}}}",
            base, offset
        );
    }
    keyframes.push(']');

    tracing::debug!(
        views = views.len(),
        definitions = defs.len(),
        duration_ms,
        "composed scroll layout"
    );

    Ok(ComposedScroll {
        definitions: defs,
        views,
        keyframes,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cell::CellColor;
    use std::collections::BTreeMap;

    fn cell(text: &str, color: CellColor, bg: CellColor) -> CharacterCell {
        CharacterCell {
            text: text.to_string(),
            color,
            background_color: bg,
            bold: false,
            italic: false,
            underline: false,
            strikethrough: false,
        }
    }

    fn plain(text: &str) -> CharacterCell {
        cell(text, CellColor::Foreground, CellColor::Background)
    }

    fn line_of(entries: Vec<(u16, CharacterCell)>) -> LineBuffer {
        entries.into_iter().collect()
    }

    fn config() -> RenderConfig {
        RenderConfig::default()
    }

    #[test]
    fn bg_rects_group_runs_and_skip_default() {
        let red = CellColor::Indexed(1);
        let blue = CellColor::Indexed(4);
        let line = line_of(vec![
            (0, cell("A", CellColor::Foreground, red)),
            (1, cell("A", CellColor::Foreground, red)),
            (3, cell("A", CellColor::Foreground, red)),
            (4, cell("A", CellColor::Foreground, blue)),
            (6, cell("A", CellColor::Foreground, blue)),
            (7, cell("A", CellColor::Foreground, blue)),
            (8, cell("A", CellColor::Foreground, CellColor::Rgb(0x123456))),
            (9, cell("A", CellColor::Foreground, CellColor::Background)),
        ]);

        let mut out = String::new();
        render_line_bg(&mut out, &line, 17, &config());

        assert!(out.contains("<rect x=\"0\" y=\"17\" width=\"16\" height=\"17\" class=\"color1\"/>"));
        assert!(out.contains("<rect x=\"24\" y=\"17\" width=\"8\" height=\"17\" class=\"color1\"/>"));
        assert!(out.contains("<rect x=\"32\" y=\"17\" width=\"8\" height=\"17\" class=\"color4\"/>"));
        assert!(out.contains("<rect x=\"48\" y=\"17\" width=\"16\" height=\"17\" class=\"color4\"/>"));
        assert!(out.contains("<rect x=\"64\" y=\"17\" width=\"8\" height=\"17\" fill=\"#123456\"/>"));
        // The default-background cell produces no rectangle
        assert!(!out.contains("x=\"72\""));
    }

    #[test]
    fn text_runs_split_on_style_changes() {
        let mut bold = plain("H");
        bold.bold = true;
        let mut italic = plain("I");
        italic.italic = true;
        let mut decorated = plain("L");
        decorated.underline = true;
        decorated.strikethrough = true;

        let line = line_of(vec![
            (0, cell("A", CellColor::Indexed(1), CellColor::Background)),
            (1, cell("B", CellColor::Indexed(4), CellColor::Background)),
            (2, cell("C", CellColor::Indexed(4), CellColor::Background)),
            (7, cell("D", CellColor::Rgb(0x00ff00), CellColor::Background)),
            (20, bold),
            (30, italic),
            (40, decorated),
        ]);

        let body = render_line_text(&line, &config());

        assert!(body.contains(
            "<text x=\"0\" textLength=\"8\" lengthAdjust=\"spacingAndGlyphs\" class=\"color1\">A</text>"
        ));
        assert!(body.contains(
            "<text x=\"8\" textLength=\"16\" lengthAdjust=\"spacingAndGlyphs\" class=\"color4\">BC</text>"
        ));
        assert!(body.contains("<text x=\"56\" textLength=\"8\" lengthAdjust=\"spacingAndGlyphs\" fill=\"#00ff00\">D</text>"));
        assert!(body.contains("font-weight=\"bold\""));
        assert!(body.contains("font-style=\"italic\""));
        assert!(body.contains("text-decoration=\"underline line-through\""));
        // Plain runs carry no style attributes
        assert!(!body.contains("<text x=\"0\" textLength=\"8\" lengthAdjust=\"spacingAndGlyphs\" class=\"color1\" font-weight"));
    }

    #[test]
    fn spaces_become_non_breaking() {
        let line = line_of(vec![
            (0, cell("a", CellColor::Foreground, CellColor::Indexed(1))),
            (1, cell(" ", CellColor::Foreground, CellColor::Indexed(1))),
            (2, cell("b", CellColor::Foreground, CellColor::Indexed(1))),
        ]);
        let body = render_line_text(&line, &config());
        assert!(body.contains("a\u{00A0}b"));
    }

    #[test]
    fn markup_characters_are_escaped() {
        let line = line_of(vec![
            (0, plain("<")),
            (1, plain("&")),
            (2, plain(">")),
        ]);
        let body = render_line_text(&line, &config());
        assert!(body.contains("&lt;&amp;&gt;"));
    }

    #[test]
    fn wide_glyph_counts_two_cells() {
        let wide = plain("漢");
        let line = line_of(vec![(0, wide.clone()), (1, wide), (2, plain("a"))]);
        let body = render_line_text(&line, &config());

        // One run: 2 cells for the glyph + 1 for 'a' = 24 units, text "漢a"
        assert!(body.contains("textLength=\"24\""), "body: {body}");
        assert!(body.contains(">漢a</text>"));
    }

    fn event(row: u16, text: &str, time_ms: u64, duration_ms: u64) -> Result<LineEvent> {
        let line: LineBuffer = text
            .chars()
            .enumerate()
            .map(|(i, c)| (i as u16, plain(&c.to_string())))
            .collect();
        Ok(LineEvent {
            row,
            line,
            time_ms,
            duration_ms,
        })
    }

    #[test]
    fn identical_lines_share_one_definition() {
        let events = vec![event(4, "line4", 0, 60), event(5, "line4", 60, 60)];
        let composed = compose_animation(events.into_iter(), &config()).unwrap();

        assert_eq!(composed.definitions.len(), 1);
        assert!(composed.definitions.entries()[0].starts_with("<g id=\"g1\">"));

        let all: String = composed.groups.concat();
        assert_eq!(all.matches("<use xlink:href=\"#g1\"").count(), 2);
        assert!(all.contains("y=\"68\""));
        assert!(all.contains("y=\"85\""));
    }

    #[test]
    fn animation_chains_to_sentinel() {
        let events = vec![
            event(0, "a", 0, 100),
            event(1, "b", 100, 50),
            event(2, "c", 150, 50),
        ];
        let composed = compose_animation(events.into_iter(), &config()).unwrap();

        assert_eq!(composed.groups.len(), 3);
        assert_eq!(composed.duration_ms, 200);

        assert!(composed.groups[0].contains("begin=\"0ms; anim_last.end\""));
        assert!(composed.groups[1].contains("begin=\"100ms; anim_last.end+100ms\""));
        assert!(composed.groups[2].contains("begin=\"150ms; anim_last.end+150ms\""));

        // Exactly one animate carries the sentinel id, and it is the last one
        let all: String = composed.groups.concat();
        assert_eq!(all.matches("id=\"anim_last\"").count(), 1);
        assert!(composed.groups[2].contains("id=\"anim_last\""));
        assert!(composed.groups[2].contains("dur=\"50ms\""));
    }

    #[test]
    fn co_timed_events_share_a_group() {
        let events = vec![
            event(0, "a", 0, 100),
            event(1, "b", 0, 100),
            event(2, "c", 100, 50),
        ];
        let composed = compose_animation(events.into_iter(), &config()).unwrap();

        assert_eq!(composed.groups.len(), 2);
        assert_eq!(composed.groups[0].matches("<use ").count(), 2);
    }

    #[test]
    fn definitions_are_distinct_and_referenced() {
        let events = vec![
            event(0, "alpha", 0, 100),
            event(1, "beta", 0, 100),
            event(2, "alpha", 100, 50),
        ];
        let composed = compose_animation(events.into_iter(), &config()).unwrap();

        assert_eq!(composed.definitions.len(), 2);
        let mut seen = std::collections::HashSet::new();
        for entry in composed.definitions.entries() {
            assert!(seen.insert(entry.clone()), "duplicate definition");
        }
        let all: String = composed.groups.concat();
        for id in 1..=2 {
            assert!(all.contains(&format!("xlink:href=\"#g{id}\"")));
        }
    }

    #[test]
    fn still_frame_renders_rows_without_animation() {
        let mut lines = BTreeMap::new();
        lines.insert(0u16, line_of(vec![(0, plain("x"))]));
        lines.insert(3u16, line_of(vec![(2, plain("y"))]));
        let frame = Frame {
            time_ms: 0,
            duration_ms: 100,
            lines,
        };

        let mut defs = Definitions::default();
        let out = compose_still(&frame, &mut defs, &config());

        assert_eq!(defs.len(), 2);
        assert!(out.contains("y=\"0\""));
        assert!(out.contains("y=\"51\""));
        assert!(!out.contains("<animate"));
    }

    #[test]
    fn scroll_layout_stacks_views() {
        let events = vec![event(0, "one", 0, 100), event(0, "two", 100, 100)];
        let composed = compose_scroll(events.into_iter(), 24, &config()).unwrap();

        assert_eq!(composed.duration_ms, 200);
        assert_eq!(composed.views.len(), 2);
        // Second view is offset by one full screen: 24 rows * 17 units
        assert!(composed.views[1].contains("y=\"408\""));

        assert!(composed.keyframes.starts_with('['));
        assert!(composed
            .keyframes
            .contains("\"transform\": \"translate3D(0, -0px, 0)\""));
        assert!(composed
            .keyframes
            .contains("\"transform\": \"translate3D(0, -408px, 0)\""));
        assert!(composed.keyframes.contains("\"offset\": 0.5"));
        assert!(composed.keyframes.contains("steps(1, end)"));
    }

    #[test]
    fn scroll_layout_covers_leading_pause() {
        let events = vec![event(0, "late", 500, 500)];
        let composed = compose_scroll(events.into_iter(), 24, &config()).unwrap();

        // A blank view holds the screen until the first line appears
        assert_eq!(composed.views.len(), 2);
        assert_eq!(composed.views[0], "<g></g>");
        assert!(composed.keyframes.contains("\"offset\": 0}"));
        assert!(composed.keyframes.contains("\"offset\": 0.5}"));
    }

    #[test]
    fn scroll_respects_cell_spacing() {
        let mut cfg = config();
        cfg.frame_cell_spacing = 2;
        let events = vec![event(0, "one", 0, 100), event(0, "two", 100, 100)];
        let composed = compose_scroll(events.into_iter(), 24, &cfg).unwrap();

        // Stride: (24 + 2) * 17 = 442
        assert!(composed.views[1].contains("y=\"442\""));
        assert!(composed
            .keyframes
            .contains("\"transform\": \"translate3D(0, -442px, 0)\""));
    }
}
