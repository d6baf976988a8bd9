//! asciicast v1/v2 records.
//!
//! Both format versions are decoded; only v2 is encoded. Format references:
//! <https://github.com/asciinema/asciinema/blob/develop/doc/asciicast-v1.md>
//! <https://github.com/asciinema/asciinema/blob/develop/doc/asciicast-v2.md>

use std::io::BufRead;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Color theme of the recorded terminal. All colors are `#rrggbb` strings;
/// the palette carries either 8 or 16 slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    fg: String,
    bg: String,
    palette: Vec<String>,
}

impl Theme {
    /// Build a theme from literal color values. The first 16 palette slots
    /// must be valid colors; a palette that long is kept whole. A palette of
    /// 8 to 15 entries keeps only the first 8 (no bright slots); anything
    /// shorter is rejected.
    pub fn new(fg: &str, bg: &str, palette: &str) -> Result<Self> {
        if !is_color(fg) {
            return Err(Error::InvalidColor(format!("foreground: {fg}")));
        }
        if !is_color(bg) {
            return Err(Error::InvalidColor(format!("background: {bg}")));
        }

        let colors: Vec<&str> = palette.split(':').collect();
        let (validate, keep) = if colors.len() >= 16 {
            (16, colors.len())
        } else if colors.len() >= 8 {
            (8, 8)
        } else {
            return Err(Error::InvalidColor(format!(
                "palette must carry 8 or 16 colors, got {}",
                colors.len()
            )));
        };
        for c in &colors[..validate] {
            if !is_color(c) {
                return Err(Error::InvalidColor(format!("palette entry: {c}")));
            }
        }

        Ok(Self {
            fg: fg.to_string(),
            bg: bg.to_string(),
            palette: colors[..keep].iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn foreground(&self) -> &str {
        &self.fg
    }

    pub fn background(&self) -> &str {
        &self.bg
    }

    /// Whether the palette carries the bright 8-15 slots.
    pub fn has_bright(&self) -> bool {
        self.palette.len() >= 16
    }

    pub fn palette(&self) -> &[String] {
        &self.palette
    }

    fn palette_string(&self) -> String {
        self.palette.join(":")
    }
}

fn is_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Header record: format version, screen geometry, optional theme and idle
/// time limit. Geometry is kept signed so non-positive values surface as a
/// `GeometryError` at replay time rather than a parse failure.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u32,
    pub width: i64,
    pub height: i64,
    pub theme: Option<Theme>,
    pub idle_time_limit: Option<f64>,
}

impl Header {
    fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::record("header is not a JSON object"))?;

        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::record("header is missing an integer version"))?;
        let width = obj
            .get("width")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::record("header is missing an integer width"))?;
        let height = obj
            .get("height")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::record("header is missing an integer height"))?;

        let theme = match obj.get("theme") {
            None | Some(Value::Null) => None,
            Some(value) => Some(theme_from_value(value)?),
        };

        let idle_time_limit = match obj.get("idle_time_limit") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                Error::record("idle_time_limit must be a number")
            })?),
        };

        Ok(Self {
            version: version as u32,
            width,
            height,
            theme,
            idle_time_limit,
        })
    }

    /// Serialize as one asciicast v2 header line.
    pub fn to_json_line(&self) -> String {
        #[derive(Serialize)]
        struct ThemeJson<'a> {
            fg: &'a str,
            bg: &'a str,
            palette: String,
        }
        #[derive(Serialize)]
        struct HeaderJson<'a> {
            version: u32,
            width: i64,
            height: i64,
            #[serde(skip_serializing_if = "Option::is_none")]
            theme: Option<ThemeJson<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            idle_time_limit: Option<f64>,
        }

        let json = HeaderJson {
            version: self.version,
            width: self.width,
            height: self.height,
            theme: self.theme.as_ref().map(|t| ThemeJson {
                fg: t.foreground(),
                bg: t.background(),
                palette: t.palette_string(),
            }),
            idle_time_limit: self.idle_time_limit,
        };
        serde_json::to_string(&json).expect("header serialization cannot fail")
    }
}

fn theme_from_value(value: &Value) -> Result<Theme> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::record("theme is not a JSON object"))?;
    let fg = obj
        .get("fg")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::record("theme is missing fg"))?;
    let bg = obj
        .get("bg")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::record("theme is missing bg"))?;
    let palette = obj
        .get("palette")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::record("theme is missing palette"))?;
    Theme::new(fg, bg, palette)
}

/// Which side of the terminal a chunk was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Data written by the recorded process (`"o"`).
    Output,
    /// Data typed by the user (`"i"`); dropped during replay.
    Input,
}

/// Event record: seconds since the start of the recording, direction tag,
/// and the captured data.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
    pub data: String,
}

impl Event {
    pub fn output(time: f64, data: impl Into<String>) -> Self {
        Self {
            time,
            kind: EventKind::Output,
            data: data.into(),
        }
    }

    fn from_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::record(format!("invalid JSON event: {e}")))?;
        let arr = value
            .as_array()
            .ok_or_else(|| Error::record(format!("unexpected record: {}", truncate(line))))?;
        if arr.len() != 3 {
            return Err(Error::record(format!(
                "event must have 3 fields, got {}",
                arr.len()
            )));
        }

        let time = arr[0]
            .as_f64()
            .ok_or_else(|| Error::record("event time must be a number"))?;
        let code = arr[1]
            .as_str()
            .ok_or_else(|| Error::record("event type must be a string"))?;
        let data = arr[2]
            .as_str()
            .ok_or_else(|| Error::record("event data must be a string"))?;

        let kind = match code {
            "o" => EventKind::Output,
            _ => EventKind::Input,
        };

        Ok(Self {
            time,
            kind,
            data: data.to_string(),
        })
    }

    /// Serialize as one asciicast v2 event line.
    pub fn to_json_line(&self) -> String {
        let code = match self.kind {
            EventKind::Output => "o",
            EventKind::Input => "i",
        };
        serde_json::to_string(&(self.time, code, &self.data))
            .expect("event serialization cannot fail")
    }
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= 20 {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(20).collect::<String>())
    }
}

enum Source<R> {
    V2(std::io::Lines<R>),
    V1(std::vec::IntoIter<Event>),
}

/// Streaming reader over an asciicast recording. v2 input is decoded lazily
/// line by line; v1 input is converted to absolute-time v2 events up front.
pub struct RecordReader<R> {
    header: Header,
    source: Source<R>,
}

impl<R> std::fmt::Debug for RecordReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader").finish_non_exhaustive()
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut first = String::new();
        reader.read_line(&mut first)?;
        if first.trim().is_empty() {
            return Err(Error::record("missing header"));
        }

        match serde_json::from_str::<Value>(&first) {
            Ok(value) if value.is_object() => {
                let header = Header::from_value(&value)?;
                match header.version {
                    2 => Ok(Self {
                        header,
                        source: Source::V2(reader.lines()),
                    }),
                    1 => Self::from_v1(first, reader),
                    v => Err(Error::record(format!("unsupported version: {v}"))),
                }
            }
            // A v1 document may be pretty-printed across lines; retry with
            // the whole input.
            Ok(_) | Err(_) => Self::from_v1(first, reader),
        }
    }

    fn from_v1(first_line: String, mut reader: R) -> Result<Self> {
        let mut document = first_line;
        reader.read_to_string(&mut document)?;

        let value: Value = serde_json::from_str(&document)
            .map_err(|e| Error::record(format!("invalid JSON document: {e}")))?;
        let mut header = Header::from_value(&value)?;
        if header.version != 1 {
            return Err(Error::record(format!(
                "unsupported version: {}",
                header.version
            )));
        }

        let stdout = value
            .get("stdout")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::record("v1 document is missing the stdout array"))?;

        let mut events = Vec::with_capacity(stdout.len());
        let mut time = 0.0f64;
        for entry in stdout {
            let pair = entry
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| Error::record("v1 stdout entry must be a [delta, data] pair"))?;
            let delta = pair[0]
                .as_f64()
                .ok_or_else(|| Error::record("v1 delta must be a number"))?;
            let data = pair[1]
                .as_str()
                .ok_or_else(|| Error::record("v1 data must be a string"))?;
            time += delta;
            events.push(Event::output(time, data));
        }

        header.version = 2;
        Ok(Self {
            header,
            source: Source::V1(events.into_iter()),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::V1(events) => events.next().map(Ok),
            Source::V2(lines) => loop {
                match lines.next()? {
                    Err(e) => return Some(Err(e.into())),
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => return Some(Event::from_line(&line)),
                }
            },
        }
    }
}
