//! inkcast records interactive shell sessions on a pseudo-terminal and
//! replays them as self-contained, looping SVG animations.
//!
//! The pipeline is a chain of lazy stages: asciicast records are coalesced
//! into frames, frames feed a VT-style terminal emulator that reports
//! per-row deltas, deltas become a per-row timeline of line events, and the
//! compositor turns those into deduplicated SVG groups grafted onto a
//! user-supplied template.

pub mod asciicast;
pub mod config;
pub mod error;
pub mod pty;
pub mod render;
pub mod replay;
pub mod svg;
pub mod terminal;

pub use config::RenderConfig;
pub use error::{Error, Result};

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use asciicast::RecordReader;
use replay::{resolve_theme, FrameIter, Frames, Geometry, LineEvents};
use svg::{
    compose_animation, compose_scroll, compose_still, AnimationType, Definitions, Rendered,
};

/// The default SMIL-animated template, used when the caller supplies none.
pub const DEFAULT_TEMPLATE: &[u8] = include_bytes!("../data/plain.svg");

/// A WAAPI vertical-scroll template.
pub const SCROLL_TEMPLATE: &[u8] = include_bytes!("../data/scroll.svg");

/// Render an asciicast recording as one looping SVG animation bound into
/// `template`. Nothing is written until the whole animation has composed.
pub fn render_animation<R, W>(
    input: R,
    template: &[u8],
    config: &RenderConfig,
    output: &mut W,
) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    let reader = RecordReader::new(input)?;
    let header = reader.header().clone();
    let geometry = Geometry::from_header(&header)?;
    let theme = resolve_theme(&header, config)?;
    let settings = svg::read_settings(template)?;

    tracing::debug!(
        columns = geometry.columns,
        rows = geometry.rows,
        animation = ?settings.animation,
        "rendering animation"
    );

    let frames = FrameIter::for_recording(reader, &header, config);
    let events = LineEvents::new(frames, geometry, theme.has_bright());

    let bound = match settings.animation {
        AnimationType::Css => {
            let composed = compose_animation(events, config)?;
            svg::bind(
                template,
                &settings,
                &Rendered::Animation(&composed),
                geometry,
                &theme,
                config,
            )?
        }
        AnimationType::Waapi => {
            let composed = compose_scroll(events, geometry.rows, config)?;
            svg::bind(
                template,
                &settings,
                &Rendered::Scroll(&composed),
                geometry,
                &theme,
                config,
            )?
        }
    };

    output.write_all(&bound)?;
    Ok(())
}

/// Render an asciicast recording as one static SVG per frame, written into
/// `directory` as `{prefix}_{index:05}.svg`. Returns the written paths.
pub fn render_still_frames<R>(
    input: R,
    template: &[u8],
    config: &RenderConfig,
    directory: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>>
where
    R: BufRead,
{
    let reader = RecordReader::new(input)?;
    let header = reader.header().clone();
    let geometry = Geometry::from_header(&header)?;
    let theme = resolve_theme(&header, config)?;
    let settings = svg::read_settings(template)?;

    let frames = FrameIter::for_recording(reader, &header, config);
    let mut paths = Vec::new();

    for (index, frame) in Frames::new(frames, geometry, theme.has_bright()).enumerate() {
        let frame = frame?;
        let mut definitions = Definitions::default();
        let body = compose_still(&frame, &mut definitions, config);
        let bound = svg::bind(
            template,
            &settings,
            &Rendered::Still {
                definitions: &definitions,
                body: &body,
            },
            geometry,
            &theme,
            config,
        )?;

        let path = directory.join(format!("{prefix}_{index:05}.svg"));
        std::fs::write(&path, bound)?;
        paths.push(path);
    }

    tracing::debug!(frames = paths.len(), "rendered still frames");
    Ok(paths)
}
