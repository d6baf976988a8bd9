use crate::asciicast::Theme;

/// Options recognized by the rendering pipeline. Populated by the caller or
/// the command line; there is no config file.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Floor on the inter-frame gap during coalescing, in milliseconds.
    /// Must be at least 1: zero-duration SMIL animations break.
    pub min_frame_ms: u64,
    /// Cap on the inter-frame gap. Defaults to the recording's
    /// `idle_time_limit` when unset.
    pub max_frame_ms: Option<u64>,
    /// Synthetic pause appended to the final frame, in milliseconds.
    pub last_frame_ms: u64,
    /// SVG user-unit width of one terminal cell.
    pub cell_width: u32,
    /// SVG user-unit height of one terminal cell.
    pub cell_height: u32,
    /// Extra blank cell rows between stacked views in vertical-scroll mode.
    pub frame_cell_spacing: u16,
    /// Render one static SVG per frame instead of an animation.
    pub still_frames: bool,
    /// Literal theme override; wins over the recording's own theme.
    pub theme: Option<Theme>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_frame_ms: 1,
            max_frame_ms: None,
            last_frame_ms: 1000,
            cell_width: 8,
            cell_height: 17,
            frame_cell_spacing: 0,
            still_frames: false,
            theme: None,
        }
    }
}
