use chrono::Utc;

/// A single grayscale frame pulled from the video source.
///
/// Owned by the pipeline until consumed by the handler chain; immutable
/// once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Row-major luma pixels, one byte per pixel.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonically increasing capture sequence number.
    pub seq: u64,
    /// Arrival instant, Unix millis.
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            seq,
            captured_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Copy out a sub-rectangle, clamped to the frame bounds.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Screen {
        let x1 = x.saturating_add(w).min(self.width);
        let y1 = y.saturating_add(h).min(self.height);
        let x0 = x.min(x1);
        let y0 = y.min(y1);
        let (cw, ch) = (x1 - x0, y1 - y0);
        let mut pixels = Vec::with_capacity((cw * ch) as usize);
        for row in y0..y1 {
            let base = (row * self.width) as usize;
            pixels.extend_from_slice(&self.pixels[base + x0 as usize..base + x1 as usize]);
        }
        Screen {
            pixels,
            width: cw,
            height: ch,
        }
    }
}

/// A derived grayscale raster with no capture metadata, e.g. the canonical
/// screen or the timestamp strip. Row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One contiguous recognized text segment on one row of a matched frame.
/// Rebuilt every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRun {
    /// Pixel row of the band the run sits on.
    pub row: u32,
    /// Column of the first glyph in the run.
    pub x_start: u32,
    /// Column of the last glyph in the run.
    pub x_end: u32,
    pub text: String,
}

/// Shared per-frame record, passed by exclusive reference through the
/// handler chain for the lifetime of one frame, then discarded.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub frame: Frame,
    /// Canonical screen, set by the extraction handler.
    pub screen: Option<Screen>,
    /// Whether the canonical screen differs from the previous frame's.
    pub changed: bool,
    /// Count of frames seen by the extraction handler.
    pub frame_n: u64,
    /// Recognized text runs, set by the OCR handler.
    pub text: Vec<MatchRun>,
    /// Last known good formatted clock readout.
    pub timestamp: String,
    /// Last known good elapsed seconds.
    pub timestamp_s: u32,
}

impl FrameRecord {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            screen: None,
            changed: false,
            frame_n: 0,
            text: Vec::new(),
            timestamp: "0d0h0m0s".to_string(),
            timestamp_s: 0,
        }
    }
}
