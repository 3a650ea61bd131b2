use image::imageops::FilterType;
use image::GrayImage;
use tilewatch_common::config::ScreenConfig;
use tilewatch_common::frame::{Frame, FrameRecord, Screen};

use super::{Flow, FrameHandler, HandlerError};

/// Crops the emulated display out of each raw frame, resamples it to the
/// canonical resolution, and flags whether it changed since the previous
/// frame. An unchanged screen stops the chain early — downstream handlers
/// would only repeat themselves.
pub struct ScreenExtractor {
    cfg: ScreenConfig,
    /// 2-bit truncation of the previous canonical screen.
    last_trunc: Option<Vec<u8>>,
    frames: u64,
}

impl ScreenExtractor {
    pub fn new(cfg: ScreenConfig) -> Self {
        Self {
            cfg,
            last_trunc: None,
            frames: 0,
        }
    }
}

/// Crop and area-resample a raw frame to the canonical screen.
pub fn extract_screen(frame: &Frame, cfg: &ScreenConfig) -> Result<Screen, HandlerError> {
    let [sx, sy] = cfg.source_position;
    let [sw, sh] = cfg.source_size;
    let [tw, th] = cfg.size;
    let crop = frame.crop(sx, sy, sw, sh);
    if crop.width == 0 || crop.height == 0 {
        return Err(HandlerError::Other(format!(
            "screen rectangle {sx},{sy} {sw}x{sh} lies outside a {}x{} frame",
            frame.width, frame.height
        )));
    }
    let img: GrayImage = GrayImage::from_raw(crop.width, crop.height, crop.pixels)
        .ok_or_else(|| HandlerError::Other("crop buffer size mismatch".into()))?;
    let resized = image::imageops::resize(&img, tw, th, FilterType::Triangle);
    Ok(Screen {
        pixels: resized.into_raw(),
        width: tw,
        height: th,
    })
}

impl FrameHandler for ScreenExtractor {
    fn handle(&mut self, rec: &mut FrameRecord) -> Result<Flow, HandlerError> {
        self.frames += 1;
        rec.frame_n = self.frames;
        let screen = extract_screen(&rec.frame, &self.cfg)?;
        let trunc: Vec<u8> = screen.pixels.iter().map(|&p| p >> 6).collect();
        rec.changed = self.last_trunc.as_deref() != Some(&trunc[..]);
        rec.screen = Some(screen);
        if !rec.changed {
            return Ok(Flow::StopFrame);
        }
        self.last_trunc = Some(trunc);
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "screen-extract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ScreenConfig {
        ScreenConfig {
            source_position: [2, 2],
            source_size: [16, 16],
            size: [8, 8],
        }
    }

    fn frame_filled(v: u8) -> Frame {
        Frame::new(vec![v; 20 * 20], 20, 20, 0)
    }

    #[test]
    fn first_frame_is_always_changed() {
        let mut h = ScreenExtractor::new(cfg());
        let mut rec = FrameRecord::new(frame_filled(200));
        assert_eq!(h.handle(&mut rec).unwrap(), Flow::Continue);
        assert!(rec.changed);
        assert_eq!(rec.frame_n, 1);
        let screen = rec.screen.unwrap();
        assert_eq!((screen.width, screen.height), (8, 8));
        assert!(screen.pixels.iter().all(|&p| p == 200));
    }

    #[test]
    fn unchanged_screen_stops_frame() {
        let mut h = ScreenExtractor::new(cfg());
        let mut first = FrameRecord::new(frame_filled(200));
        h.handle(&mut first).unwrap();
        // Same screen content modulo sub-class noise (200 and 201 share a
        // 2-bit bucket).
        let mut second = FrameRecord::new(frame_filled(201));
        assert_eq!(h.handle(&mut second).unwrap(), Flow::StopFrame);
        assert!(!second.changed);
        assert_eq!(second.frame_n, 2);
        assert!(second.screen.is_some());
    }

    #[test]
    fn changed_screen_continues() {
        let mut h = ScreenExtractor::new(cfg());
        let mut first = FrameRecord::new(frame_filled(200));
        h.handle(&mut first).unwrap();
        let mut second = FrameRecord::new(frame_filled(40));
        assert_eq!(h.handle(&mut second).unwrap(), Flow::Continue);
        assert!(second.changed);
    }

    #[test]
    fn out_of_bounds_rectangle_errors() {
        let bad = ScreenConfig {
            source_position: [100, 100],
            source_size: [16, 16],
            size: [8, 8],
        };
        let mut h = ScreenExtractor::new(bad);
        let mut rec = FrameRecord::new(frame_filled(0));
        assert!(h.handle(&mut rec).is_err());
    }
}
