//! On-screen elapsed-time reader.
//!
//! Projects the clock strip into per-column bright-pixel counts, maps the
//! counts into a synthetic byte stream where blank columns become a sentinel
//! byte, segments on sentinel runs and fuzzy-matches each token against the
//! configured character map. The displayed clock is monotonic and
//! slow-changing, so a garbled frame keeps the last good value rather than
//! regressing the reported time.

use chrono::Utc;
use tilewatch_common::config::TimestampConfig;
use tilewatch_common::frame::{FrameRecord, Screen};
use tracing::trace;

use super::{Flow, FrameHandler, HandlerError};

/// Column brightness threshold; pixels above it count toward the projection.
const BRIGHT_THRESHOLD: u8 = 150;

/// Sentinel byte a zero-count column maps to; also the projection baseline.
const BLANK: u8 = b'A';

/// Minimum similarity for a fuzzy character-map hit.
const SIMILARITY_CUTOFF: f64 = 0.6;

pub struct TimestampReader {
    cfg: TimestampConfig,
    /// Last known good readout.
    timestamp: String,
    timestamp_s: u32,
}

impl TimestampReader {
    pub fn new(cfg: TimestampConfig) -> Self {
        Self {
            cfg,
            timestamp: "0d0h0m0s".to_string(),
            timestamp_s: 0,
        }
    }

    fn recognize(&self, strip: &Screen) -> Option<(String, u32)> {
        let stream = project_columns(strip);
        let tokens = segment(&stream);
        let text = self.convert(&tokens)?;
        let seconds = parse_elapsed(&text)?;
        Some((text, seconds))
    }

    /// Map each token through the character map, exact first, then best
    /// similarity above the cutoff. `None` if any token stays unmatched.
    fn convert(&self, tokens: &[String]) -> Option<String> {
        let mut out = String::new();
        for token in tokens {
            if let Some(c) = self.cfg.character_map.get(token) {
                out.push_str(c);
                continue;
            }
            let (best_key, best_score) = self
                .cfg
                .character_map
                .keys()
                .map(|k| (k, similarity(token, k)))
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if best_score < SIMILARITY_CUTOFF {
                trace!(token = %token, best_score, "no close character-map match");
                return None;
            }
            out.push_str(&self.cfg.character_map[best_key]);
        }
        Some(out)
    }
}

impl FrameHandler for TimestampReader {
    fn handle(&mut self, rec: &mut FrameRecord) -> Result<Flow, HandlerError> {
        let [x, y] = self.cfg.position;
        let [w, h] = self.cfg.size;
        let strip = rec.frame.crop(x, y, w, h);
        match self.recognize(&strip) {
            Some((text, seconds)) => {
                self.timestamp = text;
                self.timestamp_s = seconds;
            }
            None => {
                // Parse failed. With a wall-clock anchor the readout is
                // extrapolated; otherwise the last good value stands.
                if let Some(anchor) = self.cfg.anchor {
                    let elapsed = (Utc::now() - anchor).num_seconds().max(0) as u32;
                    self.timestamp = format_elapsed(elapsed);
                    self.timestamp_s = elapsed;
                }
            }
        }
        rec.timestamp = self.timestamp.clone();
        rec.timestamp_s = self.timestamp_s;
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "timestamp"
    }
}

/// Per-column count of bright pixels, offset from the sentinel baseline.
pub(crate) fn project_columns(strip: &Screen) -> Vec<u8> {
    (0..strip.width)
        .map(|x| {
            let count = (0..strip.height)
                .filter(|&y| strip.pixels[(y * strip.width + x) as usize] > BRIGHT_THRESHOLD)
                .count() as u32;
            BLANK.saturating_add((count / 2) as u8)
        })
        .collect()
}

/// Split the synthetic byte stream into tokens on runs of the sentinel.
pub(crate) fn segment(stream: &[u8]) -> Vec<String> {
    stream
        .split(|&b| b == BLANK)
        .filter(|t| !t.is_empty())
        .map(|t| t.iter().map(|&b| b as char).collect())
        .collect()
}

/// Parse a `XdYhZmWs` readout into total elapsed seconds.
pub(crate) fn parse_elapsed(text: &str) -> Option<u32> {
    let parts: Vec<u32> = text
        .split(['d', 'h', 'm', 's', ':'])
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    let [days, hours, minutes, seconds] = parts[..] else {
        return None;
    };
    // Garbled strips can concatenate into absurd counts; an overflowing
    // total is as malformed as a non-numeric one.
    days.checked_mul(24)?
        .checked_add(hours)?
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)
}

pub(crate) fn format_elapsed(total: u32) -> String {
    let days = total / 86400;
    let hours = total % 86400 / 3600;
    let minutes = total % 3600 / 60;
    let seconds = total % 60;
    format!("{days}d{hours}h{minutes}m{seconds}s")
}

/// Ratio of the longest common subsequence to the combined length, in the
/// style of difflib's quick ratio: 1.0 for equal strings, 0.0 for disjoint.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    2.0 * prev[b.len()] as f64 / (a.len() + b.len()) as f64
}
