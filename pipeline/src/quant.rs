/// Tolerance window each configured reference intensity claims, in both
/// directions. Keeps noisy/recompressed video resolving to the intended
/// class.
pub const TOLERANCE: i32 = 9;

/// Maps raw 8-bit intensities to small color classes through a precomputed
/// table. Unmapped intensities resolve to class 0 (background) so
/// processing stays total.
pub struct Quantizer {
    table: [u8; 256],
}

impl Quantizer {
    pub fn new(color_map: &[(u8, u8)]) -> Self {
        let mut table = [0u8; 256];
        for &(intensity, class) in color_map {
            for off in -TOLERANCE..=TOLERANCE {
                let v = intensity as i32 + off;
                if (0..=255).contains(&v) {
                    table[v as usize] = class;
                }
            }
        }
        Self { table }
    }

    #[inline]
    pub fn classify(&self, intensity: u8) -> u8 {
        self.table[intensity as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_covers_tolerance_both_ways() {
        let q = Quantizer::new(&[(100, 1), (200, 2)]);
        assert_eq!(q.classify(100), 1);
        assert_eq!(q.classify(91), 1);
        assert_eq!(q.classify(109), 1);
        assert_eq!(q.classify(90), 0);
        assert_eq!(q.classify(110), 0);
        assert_eq!(q.classify(200), 2);
        assert_eq!(q.classify(209), 2);
    }

    #[test]
    fn unmapped_defaults_to_background() {
        let q = Quantizer::new(&[(128, 2)]);
        assert_eq!(q.classify(0), 0);
        assert_eq!(q.classify(255), 0);
    }

    #[test]
    fn window_clamps_at_range_edges() {
        let q = Quantizer::new(&[(3, 1), (252, 2)]);
        assert_eq!(q.classify(0), 1);
        assert_eq!(q.classify(12), 1);
        assert_eq!(q.classify(255), 2);
        assert_eq!(q.classify(243), 2);
    }

    #[test]
    fn later_entries_win_overlaps() {
        // Ordered map semantics: the last configured pair owns contested
        // intensities.
        let q = Quantizer::new(&[(100, 1), (105, 2)]);
        assert_eq!(q.classify(102), 2);
        assert_eq!(q.classify(93), 1);
    }
}
