//! Glyph atlas builder.
//!
//! Runs once at startup: slices the font bitmap sheet into grid cells,
//! quantizes each cell into color classes, packs the survivors into column
//! signatures and pairs them with text from the mapping file. The finished
//! catalog is sorted lexicographically by signature; the matching engine's
//! scan depends on that ordering and it is never mutated afterwards.

use regex::Regex;
use std::collections::HashMap;
use tilewatch_common::config::SpriteConfig;

/// Text assigned to catalog glyphs the mapping file does not cover:
/// "unknown but present".
pub const UNKNOWN_TEXT: &str = "#";

/// One catalog glyph. `signature` is the packed column sequence (2 bits per
/// pixel, top to bottom, one u32 per column) and doubles as the sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphEntry {
    pub signature: Vec<u32>,
    pub text: String,
    /// Rendered width in columns, at least 3.
    pub width: u32,
    /// Cell index in the original sheet grid.
    pub id: u32,
}

#[derive(Debug)]
pub struct GlyphAtlas {
    /// Sorted by signature, ascending.
    pub entries: Vec<GlyphEntry>,
    pub cell_width: u32,
    pub cell_height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("failed to read font sheet {0}: {1}")]
    Sheet(String, image::ImageError),
    #[error("failed to read text map {0}: {1}")]
    TextMap(String, std::io::Error),
    #[error("text map line pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("text map offset out of range: {0}")]
    Offset(String),
    #[error("glyph cell {id} at column {col}, row {row} reduced to {classes} color classes, expected 3")]
    BadCell {
        id: u32,
        col: u32,
        row: u32,
        classes: usize,
    },
}

impl GlyphAtlas {
    pub fn build(cfg: &SpriteConfig) -> Result<Self, AtlasError> {
        let sheet = image::open(&cfg.sheet)
            .map_err(|e| AtlasError::Sheet(cfg.sheet.clone(), e))?
            .to_luma8();
        let text_map = parse_text_map(&cfg.text_map)?;
        let [cell_w, cell_h] = cfg.cell_size;
        Self::from_sheet(
            sheet.as_raw(),
            sheet.width(),
            sheet.height(),
            cell_w,
            cell_h,
            &text_map,
        )
    }

    /// Build the catalog from raw sheet pixels. Separated from file loading
    /// so tests can feed synthetic sheets.
    pub fn from_sheet(
        pixels: &[u8],
        sheet_w: u32,
        sheet_h: u32,
        cell_w: u32,
        cell_h: u32,
        text_map: &HashMap<u32, String>,
    ) -> Result<Self, AtlasError> {
        let mut entries = Vec::new();
        let mut id: u32 = 0;
        for row in 0..sheet_h / cell_h {
            for col in 0..sheet_w / cell_w {
                let cell_id = id;
                id += 1;
                let buf = match quantize_cell(pixels, sheet_w, col * cell_w, row * cell_h, cell_w, cell_h)
                {
                    Some(b) => b,
                    None => continue, // blank cell
                };
                let classes = distinct_classes(&buf);
                if classes != 3 {
                    // Malformed font asset; a corrupted catalog would
                    // silently degrade all future matching.
                    return Err(AtlasError::BadCell {
                        id: cell_id,
                        col,
                        row,
                        classes,
                    });
                }
                let columns = buf.len() as u32 / cell_h;
                entries.push(GlyphEntry {
                    signature: pack_columns(&buf, cell_h),
                    text: text_map
                        .get(&cell_id)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
                    width: columns.max(3),
                    id: cell_id,
                });
            }
        }
        entries.sort_by(|a, b| a.signature.cmp(&b.signature));
        Ok(Self {
            entries,
            cell_width: cell_w,
            cell_height: cell_h,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index range of entries whose signature begins with `column`.
    pub fn range_for(&self, column: u32) -> std::ops::Range<usize> {
        let first = |e: &GlyphEntry| e.signature.first().copied().unwrap_or(0);
        let lo = self.entries.partition_point(|e| first(e) < column);
        let hi = self.entries.partition_point(|e| first(e) <= column);
        lo..hi
    }
}

/// Quantize one cell into first-seen color classes, flattened column-major.
/// Returns `None` for blank cells (a single distinct intensity). Trims
/// all-background columns from both ends so short glyphs inside a taller
/// cell still produce tight signatures.
fn quantize_cell(
    pixels: &[u8],
    sheet_w: u32,
    left: u32,
    top: u32,
    cell_w: u32,
    cell_h: u32,
) -> Option<Vec<u8>> {
    // First-seen-wins ordered palette; the first intensity encountered
    // becomes class 0 regardless of the cell's true semantic colors.
    let mut palette: Vec<u8> = Vec::new();
    let mut buf = Vec::with_capacity((cell_w * cell_h) as usize);
    for x in left..left + cell_w {
        for y in top..top + cell_h {
            let v = pixels[(y * sheet_w + x) as usize];
            let class = match palette.iter().position(|&p| p == v) {
                Some(i) => i as u8,
                None => {
                    palette.push(v);
                    (palette.len() - 1) as u8
                }
            };
            buf.push(class);
        }
    }
    if palette.len() < 2 {
        return None;
    }
    let h = cell_h as usize;
    while buf.len() >= h && buf[buf.len() - h..].iter().all(|&c| c == 0) {
        buf.truncate(buf.len() - h);
    }
    while buf.len() >= h && buf[..h].iter().all(|&c| c == 0) {
        buf.drain(..h);
    }
    Some(buf)
}

fn distinct_classes(buf: &[u8]) -> usize {
    let mut seen = [false; 4];
    for &c in buf {
        seen[(c & 3) as usize] = true;
    }
    seen.iter().filter(|&&s| s).count()
}

/// Pack a column-major class buffer into one u32 per column, first pixel in
/// the most significant position.
fn pack_columns(buf: &[u8], cell_h: u32) -> Vec<u32> {
    buf.chunks(cell_h as usize)
        .map(|col| col.iter().fold(0u32, |acc, &c| (acc << 2) | c as u32))
        .collect()
}

/// Parse the cell-offset -> text mapping file.
///
/// Line grammar: `([0-9A-F]+)([a-z]*):(.*)` — hex cell offset, flags, text.
/// Flags: `w` wide glyphs (tokens consume two characters), `x` offset bias
/// (+1024), `l` literal multi-character text for a single cell, `s`
/// alternate lead character for wide glyphs.
pub fn parse_text_map(path: &str) -> Result<HashMap<u32, String>, AtlasError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| AtlasError::TextMap(path.to_string(), e))?;
    parse_text_map_str(&content)
}

pub fn parse_text_map_str(content: &str) -> Result<HashMap<u32, String>, AtlasError> {
    let line_re = Regex::new(r"^([0-9A-F]+)([a-z]*):(.*)$")?;
    let mut out = HashMap::new();
    for line in content.lines() {
        let caps = match line_re.captures(line) {
            Some(c) => c,
            None => continue,
        };
        let mut offset = u32::from_str_radix(&caps[1], 16)
            .map_err(|_| AtlasError::Offset(line.to_string()))?;
        let flags = caps[2].to_string();
        let wide = flags.contains('w');
        if flags.contains('x') {
            offset += 1024;
        }
        let letters: Vec<char> = caps[3].chars().collect();
        if flags.contains('l') {
            out.insert(offset, caps[3].to_string());
            continue;
        }
        let step = if wide { 2 } else { 1 };
        for (slot, chunk) in letters.chunks(step).enumerate() {
            let token: String = chunk.iter().collect();
            if token == " " {
                continue;
            }
            out.insert(offset + slot as u32, widen(&token, wide, &flags));
        }
    }
    Ok(out)
}

fn widen(token: &str, wide: bool, flags: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if !wide || token.trim().chars().count() < 2 {
        chars.first().map(|c| c.to_string()).unwrap_or_default()
    } else if flags.contains('s') {
        format!("{}{token}", chars[1])
    } else {
        format!("{}{token}", chars[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CELL_W: u32 = 8;
    const CELL_H: u32 = 16;

    /// Paint one glyph cell: `rows` lists, per cell row, the intensity of
    /// the first `cols` columns (the rest stays background).
    fn paint_cell(sheet: &mut [u8], sheet_w: u32, cell: u32, rows: &[(u32, &[u8])]) {
        let left = (cell % (sheet_w / CELL_W)) * CELL_W;
        let top = (cell / (sheet_w / CELL_W)) * CELL_H;
        for &(row, intensities) in rows {
            for (i, &v) in intensities.iter().enumerate() {
                let x = left + i as u32;
                let y = top + row;
                sheet[(y * sheet_w + x) as usize] = v;
            }
        }
    }

    /// 2-cell sheet; background 248, shades 96 and 176.
    fn sheet_with_two_glyphs() -> (Vec<u8>, u32, u32) {
        let (w, h) = (16u32, 16u32);
        let mut pixels = vec![248u8; (w * h) as usize];
        // Cell 0: a 3-column glyph using both foreground shades.
        paint_cell(&mut pixels, w, 0, &[(4, &[96, 176, 96]), (5, &[176, 96, 176])]);
        // Cell 1: a distinct glyph.
        paint_cell(&mut pixels, w, 1, &[(2, &[176, 176]), (3, &[96, 96]), (4, &[176, 96])]);
        (pixels, w, h)
    }

    #[test]
    fn blank_cells_are_excluded() {
        let pixels = vec![248u8; (CELL_W * CELL_H) as usize];
        let atlas =
            GlyphAtlas::from_sheet(&pixels, CELL_W, CELL_H, CELL_W, CELL_H, &HashMap::new())
                .unwrap();
        assert!(atlas.is_empty());
    }

    #[test]
    fn two_class_cell_is_fatal() {
        let mut pixels = vec![248u8; (CELL_W * CELL_H) as usize];
        paint_cell(&mut pixels, CELL_W, 0, &[(4, &[96, 96])]);
        let err =
            GlyphAtlas::from_sheet(&pixels, CELL_W, CELL_H, CELL_W, CELL_H, &HashMap::new())
                .unwrap_err();
        match err {
            AtlasError::BadCell { id, classes, .. } => {
                assert_eq!(id, 0);
                assert_eq!(classes, 2);
            }
            other => panic!("expected BadCell, got {other}"),
        }
    }

    #[test]
    fn catalog_is_sorted_by_signature() {
        let (pixels, w, h) = sheet_with_two_glyphs();
        let atlas = GlyphAtlas::from_sheet(&pixels, w, h, CELL_W, CELL_H, &HashMap::new()).unwrap();
        assert_eq!(atlas.len(), 2);
        for pair in atlas.entries.windows(2) {
            assert!(pair[0].signature <= pair[1].signature);
        }
    }

    #[test]
    fn trimming_drops_background_edges() {
        let (pixels, w, h) = sheet_with_two_glyphs();
        let atlas = GlyphAtlas::from_sheet(&pixels, w, h, CELL_W, CELL_H, &HashMap::new()).unwrap();
        // Cell 0 paints columns 0..3; trailing background columns trim away.
        let entry = atlas.entries.iter().find(|e| e.id == 0).unwrap();
        assert_eq!(entry.signature.len(), 3);
        assert_eq!(entry.width, 3);
    }

    #[test]
    fn first_seen_palette_fixes_classes() {
        // Scanning column-major from the top-left, background (248) is seen
        // first and becomes class 0 regardless of its intensity.
        let (pixels, w, h) = sheet_with_two_glyphs();
        let atlas = GlyphAtlas::from_sheet(&pixels, w, h, CELL_W, CELL_H, &HashMap::new()).unwrap();
        let entry = atlas.entries.iter().find(|e| e.id == 0).unwrap();
        // First column: rows 4 and 5 hold shades (classes 1 and 2), packed
        // top to bottom into bits.
        let expected = (1u32 << (2 * (CELL_H - 5))) | (2u32 << (2 * (CELL_H - 6)));
        assert_eq!(entry.signature[0], expected);
    }

    #[test]
    fn unmapped_glyphs_get_unknown_marker() {
        let (pixels, w, h) = sheet_with_two_glyphs();
        let mut text_map = HashMap::new();
        text_map.insert(0u32, "A".to_string());
        let atlas = GlyphAtlas::from_sheet(&pixels, w, h, CELL_W, CELL_H, &text_map).unwrap();
        let mapped = atlas.entries.iter().find(|e| e.id == 0).unwrap();
        let unmapped = atlas.entries.iter().find(|e| e.id == 1).unwrap();
        assert_eq!(mapped.text, "A");
        assert_eq!(unmapped.text, UNKNOWN_TEXT);
    }

    #[test]
    fn range_for_binary_search() {
        let (pixels, w, h) = sheet_with_two_glyphs();
        let atlas = GlyphAtlas::from_sheet(&pixels, w, h, CELL_W, CELL_H, &HashMap::new()).unwrap();
        for (i, entry) in atlas.entries.iter().enumerate() {
            let range = atlas.range_for(entry.signature[0]);
            assert!(range.contains(&i));
        }
        assert!(atlas.range_for(u32::MAX).is_empty());
    }

    #[test]
    fn text_map_plain_line() {
        let map = parse_text_map_str("100:ABC\n").unwrap();
        assert_eq!(map.get(&0x100).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x101).map(String::as_str), Some("B"));
        assert_eq!(map.get(&0x102).map(String::as_str), Some("C"));
    }

    #[test]
    fn text_map_skips_space_slots() {
        let map = parse_text_map_str("10:A C\n").unwrap();
        assert_eq!(map.get(&0x10).map(String::as_str), Some("A"));
        assert!(!map.contains_key(&0x11));
        assert_eq!(map.get(&0x12).map(String::as_str), Some("C"));
    }

    #[test]
    fn text_map_literal_flag() {
        let map = parse_text_map_str("20l:POKé\n").unwrap();
        assert_eq!(map.get(&0x20).map(String::as_str), Some("POKé"));
    }

    #[test]
    fn text_map_offset_bias_flag() {
        let map = parse_text_map_str("2x:Z\n").unwrap();
        assert_eq!(map.get(&(1024 + 2)).map(String::as_str), Some("Z"));
    }

    #[test]
    fn text_map_wide_flag_consumes_pairs() {
        let map = parse_text_map_str("30w:AB\n").unwrap();
        assert_eq!(map.get(&0x30).map(String::as_str), Some("AAB"));
        let map = parse_text_map_str("30ws:AB\n").unwrap();
        assert_eq!(map.get(&0x30).map(String::as_str), Some("BAB"));
    }

    #[test]
    fn text_map_ignores_comments() {
        let map = parse_text_map_str("# header\n\n10:A\n").unwrap();
        assert_eq!(map.len(), 1);
    }
}
