//! 2bpp record stream writer.
//!
//! Truncates each canonical screen to pixel classes and appends one framed
//! [`CompressedRecord`] per processed frame. The output is meant to be piped
//! through a generic byte-stream compressor; the block packing exists to
//! make that compressor's job easy.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use tilewatch_common::codec::{pack_2bpp, CompressedRecord};
use tilewatch_common::frame::FrameRecord;
use tracing::info;

use super::{Flow, FrameHandler, HandlerError};

pub struct ScreenCompressor {
    writer: BufWriter<File>,
    records: u64,
}

impl ScreenCompressor {
    pub fn create(path: &str) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path, "compressed record stream open");
        Ok(Self {
            writer: BufWriter::new(file),
            records: 0,
        })
    }
}

impl FrameHandler for ScreenCompressor {
    fn handle(&mut self, rec: &mut FrameRecord) -> Result<Flow, HandlerError> {
        let screen = rec
            .screen
            .as_ref()
            .ok_or_else(|| HandlerError::Other("no canonical screen in record".into()))?;
        let classes: Vec<u8> = screen.pixels.iter().map(|&p| p >> 6).collect();
        let payload = pack_2bpp(&classes, screen.width, screen.height)?;
        let record = CompressedRecord {
            timestamp_s: rec.timestamp_s,
            frame_n: (rec.frame_n & 0xff) as u8,
            payload,
        };
        self.writer.write_all(&record.serialize())?;
        self.records += 1;
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "compress"
    }
}

impl Drop for ScreenCompressor {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
