use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use tilewatch_common::frame::FrameRecord;
use tracing::info;

use super::{Flow, FrameHandler, HandlerError};

/// Appends the recognized text to a log whenever it changes, tagged with
/// the on-screen clock readout. Newlines are escaped so each entry stays on
/// one line.
pub struct TextLog {
    writer: BufWriter<File>,
    last: String,
}

impl TextLog {
    pub fn create(path: &str) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path, "text change log open");
        Ok(Self {
            writer: BufWriter::new(file),
            last: String::new(),
        })
    }

    fn render(rec: &FrameRecord) -> String {
        rec.text
            .iter()
            .map(|run| run.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FrameHandler for TextLog {
    fn handle(&mut self, rec: &mut FrameRecord) -> Result<Flow, HandlerError> {
        let text = Self::render(rec);
        if text != self.last {
            writeln!(self.writer, "{} {}", text.replace('\n', "`"), rec.timestamp)?;
            self.writer.flush()?;
            self.last = text;
        }
        Ok(Flow::Continue)
    }

    fn name(&self) -> &str {
        "textlog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilewatch_common::frame::{Frame, MatchRun};

    fn record_with_text(lines: &[&str]) -> FrameRecord {
        let mut rec = FrameRecord::new(Frame::new(vec![0; 4], 2, 2, 0));
        rec.text = lines
            .iter()
            .enumerate()
            .map(|(i, t)| MatchRun {
                row: i as u32 * 16,
                x_start: 0,
                x_end: 0,
                text: t.to_string(),
            })
            .collect();
        rec.timestamp = "0d0h0m5s".to_string();
        rec
    }

    #[test]
    fn logs_only_changes() {
        let dir = std::env::temp_dir().join(format!("tilewatch-textlog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("text.log");
        let path_str = path.to_str().unwrap();
        let _ = std::fs::remove_file(&path);

        let mut log = TextLog::create(path_str).unwrap();
        log.handle(&mut record_with_text(&["HELLO", "WORLD"])).unwrap();
        log.handle(&mut record_with_text(&["HELLO", "WORLD"])).unwrap();
        log.handle(&mut record_with_text(&["BYE"])).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "HELLO`WORLD 0d0h0m5s");
        assert_eq!(lines[1], "BYE 0d0h0m5s");

        let _ = std::fs::remove_file(&path);
    }
}
