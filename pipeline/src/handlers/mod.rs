pub mod compress;
pub mod extract;
pub mod ocr;
pub mod textlog;
pub mod timestamp;

use tilewatch_common::frame::FrameRecord;

/// Outcome of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass the record to the next handler.
    Continue,
    /// Skip the remaining handlers for this frame only.
    StopFrame,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] tilewatch_common::codec::CodecError),
    #[error("{0}")]
    Other(String),
}

/// One unit of per-frame work. Handlers run synchronously, in registration
/// order, against the shared mutable record; an `Err` is logged by the chain
/// driver and does not abort the chain or the process.
pub trait FrameHandler: Send {
    fn handle(&mut self, rec: &mut FrameRecord) -> Result<Flow, HandlerError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
