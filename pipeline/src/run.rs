//! Pipeline controller: drains the bounded frame queue and drives the
//! handler chain.

use std::time::{Duration, Instant};
use tilewatch_common::frame::FrameRecord;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::handlers::{Flow, FrameHandler};
use crate::source::SourceItem;

/// Target frame interval at 60 fps.
pub const TARGET_FRAME_SECS: f64 = 1.0 / 60.0;

/// Queue occupancy below which consumption is slowed.
const RATE_FLOOR: usize = 60;

/// Long but finite dequeue timeout, so the loop stays responsive to
/// external termination instead of blocking forever.
const RECV_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

/// Drain the frame queue until the end-of-stream sentinel arrives or the
/// acquisition side goes away. Handlers run synchronously, in registration
/// order, against one shared record per frame.
pub async fn process_frames(
    mut rx: mpsc::Receiver<SourceItem>,
    mut chain: Vec<Box<dyn FrameHandler>>,
    ratelimit: bool,
) {
    let mut total: u64 = 0;
    loop {
        let item = match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                info!(total, "frame source disconnected");
                return;
            }
            Err(_) => continue, // idle; re-arm the dequeue
        };
        let frame = match item {
            SourceItem::Frame(f) => f,
            SourceItem::EndOfStream => {
                info!(total, "end of stream, processing complete");
                return;
            }
        };

        let started = Instant::now();
        let mut rec = FrameRecord::new(frame);
        for handler in chain.iter_mut() {
            match handler.handle(&mut rec) {
                Ok(Flow::Continue) => {}
                Ok(Flow::StopFrame) => break,
                Err(e) => {
                    // Per-handler fault isolation: the chain keeps going.
                    warn!(handler = handler.name(), error = %e, "handler failed");
                }
            }
        }
        total += 1;
        if total % 100 == 0 {
            debug!(total, queued = rx.len(), "frames processed");
        }

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > TARGET_FRAME_SECS {
            debug!(elapsed_ms = elapsed * 1000.0, "slow frame");
        }
        if ratelimit {
            // Approximate flow control: slow down as the queue drains,
            // speed up as it fills.
            let qlen = rx.len();
            if qlen < RATE_FLOOR {
                let pause = TARGET_FRAME_SECS - elapsed + (RATE_FLOOR - qlen) as f64 / 600.0;
                if pause > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(pause)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tilewatch_common::frame::Frame;

    struct Counting {
        hits: Arc<AtomicU64>,
        flow: Flow,
        fail: bool,
    }

    impl FrameHandler for Counting {
        fn handle(&mut self, _rec: &mut FrameRecord) -> Result<Flow, HandlerError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::Other("synthetic fault".into()));
            }
            Ok(self.flow)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn counting(hits: &Arc<AtomicU64>, flow: Flow, fail: bool) -> Box<dyn FrameHandler> {
        Box::new(Counting {
            hits: Arc::clone(hits),
            flow,
            fail,
        })
    }

    fn frame(seq: u64) -> SourceItem {
        SourceItem::Frame(Frame::new(vec![0; 4], 2, 2, seq))
    }

    #[tokio::test]
    async fn sentinel_terminates_after_draining() {
        let (tx, rx) = mpsc::channel(8);
        let hits = Arc::new(AtomicU64::new(0));
        tx.send(frame(0)).await.unwrap();
        tx.send(frame(1)).await.unwrap();
        tx.send(SourceItem::EndOfStream).await.unwrap();
        process_frames(rx, vec![counting(&hits, Flow::Continue, false)], false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_channel_terminates() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(frame(0)).await.unwrap();
        drop(tx);
        let hits = Arc::new(AtomicU64::new(0));
        process_frames(rx, vec![counting(&hits, Flow::Continue, false)], false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_frame_skips_remaining_handlers() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(frame(0)).await.unwrap();
        tx.send(SourceItem::EndOfStream).await.unwrap();
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));
        process_frames(
            rx,
            vec![
                counting(&first, Flow::StopFrame, false),
                counting(&second, Flow::Continue, false),
            ],
            false,
        )
        .await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_fault_does_not_abort_chain() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(frame(0)).await.unwrap();
        tx.send(SourceItem::EndOfStream).await.unwrap();
        let faulty = Arc::new(AtomicU64::new(0));
        let after = Arc::new(AtomicU64::new(0));
        process_frames(
            rx,
            vec![
                counting(&faulty, Flow::Continue, true),
                counting(&after, Flow::Continue, false),
            ],
            false,
        )
        .await;
        assert_eq!(faulty.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
