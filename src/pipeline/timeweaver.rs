use super::{record_channel, Processor, RecordReceiver, RecordSender, SharedProcessor};
use crate::record::Record;
use std::sync::Arc;

/// Ordered 2-input merge.
///
/// Both inputs must individually be non-decreasing on
/// [`Record::monotonic_timestamp`]; the merged output then is too. The merge
/// holds at most one pending record per side and refills only the side it
/// just consumed, so memory stays bounded. Ties go left, which keeps the
/// left fold in [`stitch`] deterministic.
pub struct Timeweaver {
    lhs: SharedProcessor,
    rhs: SharedProcessor,
}

impl Timeweaver {
    pub fn new(lhs: SharedProcessor, rhs: SharedProcessor) -> Self {
        Self { lhs, rhs }
    }
}

struct Side {
    rx: RecordReceiver,
    pending: Option<Record>,
    done: bool,
}

impl Side {
    fn new(rx: RecordReceiver) -> Self {
        Self {
            rx,
            pending: None,
            done: false,
        }
    }

    /// Pull the one-record look-ahead, if it is empty and the stream is live.
    async fn fill(&mut self) {
        if self.pending.is_none() && !self.done {
            match self.rx.recv().await {
                Some(record) => self.pending = Some(record),
                None => self.done = true,
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.done && self.pending.is_none()
    }

    /// Forward the look-ahead and everything left on this side.
    async fn drain(mut self, tx: &RecordSender) {
        if let Some(record) = self.pending.take() {
            if tx.send(record).await.is_err() {
                return;
            }
        }
        while let Some(record) = self.rx.recv().await {
            if tx.send(record).await.is_err() {
                return;
            }
        }
    }
}

impl Processor for Timeweaver {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();
        let lhs = self.lhs.clone();
        let rhs = self.rhs.clone();

        tokio::spawn(async move {
            let mut lhs = Side::new(lhs.process());
            let mut rhs = Side::new(rhs.process());

            loop {
                lhs.fill().await;
                rhs.fill().await;

                if lhs.exhausted() {
                    rhs.drain(&tx).await;
                    break;
                }
                if rhs.exhausted() {
                    lhs.drain(&tx).await;
                    break;
                }

                let left_first = match (&lhs.pending, &rhs.pending) {
                    (Some(l), Some(r)) => l.monotonic_timestamp() <= r.monotonic_timestamp(),
                    _ => break,
                };

                let record = if left_first {
                    lhs.pending.take()
                } else {
                    rhs.pending.take()
                };
                let Some(record) = record else { break };
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

/// Stitch multiple ordered inputs into one ordered stream by left-folding
/// binary merges: `merge(merge(merge(p0, p1), p2), p3)`.
pub fn stitch(mut processors: Vec<SharedProcessor>) -> Option<SharedProcessor> {
    let mut iter = processors.drain(..);
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| Arc::new(Timeweaver::new(acc, next)) as SharedProcessor))
}
