use super::{record_channel, Processor, RecordReceiver, SharedProcessor};
use std::sync::Mutex;

/// Broadcast multiplexer: one shared reader fans a source out to a fixed
/// number of consumers.
///
/// Each consumer calls [`process`](Processor::process) and gets its own
/// output channel. The source is not drained until all `fan_out` consumers
/// have attached, so no consumer can miss records; attaching more than
/// `fan_out` times is a wiring error and panics. Every record is sent to
/// every tap in turn, blocking on each, so the slowest consumer bounds
/// throughput.
pub struct Muxer {
    source: SharedProcessor,
    fan_out: usize,
    taps: Mutex<Vec<super::RecordSender>>,
}

impl Muxer {
    pub fn new(source: SharedProcessor, fan_out: usize) -> Self {
        Self {
            source,
            fan_out,
            taps: Mutex::new(Vec::with_capacity(fan_out)),
        }
    }
}

impl Processor for Muxer {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();

        let mut taps = self.taps.lock().expect("muxer tap list poisoned");
        taps.push(tx);

        if taps.len() > self.fan_out {
            panic!("muxer attached {} times, fan-out is {}", taps.len(), self.fan_out);
        }

        if taps.len() == self.fan_out {
            let senders = taps.clone();
            let source = self.source.clone();
            tokio::spawn(async move {
                let mut input = source.process();
                while let Some(record) = input.recv().await {
                    for sender in &senders {
                        // A dropped tap just stops receiving; the others
                        // still get the full sequence.
                        let _ = sender.send(record.clone()).await;
                    }
                }
            });
        }

        rx
    }
}

/// N-to-1 funnel: one forwarding task per input, all writing to a shared
/// output. Record interleaving across inputs is unspecified; use a
/// [`Timeweaver`](super::Timeweaver) when order matters. The output closes
/// once every input has ended.
pub struct Demuxer {
    sources: Vec<SharedProcessor>,
}

impl Demuxer {
    pub fn new(sources: Vec<SharedProcessor>) -> Self {
        Self { sources }
    }
}

impl Processor for Demuxer {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();

        for source in &self.sources {
            let source = source.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut input = source.process();
                while let Some(record) = input.recv().await {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
            });
        }

        // The last sender clone dropping closes the output.
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::VecProcessor;
    use crate::record::Record;
    use std::sync::Arc;

    fn lines(n: usize) -> SharedProcessor {
        Arc::new(VecProcessor::new(
            (0..n).map(|i| Record::line(format!("line-{i}"))).collect(),
        ))
    }

    async fn collect_texts(mut rx: RecordReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(record) = rx.recv().await {
            out.push(record.as_line().unwrap().to_string());
        }
        out
    }

    #[tokio::test]
    async fn muxer_delivers_identical_sequences() {
        let muxer = Arc::new(Muxer::new(lines(50), 3));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let rx = muxer.process();
            handles.push(tokio::spawn(collect_texts(rx)));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results[0].len(), 50);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[tokio::test]
    async fn muxer_waits_for_all_attachments() {
        let muxer = Arc::new(Muxer::new(lines(5), 2));

        // Only one of two consumers attached: no records may flow yet.
        let mut first = muxer.process();
        let early = tokio::time::timeout(std::time::Duration::from_millis(50), first.recv()).await;
        assert!(early.is_err(), "muxer started before all consumers attached");

        let second = muxer.process();
        let a = collect_texts(first);
        let b = collect_texts(second);
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
    }

    #[tokio::test]
    #[should_panic(expected = "muxer attached")]
    async fn muxer_over_attach_panics() {
        let muxer = Muxer::new(lines(1), 1);
        let _first = muxer.process();
        let _second = muxer.process();
    }

    #[tokio::test]
    async fn demuxer_funnels_everything() {
        let demuxer = Demuxer::new(vec![lines(10), lines(20), lines(30)]);
        let mut all = collect_texts(demuxer.process()).await;
        assert_eq!(all.len(), 60);
        // Interleaving is unspecified; the multiset is not.
        all.sort();
        let mut expected: Vec<String> = (0..10)
            .chain(0..20)
            .chain(0..30)
            .map(|i| format!("line-{i}"))
            .collect();
        expected.sort();
        assert_eq!(all, expected);
    }
}
