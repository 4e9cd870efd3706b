//! In-memory waveform source
//!
//! Replays caller-supplied per-channel edge lists as [`Sample`] streams,
//! one output port per channel. Stands in for a capture-file reader in
//! demos and tests; downstream nodes see the same run-length encoded
//! edge streams either way.

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::Sample;
use crate::{Csi2Error, Result};
use tracing::debug;

struct Channel {
    name: String,
    samples: Vec<Sample>,
}

pub struct WaveformSource {
    name: String,
    channels: Vec<Channel>,
    done: bool,
}

impl WaveformSource {
    /// Each `(name, samples)` pair becomes one output port. Samples must
    /// be in ascending `start_time` order per channel.
    pub fn new(channels: Vec<(String, Vec<Sample>)>) -> Result<Self> {
        for (name, samples) in &channels {
            if samples.windows(2).any(|w| w[0].start_time >= w[1].start_time) {
                return Err(Csi2Error::UnorderedWaveform {
                    channel: name.clone(),
                });
            }
        }
        Ok(Self {
            name: "waveform_source".to_string(),
            channels: channels
                .into_iter()
                .map(|(name, samples)| Channel { name, samples })
                .collect(),
            done: false,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ProcessNode for WaveformSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_stop(&self) -> bool {
        self.done
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        self.channels.len()
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, ch)| PortSchema::new::<Sample>(ch.name.as_str(), i, PortDirection::Output))
            .collect()
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let senders: Vec<_> = outputs.iter().map(|p| p.get::<Sample>()).collect();

        // Replay in global timestamp order. Pushing one whole channel at a
        // time could fill its bounded channel while a consumer waits on a
        // sibling port, stalling the graph before it starts.
        let mut cursors = vec![0usize; self.channels.len()];
        let mut sent = 0usize;
        loop {
            let next = (0..self.channels.len())
                .filter(|&i| cursors[i] < self.channels[i].samples.len())
                .min_by_key(|&i| self.channels[i].samples[cursors[i]].start_time);
            let Some(i) = next else { break };

            let sample = self.channels[i].samples[cursors[i]];
            cursors[i] += 1;
            if let Some(sender) = &senders[i] {
                sender.send(sample).map_err(WorkError::from)?;
                sent += 1;
            }
        }

        for sender in senders.iter().flatten() {
            sender.close();
        }
        debug!("{}: replayed {} samples, closing outputs", self.name, sent);
        self.done = true;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sender::ChannelMessage;
    use crate::runtime::{Sender, Watchdog};
    use crossbeam_channel::bounded;

    #[test]
    fn test_rejects_unordered_samples() {
        let samples = vec![Sample::new(false, 10), Sample::new(true, 5)];
        assert!(WaveformSource::new(vec![("ch".to_string(), samples)]).is_err());
    }

    #[test]
    fn test_replays_in_timestamp_order() {
        let a = vec![Sample::new(false, 0), Sample::new(true, 10)];
        let b = vec![Sample::new(true, 5), Sample::new(false, 15)];
        let mut source = WaveformSource::new(vec![
            ("a".to_string(), a),
            ("b".to_string(), b),
        ])
        .unwrap();

        let watchdog = Watchdog::new();
        let (tx_a, rx_a) = bounded::<ChannelMessage<Sample>>(16);
        let (tx_b, rx_b) = bounded::<ChannelMessage<Sample>>(16);
        let outputs = vec![
            OutputPort::new_with_watchdog(Sender::new(vec![tx_a]), &watchdog, "src", "a"),
            OutputPort::new_with_watchdog(Sender::new(vec![tx_b]), &watchdog, "src", "b"),
        ];

        assert_eq!(source.work(&[], &outputs).unwrap(), 4);
        assert!(source.should_stop());

        let drain = |rx: crossbeam_channel::Receiver<ChannelMessage<Sample>>| {
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                match msg {
                    ChannelMessage::Sample(s) => out.push(s.start_time),
                    ChannelMessage::EndOfStream => break,
                }
            }
            out
        };
        assert_eq!(drain(rx_a), vec![0, 10]);
        assert_eq!(drain(rx_b), vec![5, 15]);
    }
}
