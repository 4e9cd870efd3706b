//! CSI-2 D-PHY decoder node
//!
//! Wraps a [`Csi2Session`] as a stream node. Input 0 is the byte clock;
//! every clock edge is one sampling instant, at which each wired lane's
//! positive and negative line levels are read and fed to the session.
//! Decoded events, packets and payload chunks go out on three separate
//! ports, any of which may be left unconnected.

use std::collections::VecDeque;

use tracing::debug;

use crate::Result;
use crate::protocol::session::{CollectSink, Csi2Config, Csi2Session};
use crate::protocol::types::{Csi2Event, LaneSample, Packet, PayloadChunk};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, Receiver, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::Sample;

/// Sampling instants handled per `work()` call before yielding back to
/// the scheduler.
const MAX_TICKS_PER_WORK: usize = 4096;

pub struct Csi2Decoder {
    name: String,
    wired_lanes: u8,
    session: Csi2Session,
    sink: CollectSink,
    channel_buffers: Vec<VecDeque<Sample>>,
    last_ts: u64,
}

impl Csi2Decoder {
    /// `wired_lanes` is the number of connected `dN_p`/`dN_n` pairs
    /// (1..=4); the configured lane count may not exceed it.
    pub fn new(config: Csi2Config, wired_lanes: u8) -> Result<Self> {
        let session = Csi2Session::new(config, wired_lanes)?;
        Ok(Self {
            name: "csi2_decoder".to_string(),
            wired_lanes,
            session,
            sink: CollectSink::default(),
            channel_buffers: vec![VecDeque::new(); 1 + 2 * wired_lanes as usize],
            last_ts: 0,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Level of a run-length encoded channel at `ts`. A sample's value holds
/// until the next sample; the last value extends past the end of the
/// stream, and the first one covers the time before it. `None` only once
/// the channel is exhausted with nothing buffered.
fn level_at(input: &mut Receiver<'_, Sample>, ts: u64) -> WorkResult<Option<bool>> {
    loop {
        let current = match input.recv() {
            Ok(sample) => sample,
            Err(WorkError::Shutdown) => return Ok(None),
            Err(e) => return Err(e),
        };
        if ts < current.start_time {
            let value = current.value;
            input.put_back(current);
            return Ok(Some(value));
        }
        match input.peek() {
            Ok(next) if ts < next.start_time => {
                let value = current.value;
                input.put_back(current);
                return Ok(Some(value));
            }
            Ok(_) => {}
            Err(WorkError::Shutdown) => {
                input.put_back(current);
                return Ok(Some(current.value));
            }
            Err(e) => return Err(e),
        }
    }
}

impl ProcessNode for Csi2Decoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1 + 2 * self.wired_lanes as usize
    }

    fn num_outputs(&self) -> usize {
        3
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        let mut schema = vec![PortSchema::new::<Sample>("clk", 0, PortDirection::Input)];
        for lane in 0..self.wired_lanes as usize {
            schema.push(PortSchema::new::<Sample>(
                format!("d{lane}_p"),
                1 + 2 * lane,
                PortDirection::Input,
            ));
            schema.push(PortSchema::new::<Sample>(
                format!("d{lane}_n"),
                2 + 2 * lane,
                PortDirection::Input,
            ));
        }
        schema
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::new::<Csi2Event>("events", 0, PortDirection::Output),
            PortSchema::new::<Packet>("packets", 1, PortDirection::Output),
            PortSchema::new::<PayloadChunk>("payload", 2, PortDirection::Output),
        ]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let wired = self.wired_lanes as usize;

        let mut buf_iter = self.channel_buffers.iter_mut();
        let mut clk = inputs
            .first()
            .and_then(|port| port.get::<Sample>(buf_iter.next().unwrap()))
            .ok_or_else(|| WorkError::NodeError("clk input not connected".to_string()))?;
        let mut lanes = Vec::with_capacity(wired);
        for lane in 0..wired {
            let p = inputs
                .get(1 + 2 * lane)
                .and_then(|port| port.get::<Sample>(buf_iter.next().unwrap()))
                .ok_or_else(|| WorkError::NodeError(format!("d{lane}_p input not connected")))?;
            let n = inputs
                .get(2 + 2 * lane)
                .and_then(|port| port.get::<Sample>(buf_iter.next().unwrap()))
                .ok_or_else(|| WorkError::NodeError(format!("d{lane}_n input not connected")))?;
            lanes.push((p, n));
        }

        let mut ticks = 0usize;
        let mut shutdown = false;
        while ticks < MAX_TICKS_PER_WORK {
            let edge = match clk.recv() {
                Ok(edge) => edge,
                Err(WorkError::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            // Lanes are read just before the clock edge, outside the
            // transition window.
            let sample_time = edge.start_time.saturating_sub(1);

            let mut samples: [Option<LaneSample>; 4] = [None; 4];
            for (lane, (p, n)) in lanes.iter_mut().enumerate() {
                let (Some(p_level), Some(n_level)) =
                    (level_at(p, sample_time)?, level_at(n, sample_time)?)
                else {
                    shutdown = true;
                    break;
                };
                samples[lane] = Some(LaneSample::new(p_level, n_level));
            }
            if shutdown {
                break;
            }

            self.session
                .process_sample(edge.start_time, &samples, &mut self.sink);
            self.last_ts = edge.start_time;
            ticks += 1;
        }

        if shutdown {
            debug!("{}: clock exhausted, flushing session", self.name);
            self.session.finish(self.last_ts + 1, &mut self.sink);
        }

        let mut produced = 0usize;
        if let Some(sender) = outputs.first().and_then(|port| port.get::<Csi2Event>()) {
            for event in self.sink.events.drain(..) {
                sender.send(event).map_err(WorkError::from)?;
                produced += 1;
            }
        } else {
            self.sink.events.clear();
        }
        if let Some(sender) = outputs.get(1).and_then(|port| port.get::<Packet>()) {
            for packet in self.sink.packets.drain(..) {
                sender.send(packet).map_err(WorkError::from)?;
                produced += 1;
            }
        } else {
            self.sink.packets.clear();
        }
        if let Some(sender) = outputs.get(2).and_then(|port| port.get::<PayloadChunk>()) {
            for chunk in self.sink.payloads.drain(..) {
                sender.send(chunk).map_err(WorkError::from)?;
                produced += 1;
            }
        } else {
            self.sink.payloads.clear();
        }

        if shutdown {
            for port in outputs {
                if let Some(sender) = port.get::<Csi2Event>() {
                    sender.close();
                } else if let Some(sender) = port.get::<Packet>() {
                    sender.close();
                } else if let Some(sender) = port.get::<PayloadChunk>() {
                    sender.close();
                }
            }
            return Err(WorkError::Shutdown);
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ecc;
    use crate::protocol::session::LaneCountMode;
    use crate::protocol::types::DataType;
    use crate::runtime::sender::ChannelMessage;
    use crate::runtime::{Sender, Watchdog};
    use crossbeam_channel::bounded;

    #[test]
    fn test_rejects_invalid_configuration() {
        assert!(Csi2Decoder::new(Csi2Config::default(), 0).is_err());
        assert!(Csi2Decoder::new(Csi2Config::default(), 5).is_err());
        let config = Csi2Config {
            lane_count: LaneCountMode::Fixed(3),
            ..Csi2Config::default()
        };
        assert!(Csi2Decoder::new(config, 2).is_err());
    }

    #[test]
    fn test_port_schema_follows_lane_count() {
        let decoder = Csi2Decoder::new(Csi2Config::default(), 2).unwrap();
        let inputs = decoder.input_schema();
        assert_eq!(inputs.len(), 5);
        assert_eq!(inputs[0].name, "clk");
        assert_eq!(inputs[3].name, "d1_p");
        assert_eq!(inputs[4].name, "d1_n");
        let outputs = decoder.output_schema();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[1].name, "packets");
    }

    // One tick per 2 time units: lane levels change at 2k, the clock
    // edge for tick k lands at 2k + 1, so lanes are read at 2k.
    fn rle(levels: &[bool]) -> Vec<Sample> {
        let mut out = Vec::new();
        for (k, &level) in levels.iter().enumerate() {
            if out.is_empty() || levels[k - 1] != level {
                out.push(Sample::new(level, 2 * k as u64));
            }
        }
        out
    }

    fn clock(ticks: usize) -> Vec<Sample> {
        let mut out = vec![Sample::new(false, 0)];
        for k in 0..ticks {
            out.push(Sample::new(k % 2 == 0, 2 * k as u64 + 1));
        }
        out
    }

    fn short_packet_lane_levels() -> (Vec<bool>, Vec<bool>) {
        let data_id = 0x00u8; // frame start, VC 0
        let bytes = [data_id, 0x01, 0x00, ecc::compute([data_id, 0x01, 0x00])];

        let mut p = vec![true; 4];
        let mut n = vec![true; 4];
        for byte in std::iter::once(0xB8u8).chain(bytes) {
            for bit in 0..8 {
                let level = (byte >> bit) & 1 != 0;
                p.push(level);
                n.push(!level);
            }
        }
        p.extend([true; 4]);
        n.extend([true; 4]);
        (p, n)
    }

    #[test]
    fn test_decodes_short_packet_from_streams() {
        let (p_levels, n_levels) = short_packet_lane_levels();
        let ticks = p_levels.len();

        let watchdog = Watchdog::new();
        let wire = |samples: Vec<Sample>, port: &str| {
            let (tx, rx) = bounded::<ChannelMessage<Sample>>(256);
            for sample in samples {
                tx.send(ChannelMessage::Sample(sample)).unwrap();
            }
            tx.send(ChannelMessage::EndOfStream).unwrap();
            InputPort::new_with_watchdog(rx, &watchdog, "dec", port)
        };
        let inputs = vec![
            wire(clock(ticks), "clk"),
            wire(rle(&p_levels), "d0_p"),
            wire(rle(&n_levels), "d0_n"),
        ];

        let (event_tx, event_rx) = bounded::<ChannelMessage<Csi2Event>>(256);
        let (packet_tx, packet_rx) = bounded::<ChannelMessage<Packet>>(64);
        let (payload_tx, _payload_rx) = bounded::<ChannelMessage<PayloadChunk>>(64);
        let outputs = vec![
            OutputPort::new_with_watchdog(Sender::new(vec![event_tx]), &watchdog, "dec", "events"),
            OutputPort::new_with_watchdog(
                Sender::new(vec![packet_tx]),
                &watchdog,
                "dec",
                "packets",
            ),
            OutputPort::new_with_watchdog(
                Sender::new(vec![payload_tx]),
                &watchdog,
                "dec",
                "payload",
            ),
        ];

        let config = Csi2Config {
            lane_count: LaneCountMode::Fixed(1),
            ..Csi2Config::default()
        };
        let mut decoder = Csi2Decoder::new(config, 1).unwrap();
        assert!(matches!(
            decoder.work(&inputs, &outputs),
            Err(WorkError::Shutdown)
        ));

        let mut packets = Vec::new();
        while let Ok(ChannelMessage::Sample(packet)) = packet_rx.try_recv() {
            packets.push(packet);
        }
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::Short {
                data_type,
                virtual_channel,
                short_data,
                ..
            } => {
                assert_eq!(*data_type, DataType::FRAME_START);
                assert_eq!(*virtual_channel, 0);
                assert_eq!(*short_data, 1);
            }
            other => panic!("expected short packet, got {other:?}"),
        }

        let mut saw_sync = false;
        while let Ok(ChannelMessage::Sample(event)) = event_rx.try_recv() {
            if matches!(
                event.kind,
                crate::protocol::types::EventKind::SyncDetected { lane: 0 }
            ) {
                saw_sync = true;
            }
        }
        assert!(saw_sync);
    }
}
