//! Example: decoding a synthetic CSI-2 frame
//!
//! Builds a one-lane D-PHY waveform for a complete frame (frame start,
//! a few RAW8 lines, frame end), streams it through the decoder node and
//! prints the resulting events and packets.
//!
//! Usage:
//!   cargo run --release --example frame_decode -- --lines 4 --line-bytes 32
//!
//! With full event annotations:
//!   RUST_LOG=debug cargo run --release --example frame_decode

use std::collections::VecDeque;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use csi2_dphy::protocol::{checksum, ecc};
use csi2_dphy::runtime::{InputPort, OutputPort, Pipeline, ProcessNode, WorkError, WorkResult};
use csi2_dphy::{
    Csi2Config, Csi2Decoder, Csi2Event, DataType, LaneCountMode, Packet, PayloadChunk, Sample,
    WaveformSource,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of RAW8 lines in the frame
    #[arg(long, default_value = "4")]
    lines: usize,

    /// Payload bytes per line
    #[arg(long, default_value = "32")]
    line_bytes: usize,

    /// Frame number carried in the frame start/end packets
    #[arg(long, default_value = "1")]
    frame: u16,
}

/// Per-tick lane line levels, before run-length encoding.
#[derive(Default)]
struct LaneLevels {
    p: Vec<bool>,
    n: Vec<bool>,
}

impl LaneLevels {
    fn lp(&mut self, ticks: usize) {
        self.p.extend(std::iter::repeat_n(true, ticks));
        self.n.extend(std::iter::repeat_n(true, ticks));
    }

    fn byte(&mut self, byte: u8) {
        for bit in 0..8 {
            let level = (byte >> bit) & 1 != 0;
            self.p.push(level);
            self.n.push(!level);
        }
    }

    /// One HS burst: LP lead-in, sync byte, packet bytes.
    fn burst(&mut self, bytes: &[u8]) {
        self.lp(8);
        self.byte(0xB8);
        for &b in bytes {
            self.byte(b);
        }
    }
}

fn header(data_id: u8, field: u16) -> [u8; 4] {
    let [lo, hi] = field.to_le_bytes();
    [data_id, lo, hi, ecc::compute([data_id, lo, hi])]
}

/// Waveform channels for one frame. Ticks are 2 time units apart; lane
/// levels change at even timestamps and the clock edge for tick k lands
/// at 2k + 1, so the decoder samples each level mid-bit.
fn frame_waveform(args: &Args) -> Vec<(String, Vec<Sample>)> {
    let mut lane = LaneLevels::default();

    lane.burst(&header(DataType::FRAME_START.code(), args.frame));
    for line in 0..args.lines {
        let payload: Vec<u8> = (0..args.line_bytes)
            .map(|i| (line * 31 + i) as u8)
            .collect();
        let mut bytes = header(DataType::RAW8.code(), payload.len() as u16).to_vec();
        let crc = checksum::checksum(&payload);
        bytes.extend(&payload);
        bytes.extend(crc.to_le_bytes());
        lane.burst(&bytes);
    }
    lane.burst(&header(DataType::FRAME_END.code(), args.frame));
    lane.lp(8);

    let rle = |levels: &[bool]| -> Vec<Sample> {
        let mut out: Vec<Sample> = Vec::new();
        for (k, &level) in levels.iter().enumerate() {
            if out.last().map(|s| s.value) != Some(level) {
                out.push(Sample::new(level, 2 * k as u64));
            }
        }
        out
    };

    let mut clk = vec![Sample::new(false, 0)];
    for k in 0..lane.p.len() {
        clk.push(Sample::new(k % 2 == 0, 2 * k as u64 + 1));
    }

    vec![
        ("clk".to_string(), clk),
        ("d0_p".to_string(), rle(&lane.p)),
        ("d0_n".to_string(), rle(&lane.n)),
    ]
}

/// Sink that prints decoded events, packets and payload sizes.
#[derive(Default)]
struct FramePrinter {
    packet_count: usize,
    payload_bytes: usize,
    done: [bool; 3],
}

impl FramePrinter {
    fn drain<T, F: FnMut(T)>(
        input: Option<csi2_dphy::runtime::Receiver<'_, T>>,
        done: &mut bool,
        mut handle: F,
    ) -> usize {
        let Some(mut input) = input else { return 0 };
        let mut n = 0;
        loop {
            match input.recv_timeout(Duration::from_millis(1)) {
                Ok(item) => {
                    handle(item);
                    n += 1;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    *done = true;
                    break;
                }
            }
        }
        n
    }
}

impl ProcessNode for FramePrinter {
    fn name(&self) -> &str {
        "frame_printer"
    }

    fn num_inputs(&self) -> usize {
        3
    }

    fn num_outputs(&self) -> usize {
        0 // Sink
    }

    fn input_schema(&self) -> Vec<csi2_dphy::PortSchema> {
        use csi2_dphy::{PortDirection, PortSchema};
        vec![
            PortSchema::new::<Csi2Event>("events", 0, PortDirection::Input),
            PortSchema::new::<Packet>("packets", 1, PortDirection::Input),
            PortSchema::new::<PayloadChunk>("payload", 2, PortDirection::Input),
        ]
    }

    fn output_schema(&self) -> Vec<csi2_dphy::PortSchema> {
        vec![]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut event_buffer = VecDeque::new();
        let mut packet_buffer = VecDeque::new();
        let mut payload_buffer = VecDeque::new();

        let mut n = 0;
        let mut packet_count = self.packet_count;
        n += Self::drain(
            inputs.first().and_then(|p| p.get::<Csi2Event>(&mut event_buffer)),
            &mut self.done[0],
            |event| tracing::debug!("[{}..{}] {:?}", event.ss, event.es, event.kind),
        );
        n += Self::drain(
            inputs.get(1).and_then(|p| p.get::<Packet>(&mut packet_buffer)),
            &mut self.done[1],
            |packet| {
                packet_count += 1;
                match packet {
                    Packet::Short {
                        data_type,
                        virtual_channel,
                        short_data,
                        ss,
                        ..
                    } => info!(
                        "Packet #{}: {} VC{} data=0x{:04X} at t={}",
                        packet_count, data_type, virtual_channel, short_data, ss
                    ),
                    Packet::Long {
                        data_type,
                        virtual_channel,
                        word_count,
                        checksum_valid,
                        ss,
                        ..
                    } => info!(
                        "Packet #{}: {} VC{} wc={} crc_ok={} at t={}",
                        packet_count, data_type, virtual_channel, word_count, checksum_valid, ss
                    ),
                }
            },
        );
        self.packet_count = packet_count;
        let mut payload_bytes = self.payload_bytes;
        n += Self::drain(
            inputs.get(2).and_then(|p| p.get::<PayloadChunk>(&mut payload_buffer)),
            &mut self.done[2],
            |chunk: PayloadChunk| payload_bytes += chunk.data.len(),
        );
        self.payload_bytes = payload_bytes;

        if self.done.iter().all(|&d| d) {
            info!(
                "Decode complete: {} packets, {} payload bytes",
                self.packet_count, self.payload_bytes
            );
            return Err(WorkError::Shutdown);
        }
        Ok(n)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== CSI-2 Frame Decode Example ===");
    info!(
        "Frame {}: {} lines of {} RAW8 bytes",
        args.frame, args.lines, args.line_bytes
    );

    let mut pipeline = Pipeline::new().with_default_buffer_size(100_000);

    pipeline.add_process("waveform", WaveformSource::new(frame_waveform(&args))?)?;

    let config = Csi2Config {
        lane_count: LaneCountMode::Fixed(1),
        ..Csi2Config::default()
    };
    pipeline.add_process("decoder", Csi2Decoder::new(config, 1)?)?;

    pipeline.connect("waveform", "clk", "decoder", "clk")?;
    pipeline.connect("waveform", "d0_p", "decoder", "d0_p")?;
    pipeline.connect("waveform", "d0_n", "decoder", "d0_n")?;

    pipeline.add_process("printer", FramePrinter::default())?;
    pipeline.connect("decoder", "events", "printer", "events")?;
    pipeline.connect("decoder", "packets", "printer", "packets")?;
    pipeline.connect("decoder", "payload", "printer", "payload")?;

    let scheduler = pipeline.build()?;
    scheduler.wait();

    Ok(())
}
