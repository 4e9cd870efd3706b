//! Decode session
//!
//! [`Csi2Session`] ties the three protocol layers together and owns all
//! per-capture state: four lane trackers, the link/merge layer and the
//! packet engine. It is driven one sample instant at a time and pushes
//! everything it decodes into a caller-supplied [`EventSink`], so it can
//! sit behind a stream node or be used directly against a sample buffer.

use crate::{Csi2Error, Result};

use super::lane::{LaneActivity, LaneTracker};
use super::link::LinkLayer;
use super::packet::PacketEngine;
use super::types::{Csi2Event, LaneSample, Packet, PayloadChunk};

/// How many lanes to merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneCountMode {
    /// Detect live lanes from sync and activity during the first bytes of
    /// each burst.
    Auto,
    /// Exactly this many lanes (1..=4); lanes that fail validation are
    /// reported and dropped.
    Fixed(u8),
}

#[derive(Debug, Clone, Copy)]
pub struct Csi2Config {
    pub lane_count: LaneCountMode,
    /// Byte-ready events a lane must produce before it is trusted, and the
    /// size of the merge desync window.
    pub activity_threshold: u32,
    /// Nominal lane bitrate in Mbps, accepted 500..=2500. Recorded for
    /// sanity checking only; decoding is sample-driven.
    pub bitrate_mbps: u32,
}

impl Default for Csi2Config {
    fn default() -> Self {
        Self {
            lane_count: LaneCountMode::Auto,
            activity_threshold: 4,
            bitrate_mbps: 1000,
        }
    }
}

impl Csi2Config {
    fn validate(&self, wired_lanes: u8) -> Result<()> {
        if wired_lanes == 0 || wired_lanes > 4 {
            return Err(Csi2Error::InvalidLaneCount(wired_lanes));
        }
        if let LaneCountMode::Fixed(n) = self.lane_count
            && (n == 0 || n > wired_lanes)
        {
            return Err(Csi2Error::InvalidLaneCount(n));
        }
        if !(500..=2500).contains(&self.bitrate_mbps) {
            return Err(Csi2Error::InvalidBitrate(self.bitrate_mbps));
        }
        if self.activity_threshold == 0 {
            return Err(Csi2Error::InvalidThreshold);
        }
        Ok(())
    }
}

/// Receives everything a session decodes. Implementors that only care
/// about one stream can leave the other callbacks defaulted.
pub trait EventSink {
    fn event(&mut self, event: Csi2Event);
    fn packet(&mut self, _packet: Packet) {}
    fn payload(&mut self, _chunk: PayloadChunk) {}
}

/// Sink that buffers everything, for batching and for tests.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub events: Vec<Csi2Event>,
    pub packets: Vec<Packet>,
    pub payloads: Vec<PayloadChunk>,
}

impl CollectSink {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.packets.is_empty() && self.payloads.is_empty()
    }
}

impl EventSink for CollectSink {
    fn event(&mut self, event: Csi2Event) {
        self.events.push(event);
    }

    fn packet(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    fn payload(&mut self, chunk: PayloadChunk) {
        self.payloads.push(chunk);
    }
}

/// Enforces the nondecreasing start-order promise on the event stream.
///
/// Some annotations are decided retroactively: the lane count at window
/// close, and packet events whose span starts at a byte held during the
/// membership window. When one of those would start before an event
/// already emitted, its start is moved up to the watermark and its end
/// kept.
struct OrderedSink<'a, S> {
    inner: &'a mut S,
    watermark: &'a mut u64,
}

impl<S: EventSink> EventSink for OrderedSink<'_, S> {
    fn event(&mut self, mut event: Csi2Event) {
        if event.ss < *self.watermark {
            event.ss = *self.watermark;
            event.es = event.es.max(event.ss);
        } else {
            *self.watermark = event.ss;
        }
        self.inner.event(event);
    }

    fn packet(&mut self, packet: Packet) {
        self.inner.packet(packet);
    }

    fn payload(&mut self, chunk: PayloadChunk) {
        self.inner.payload(chunk);
    }
}

pub struct Csi2Session {
    lanes: [LaneTracker; 4],
    link: LinkLayer,
    engine: PacketEngine,
    merged: Vec<super::lane::ReadyByte>,
    watermark: u64,
}

impl Csi2Session {
    /// `wired_lanes` is how many of the four sample slots are actually
    /// connected; a fixed lane count may not exceed it.
    pub fn new(config: Csi2Config, wired_lanes: u8) -> Result<Self> {
        config.validate(wired_lanes)?;
        Ok(Self {
            lanes: [
                LaneTracker::new(0),
                LaneTracker::new(1),
                LaneTracker::new(2),
                LaneTracker::new(3),
            ],
            link: LinkLayer::new(config.lane_count, wired_lanes, config.activity_threshold),
            engine: PacketEngine::new(),
            merged: Vec::new(),
            watermark: 0,
        })
    }

    /// Feed one sample instant. Unwired lanes pass `None`. Events arrive
    /// in layer order: lane state first, then link, then packet.
    pub fn process_sample<S: EventSink>(
        &mut self,
        ts: u64,
        samples: &[Option<LaneSample>; 4],
        sink: &mut S,
    ) {
        let mut sink = OrderedSink {
            inner: sink,
            watermark: &mut self.watermark,
        };
        let sink = &mut sink;

        let mut activity = [LaneActivity::default(); 4];
        for (i, sample) in samples.iter().enumerate() {
            if let Some(sample) = sample {
                activity[i] = self.lanes[i].tick(ts, *sample, sink);
            }
        }

        self.merged.clear();
        let signal = self
            .link
            .update(ts, &mut self.lanes, &activity, &mut self.merged, sink);

        if signal.burst_started {
            self.engine.begin_burst();
        }
        for byte in self.merged.drain(..) {
            self.engine.push_byte(byte, sink);
        }
        if signal.burst_ended {
            self.engine.end_burst(ts, sink);
        }
    }

    /// End of capture. Flushes bytes still queued in an open burst and
    /// reports a packet cut off mid-decode as truncated.
    pub fn finish<S: EventSink>(&mut self, ts: u64, sink: &mut S) {
        let mut sink = OrderedSink {
            inner: sink,
            watermark: &mut self.watermark,
        };
        let sink = &mut sink;

        self.merged.clear();
        let signal = self.link.finish(ts, &mut self.lanes, &mut self.merged, sink);
        if signal.burst_started {
            self.engine.begin_burst();
        }
        for byte in self.merged.drain(..) {
            self.engine.push_byte(byte, sink);
        }
        self.engine.end_burst(ts, sink);
    }
}
