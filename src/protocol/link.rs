//! Lane admission and byte merging
//!
//! Owns the burst lifecycle: waits for lane 0 to enter HS-DATA, holds the
//! merger until lane 0 has produced enough bytes to judge which other lanes
//! are live, then fixes membership and interleaves ready bytes round-robin
//! into the single stream the packet engine consumes.

use tracing::debug;

use super::lane::{LaneActivity, LaneTracker, ReadyByte};
use super::session::{EventSink, LaneCountMode};
use super::types::{Csi2Event, EventKind, ProtocolErrorKind};

/// Whether a lane takes part in the merged stream. Lane 0 carries the sync
/// reference and only needs to be in HS-DATA; the other lanes must prove
/// themselves with a sync match and sustained byte output, otherwise a
/// floating or unwired input would stall the merger forever.
pub fn admit(
    is_lane_zero: bool,
    in_hs_data: bool,
    sync_seen: bool,
    bytes_seen: u32,
    threshold: u32,
) -> bool {
    if is_lane_zero {
        in_hs_data
    } else {
        in_hs_data && sync_seen && bytes_seen >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No burst; lane 0 idle.
    Idle,
    /// Lane 0 in HS-DATA, membership window still open.
    Holding,
    /// Membership fixed, bytes flowing.
    Merging,
}

/// What one update pass did, for the session to relay to the packet engine.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LinkSignal {
    pub burst_started: bool,
    pub burst_ended: bool,
}

pub(crate) struct LinkLayer {
    mode: LaneCountMode,
    wired: u8,
    threshold: u32,
    phase: Phase,
    members: Vec<u8>,
    reported_count: Option<u8>,
}

impl LinkLayer {
    pub fn new(mode: LaneCountMode, wired: u8, threshold: u32) -> Self {
        Self {
            mode,
            wired,
            threshold,
            phase: Phase::Idle,
            members: Vec::with_capacity(4),
            reported_count: None,
        }
    }

    /// Advance the burst lifecycle after the lane trackers have been ticked.
    /// Merged bytes are appended to `merged` in wire order.
    pub fn update<S: EventSink>(
        &mut self,
        ts: u64,
        lanes: &mut [LaneTracker; 4],
        activity: &[LaneActivity; 4],
        merged: &mut Vec<ReadyByte>,
        sink: &mut S,
    ) -> LinkSignal {
        let mut signal = LinkSignal::default();

        match self.phase {
            Phase::Idle => {
                if lanes[0].in_hs_data() {
                    debug!("burst: lane 0 active at {ts}, holding merge");
                    self.phase = Phase::Holding;
                }
            }
            Phase::Holding => {
                let lane0_gone = !lanes[0].in_hs_data();
                if lane0_gone || lanes[0].bytes_seen >= self.threshold {
                    // Close the window. A burst too short to fill it still
                    // gets its queued bytes through the packet engine.
                    self.fix_membership(ts, lanes, sink);
                    signal.burst_started = true;
                    self.phase = Phase::Merging;
                    self.drain_rounds(lanes, merged);
                    if lane0_gone {
                        signal.burst_ended = true;
                        self.end_burst(lanes);
                    }
                }
            }
            Phase::Merging => {
                self.drop_departed(lanes, activity);
                self.drain_rounds(lanes, merged);
                self.discard_non_members(lanes);
                if !lanes[0].in_hs_data() {
                    debug!("burst: lane 0 idle at {ts}, burst over");
                    signal.burst_ended = true;
                    self.end_burst(lanes);
                } else {
                    self.check_desync(ts, lanes, sink);
                }
            }
        }

        signal
    }

    /// Decide who merges. Auto mode takes every lane that passed admission;
    /// a configured count expects exactly lanes `0..n` and flags the ones
    /// that never showed up, dropping them rather than stalling on them.
    fn fix_membership<S: EventSink>(
        &mut self,
        ts: u64,
        lanes: &mut [LaneTracker; 4],
        sink: &mut S,
    ) {
        self.members.clear();
        let window_ss = lanes[0].ready.front().map_or(ts, |b| b.ss);
        let candidates = match self.mode {
            LaneCountMode::Auto => self.wired,
            LaneCountMode::Fixed(n) => n,
        };
        for i in 0..candidates {
            let lane = &lanes[i as usize];
            if admit(
                i == 0,
                lane.in_hs_data(),
                lane.sync_seen,
                lane.bytes_seen,
                self.threshold,
            ) {
                self.members.push(i);
            } else if matches!(self.mode, LaneCountMode::Fixed(_)) {
                sink.event(Csi2Event {
                    kind: EventKind::ProtocolError {
                        kind: ProtocolErrorKind::InactiveLane { lane: i },
                    },
                    ss: window_ss,
                    es: ts,
                });
            }
        }

        let count = self.members.len() as u8;
        debug!("burst: merging lanes {:?}", self.members);
        if self.reported_count != Some(count) {
            self.reported_count = Some(count);
            // Span the detection window, first held byte to decision
            // instant.
            sink.event(Csi2Event {
                kind: EventKind::LaneCount { lanes: count },
                ss: window_ss,
                es: ts,
            });
        }
        self.discard_non_members(lanes);
    }

    /// A synced but unadmitted lane may keep streaming for the whole
    /// burst; its bytes can never merge and are dropped as they appear.
    fn discard_non_members(&self, lanes: &mut [LaneTracker; 4]) {
        for i in 0..4u8 {
            if !self.members.contains(&i) {
                lanes[i as usize].ready.clear();
            }
        }
    }

    /// Pop one byte per member, ascending lane index, while every member
    /// has one queued. Stalling until the round is complete keeps wire
    /// order exact across lanes.
    fn drain_rounds(&mut self, lanes: &mut [LaneTracker; 4], merged: &mut Vec<ReadyByte>) {
        if self.members.is_empty() {
            return;
        }
        while self
            .members
            .iter()
            .all(|&i| !lanes[i as usize].ready.is_empty())
        {
            for &i in &self.members {
                // Non-empty by the loop condition.
                if let Some(byte) = lanes[i as usize].ready.pop_front() {
                    merged.push(byte);
                }
            }
        }
    }

    /// A non-zero member dipping back to LP-11 mid-burst drops out; its
    /// leftover bytes cannot be sequenced and are discarded with it.
    fn drop_departed(&mut self, lanes: &mut [LaneTracker; 4], activity: &[LaneActivity; 4]) {
        let mut departed = false;
        self.members.retain(|&i| {
            if i != 0 && (activity[i as usize].left_hs_data || !lanes[i as usize].in_hs_data()) {
                departed = true;
                false
            } else {
                true
            }
        });
        if departed {
            for i in 0..4u8 {
                if !self.members.contains(&i) {
                    lanes[i as usize].clear_burst_state();
                }
            }
        }
    }

    /// Queue skew past the desync window means the members no longer agree
    /// on byte boundaries. Report it, re-derive membership from the lanes
    /// still carrying data and start the queues over; the skewed bytes are
    /// unsalvageable.
    fn check_desync<S: EventSink>(
        &mut self,
        ts: u64,
        lanes: &mut [LaneTracker; 4],
        sink: &mut S,
    ) {
        if self.members.len() < 2 {
            return;
        }
        let max_queued = self
            .members
            .iter()
            .map(|&i| lanes[i as usize].ready.len() as u32)
            .max()
            .unwrap_or(0);
        if max_queued > self.threshold {
            sink.event(Csi2Event {
                kind: EventKind::LaneSyncError,
                ss: ts,
                es: ts,
            });
            self.members.retain(|&i| lanes[i as usize].in_hs_data());
            for lane in lanes.iter_mut() {
                lane.ready.clear();
            }
            debug!("desync at {ts}: membership now {:?}", self.members);
        }
    }

    /// End of capture with the burst possibly still open: close a pending
    /// membership window, flush what merged cleanly and tear down.
    pub fn finish<S: EventSink>(
        &mut self,
        ts: u64,
        lanes: &mut [LaneTracker; 4],
        merged: &mut Vec<ReadyByte>,
        sink: &mut S,
    ) -> LinkSignal {
        let mut signal = LinkSignal::default();
        match self.phase {
            Phase::Idle => {}
            Phase::Holding => {
                self.fix_membership(ts, lanes, sink);
                signal.burst_started = true;
                self.drain_rounds(lanes, merged);
                signal.burst_ended = true;
                self.end_burst(lanes);
            }
            Phase::Merging => {
                self.drain_rounds(lanes, merged);
                signal.burst_ended = true;
                self.end_burst(lanes);
            }
        }
        signal
    }

    fn end_burst(&mut self, lanes: &mut [LaneTracker; 4]) {
        self.members.clear();
        for lane in lanes.iter_mut() {
            lane.clear_burst_state();
        }
        self.phase = Phase::Idle;
    }
}
