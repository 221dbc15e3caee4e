//! Alias arbitration state machine.
//!
//! Drives the Check-ID / Reserve-ID sequence needed to claim a 12-bit alias
//! on a fresh CAN segment:
//!
//! ```text
//! Idle --start--> CID1 --gap--> CID2 --gap--> CID3 --gap--> CID4
//!     --quiet window--> RID + AMD --> Active
//! ```
//!
//! The machine is deliberately free of I/O and clocks: [`AliasArbiter::poll`]
//! advances timers against a caller-supplied instant and returns the frames
//! to transmit, [`AliasArbiter::observe`] consumes bus traffic and returns
//! any defensive frames. The interface owns the timer and the frame sink.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::frame::CanFrame;
use crate::types::{Alias, NodeId};

/// Timing knobs for the arbitration sequence.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterTiming {
    /// Gap between consecutive Check-ID frames.
    pub cid_gap: Duration,
    /// Quiet window after CID4 before the alias may be reserved.
    pub reserve_quiet: Duration,
}

impl Default for ArbiterTiming {
    fn default() -> Self {
        Self {
            cid_gap: Duration::from_micros(250),
            reserve_quiet: Duration::from_millis(200),
        }
    }
}

/// Pseudo-random alias candidate generator, seeded from the node id so a
/// node's candidate sequence is stable across restarts. Never yields `0x000`
/// or `0xFFF`.
#[derive(Debug, Clone)]
pub struct AliasPrng {
    seed: u64,
}

impl AliasPrng {
    const MULTIPLIER: u64 = 0x5_DEEC_E66D;
    const INCREMENT: u64 = 0xB;
    const MASK: u64 = 0xFFFF_FFFF_FFFF;

    pub fn new(node: NodeId) -> Self {
        let seed = node.as_u64();
        Self {
            // An all-zero seed would get stuck near zero for early candidates.
            seed: if seed == 0 { 0x1B0C_A37A_4BA9 } else { seed },
        }
    }

    fn step(&mut self) {
        self.seed = self
            .seed
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT)
            & Self::MASK;
    }

    /// The next candidate alias.
    pub fn next_alias(&mut self) -> Alias {
        loop {
            self.step();
            let folded =
                ((self.seed >> 36) ^ (self.seed >> 24) ^ (self.seed >> 12) ^ self.seed) & 0xFFF;
            if folded != 0xFFF {
                if let Some(alias) = Alias::new(folded as u16) {
                    return alias;
                }
            }
        }
    }
}

/// Where the arbiter currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    /// Not arbitrating; no candidate chosen.
    Idle,
    /// CID `next_sequence - 1` has been sent; CID `next_sequence` is due at
    /// the deadline.
    CheckId { next_sequence: u8, deadline: Instant },
    /// All four CIDs sent; waiting out the quiet window.
    ReserveWait { deadline: Instant },
    /// Alias reserved and announced.
    Active,
}

/// Notifications surfaced to the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterEvent {
    AliasAcquired { alias: Alias },
    AliasLost { alias: Alias },
    RetriesExhausted { attempts: u32 },
}

/// State machine claiming one alias for one node.
pub struct AliasArbiter {
    node: NodeId,
    prng: AliasPrng,
    timing: ArbiterTiming,
    retry_limit: Option<u32>,
    attempts: u32,
    state: ArbiterState,
    candidate: Option<Alias>,
    events: VecDeque<ArbiterEvent>,
}

impl AliasArbiter {
    pub fn new(node: NodeId, timing: ArbiterTiming, retry_limit: Option<u32>) -> Self {
        Self {
            prng: AliasPrng::new(node),
            node,
            timing,
            retry_limit,
            attempts: 0,
            state: ArbiterState::Idle,
            candidate: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// The alias we own, once [`ArbiterState::Active`].
    pub fn alias(&self) -> Option<Alias> {
        match self.state {
            ArbiterState::Active => self.candidate,
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ArbiterState::Active)
    }

    /// Next instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ArbiterState::CheckId { deadline, .. } | ArbiterState::ReserveWait { deadline } => {
                Some(deadline)
            }
            ArbiterState::Idle | ArbiterState::Active => None,
        }
    }

    /// Drain one pending event.
    pub fn take_event(&mut self) -> Option<ArbiterEvent> {
        self.events.pop_front()
    }

    /// Take ownership of an externally assigned alias without arbitrating.
    ///
    /// Used on tethers where the alias is fixed by configuration; the machine
    /// still defends the alias and answers enquiries.
    pub fn adopt(&mut self, alias: Alias) {
        self.candidate = Some(alias);
        self.state = ArbiterState::Active;
    }

    /// Begin arbitration with a fresh candidate. Returns the CID1 frame.
    pub fn start(&mut self, now: Instant) -> Vec<CanFrame> {
        let candidate = self.prng.next_alias();
        self.candidate = Some(candidate);
        self.state = ArbiterState::CheckId {
            next_sequence: 2,
            deadline: now + self.timing.cid_gap,
        };
        debug!(%candidate, node = %self.node, "alias arbitration started");
        vec![CanFrame::check_id(1, self.node, candidate)]
    }

    /// Advance timers to `now`, returning any frames that became due.
    pub fn poll(&mut self, now: Instant) -> Vec<CanFrame> {
        let mut out = Vec::new();
        loop {
            match self.state {
                ArbiterState::CheckId {
                    next_sequence,
                    deadline,
                } if now >= deadline => {
                    let candidate = self.candidate.expect("candidate set while arbitrating");
                    out.push(CanFrame::check_id(next_sequence, self.node, candidate));
                    self.state = if next_sequence < 4 {
                        ArbiterState::CheckId {
                            next_sequence: next_sequence + 1,
                            deadline: deadline + self.timing.cid_gap,
                        }
                    } else {
                        ArbiterState::ReserveWait {
                            deadline: deadline + self.timing.reserve_quiet,
                        }
                    };
                }
                ArbiterState::ReserveWait { deadline } if now >= deadline => {
                    let alias = self.candidate.expect("candidate set while arbitrating");
                    out.push(CanFrame::reserve_id(alias));
                    out.push(CanFrame::alias_map_definition(self.node, alias));
                    self.state = ArbiterState::Active;
                    self.attempts = 0;
                    self.events.push_back(ArbiterEvent::AliasAcquired { alias });
                    info!(%alias, node = %self.node, "alias acquired");
                }
                _ => break,
            }
        }
        out
    }

    /// Feed one observed bus frame through the machine, returning any frames
    /// to transmit in response.
    pub fn observe(&mut self, frame: &CanFrame, now: Instant) -> Vec<CanFrame> {
        let Some(ours) = self.candidate else {
            return Vec::new();
        };

        match self.state {
            ArbiterState::CheckId { .. } | ArbiterState::ReserveWait { .. } => {
                if frame.source_alias() == ours.raw() {
                    // Someone else is using our candidate; give it up.
                    warn!(candidate = %ours, "alias collision during arbitration");
                    return self.restart(now);
                }
                Vec::new()
            }
            ArbiterState::Active => {
                if frame.source_alias() == ours.raw() {
                    if frame.is_check_id() {
                        // A newcomer is probing our alias; defend it.
                        debug!(alias = %ours, "defending reserved alias");
                        return vec![CanFrame::reserve_id(ours)];
                    }
                    // Live traffic under our alias: relinquish and rebuild.
                    warn!(alias = %ours, "alias collision while active");
                    self.events.push_back(ArbiterEvent::AliasLost { alias: ours });
                    let mut out = vec![CanFrame::alias_map_reset(self.node, ours)];
                    out.extend(self.restart(now));
                    return out;
                }
                if frame.is_alias_map_enquiry() {
                    let wants_us = match frame.node_id() {
                        None => true,
                        Some(node) => node == self.node,
                    };
                    if wants_us {
                        return vec![CanFrame::alias_map_definition(self.node, ours)];
                    }
                }
                Vec::new()
            }
            ArbiterState::Idle => Vec::new(),
        }
    }

    fn restart(&mut self, now: Instant) -> Vec<CanFrame> {
        self.attempts += 1;
        if let Some(limit) = self.retry_limit {
            if self.attempts >= limit {
                warn!(attempts = self.attempts, "alias arbitration retries exhausted");
                self.events.push_back(ArbiterEvent::RetriesExhausted {
                    attempts: self.attempts,
                });
                self.state = ArbiterState::Idle;
                self.candidate = None;
                return Vec::new();
            }
        }
        self.start(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter(node: u64) -> AliasArbiter {
        AliasArbiter::new(NodeId::from_u64(node), ArbiterTiming::default(), None)
    }

    fn run_to_active(arb: &mut AliasArbiter, t0: Instant) -> Vec<CanFrame> {
        let mut frames = arb.start(t0);
        let gap = arb.timing.cid_gap;
        frames.extend(arb.poll(t0 + gap * 3));
        frames.extend(arb.poll(t0 + gap * 3 + arb.timing.reserve_quiet));
        frames
    }

    #[test]
    fn prng_avoids_reserved_values() {
        let mut prng = AliasPrng::new(NodeId::from_u64(0x0102_0000_0101));
        for _ in 0..10_000 {
            let alias = prng.next_alias();
            assert!(alias.raw() >= 0x001 && alias.raw() <= 0xFFE);
        }
    }

    #[test]
    fn prng_is_deterministic_per_node() {
        let node = NodeId::from_u64(0x0102_0000_0101);
        let a: Vec<u16> = {
            let mut p = AliasPrng::new(node);
            (0..8).map(|_| p.next_alias().raw()).collect()
        };
        let b: Vec<u16> = {
            let mut p = AliasPrng::new(node);
            (0..8).map(|_| p.next_alias().raw()).collect()
        };
        assert_eq!(a, b);

        let mut other = AliasPrng::new(NodeId::from_u64(0x0102_0000_0102));
        let c: Vec<u16> = (0..8).map(|_| other.next_alias().raw()).collect();
        assert_ne!(a, c);
    }

    #[test]
    fn full_acquisition_sequence() {
        let mut arb = arbiter(0x0102_0000_0101);
        let t0 = Instant::now();

        let frames = arb.start(t0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].check_id_sequence(), Some(1));
        let candidate = frames[0].source_alias();

        // Nothing due before the gap elapses.
        assert!(arb.poll(t0).is_empty());

        let gap = ArbiterTiming::default().cid_gap;
        let frames = arb.poll(t0 + gap * 3);
        assert_eq!(
            frames
                .iter()
                .map(|f| f.check_id_sequence().unwrap())
                .collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert!(frames.iter().all(|f| f.source_alias() == candidate));

        // Quiet window not over yet.
        assert!(arb.poll(t0 + gap * 3 + Duration::from_millis(100)).is_empty());
        assert!(!arb.is_active());

        let frames = arb.poll(t0 + gap * 3 + Duration::from_millis(200));
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_reserve_id());
        assert!(frames[1].is_alias_map_definition());
        assert_eq!(frames[1].source_alias(), candidate);
        assert!(arb.is_active());
        assert_eq!(arb.alias().unwrap().raw(), candidate);
        assert_eq!(
            arb.take_event(),
            Some(ArbiterEvent::AliasAcquired {
                alias: Alias::new(candidate).unwrap()
            })
        );
    }

    #[test]
    fn collision_during_check_restarts_with_new_candidate() {
        let mut arb = arbiter(0x0102_0000_0101);
        let t0 = Instant::now();
        let frames = arb.start(t0);
        let first_candidate = frames[0].source_alias();

        // Any frame sourced from our candidate collides, even an unrelated one.
        let colliding = CanFrame::reserve_id(Alias::new(first_candidate).unwrap());
        let frames = arb.observe(&colliding, t0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].check_id_sequence(), Some(1));
        assert_ne!(frames[0].source_alias(), first_candidate);
        assert!(matches!(
            arb.state(),
            ArbiterState::CheckId { next_sequence: 2, .. }
        ));
    }

    #[test]
    fn unrelated_traffic_does_not_disturb_arbitration() {
        let mut arb = arbiter(0x0102_0000_0101);
        let t0 = Instant::now();
        let frames = arb.start(t0);
        let candidate = frames[0].source_alias();

        let other = CanFrame::reserve_id(Alias::new(0xEEE).unwrap());
        assert_ne!(candidate, 0xEEE);
        assert!(arb.observe(&other, t0).is_empty());
        assert!(matches!(arb.state(), ArbiterState::CheckId { .. }));
    }

    #[test]
    fn active_alias_is_defended_against_cid() {
        let mut arb = arbiter(0x0102_0000_0101);
        let t0 = Instant::now();
        run_to_active(&mut arb, t0);
        let ours = arb.alias().unwrap();

        let probe = CanFrame::check_id(2, NodeId::from_u64(0xBEEF), ours);
        let frames = arb.observe(&probe, t0 + Duration::from_secs(1));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_reserve_id());
        assert_eq!(frames[0].source_alias(), ours.raw());
        assert!(arb.is_active());
    }

    #[test]
    fn active_collision_relinquishes_and_rearbitrates() {
        let mut arb = arbiter(0x0102_0000_0101);
        let t0 = Instant::now();
        run_to_active(&mut arb, t0);
        let ours = arb.alias().unwrap();
        let _ = arb.take_event();

        let stomp = CanFrame::reserve_id(ours);
        let frames = arb.observe(&stomp, t0 + Duration::from_secs(1));
        assert!(frames[0].is_alias_map_reset());
        assert_eq!(frames[0].source_alias(), ours.raw());
        assert_eq!(frames[1].check_id_sequence(), Some(1));
        assert_ne!(frames[1].source_alias(), ours.raw());
        assert_eq!(arb.take_event(), Some(ArbiterEvent::AliasLost { alias: ours }));
        assert!(!arb.is_active());
    }

    #[test]
    fn answers_alias_map_enquiry_when_active() {
        let node = NodeId::from_u64(0x0102_0000_0101);
        let mut arb = AliasArbiter::new(node, ArbiterTiming::default(), None);
        let t0 = Instant::now();
        run_to_active(&mut arb, t0);
        let ours = arb.alias().unwrap();

        let enquirer = Alias::new(0xEEE).unwrap();
        let broadcast = CanFrame::alias_map_enquiry(None, enquirer);
        let frames = arb.observe(&broadcast, t0);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_alias_map_definition());
        assert_eq!(frames[0].source_alias(), ours.raw());
        assert_eq!(frames[0].node_id(), Some(node));

        let targeted = CanFrame::alias_map_enquiry(Some(node), enquirer);
        assert_eq!(arb.observe(&targeted, t0).len(), 1);

        let someone_else = CanFrame::alias_map_enquiry(Some(NodeId::from_u64(0xBEEF)), enquirer);
        assert!(arb.observe(&someone_else, t0).is_empty());
    }

    #[test]
    fn retry_limit_surfaces_exhaustion() {
        let mut arb = AliasArbiter::new(
            NodeId::from_u64(0x0102_0000_0101),
            ArbiterTiming::default(),
            Some(2),
        );
        let t0 = Instant::now();
        let mut frames = arb.start(t0);

        for _ in 0..2 {
            let candidate = frames[0].source_alias();
            let colliding = CanFrame::reserve_id(Alias::new(candidate).unwrap());
            frames = arb.observe(&colliding, t0);
            if frames.is_empty() {
                break;
            }
        }
        assert_eq!(arb.state(), ArbiterState::Idle);
        assert_eq!(
            arb.take_event(),
            Some(ArbiterEvent::RetriesExhausted { attempts: 2 })
        );
    }
}
