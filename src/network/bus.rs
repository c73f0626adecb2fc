//! Replication Bus
//!
//! Best-effort delivery of field updates to one observer. Each update is
//! delayed independently, so two fields written on the same tick can arrive
//! on different ticks and in either order. Updates may also be dropped.
//! Jitter comes from a seeded RNG, which keeps simulated runs replayable.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::handshake::replicated::FieldUpdate;
use crate::network::protocol::{decode_update, encode_update};

/// Delivery behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Fewest ticks between publish and delivery
    pub min_delay_ticks: u32,
    /// Most ticks between publish and delivery
    pub max_delay_ticks: u32,
    /// Probability that an update is lost
    pub drop_probability: f32,
    /// Jitter seed
    pub seed: u64,
    /// Ticks between full-state resends that repair lost updates (0 = never)
    pub resync_interval_ticks: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            min_delay_ticks: 1,
            max_delay_ticks: 4,
            drop_probability: 0.0,
            seed: 0,
            resync_interval_ticks: 60,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Updates handed to the bus
    pub published: u64,
    /// Updates lost on purpose
    pub dropped: u64,
    /// Updates delivered
    pub delivered: u64,
    /// Updates that failed to decode
    pub malformed: u64,
}

/// In-flight updates for one observer.
#[derive(Debug)]
pub struct ReplicationBus {
    config: BusConfig,
    rng: DeterministicRng,
    // (deliver_at, sequence) -> encoded update
    in_flight: BTreeMap<(u64, u64), Vec<u8>>,
    sequence: u64,
    stats: BusStats,
}

impl ReplicationBus {
    /// Create a bus.
    pub fn new(config: BusConfig) -> Self {
        let rng = DeterministicRng::new(config.seed);
        Self {
            config,
            rng,
            in_flight: BTreeMap::new(),
            sequence: 0,
            stats: BusStats::default(),
        }
    }

    /// Queue an update written on `now_tick`.
    pub fn publish(&mut self, update: &FieldUpdate, now_tick: u64) {
        self.stats.published += 1;

        if self.rng.chance(self.config.drop_probability) {
            self.stats.dropped += 1;
            debug!("Dropped {:?} from {}", update.value.field(), update.writer);
            return;
        }

        let bytes = match encode_update(update) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode update from {}: {}", update.writer, e);
                return;
            }
        };

        let delay = self
            .rng
            .next_int_range(self.config.min_delay_ticks, self.config.max_delay_ticks);
        self.in_flight.insert((now_tick + delay as u64, self.sequence), bytes);
        self.sequence += 1;
    }

    /// Take every update due at or before `now_tick`, in arrival order.
    pub fn deliver_ready(&mut self, now_tick: u64) -> Vec<FieldUpdate> {
        let pending = self.in_flight.split_off(&(now_tick + 1, 0));
        let due = std::mem::replace(&mut self.in_flight, pending);

        let mut delivered = Vec::with_capacity(due.len());
        for bytes in due.into_values() {
            match decode_update(&bytes) {
                Ok(update) => delivered.push(update),
                Err(e) => {
                    self.stats.malformed += 1;
                    warn!("Discarding malformed update: {}", e);
                }
            }
        }
        self.stats.delivered += delivered.len() as u64;
        delivered
    }

    /// Number of updates still in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Discard everything in flight.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Delivery counters.
    pub fn stats(&self) -> BusStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::peer::{EffectId, PeerId};
    use crate::handshake::replicated::FieldValue;

    fn update(tick: u64, value: FieldValue) -> FieldUpdate {
        FieldUpdate {
            writer: PeerId(1),
            tick,
            seq: tick,
            value,
        }
    }

    #[test]
    fn test_fixed_delay() {
        let mut bus = ReplicationBus::new(BusConfig {
            min_delay_ticks: 2,
            max_delay_ticks: 2,
            ..Default::default()
        });
        bus.publish(&update(10, FieldValue::BlendFraction(0.5)), 10);

        assert!(bus.deliver_ready(11).is_empty());
        let delivered = bus.deliver_ready(12);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].value, FieldValue::BlendFraction(0.5));
        assert_eq!(bus.in_flight(), 0);
    }

    #[test]
    fn test_delays_within_bounds() {
        let mut bus = ReplicationBus::new(BusConfig {
            min_delay_ticks: 1,
            max_delay_ticks: 5,
            seed: 77,
            ..Default::default()
        });
        for i in 0..100 {
            bus.publish(&update(0, FieldValue::CurrentEffect(EffectId(i))), 0);
        }
        assert!(bus.deliver_ready(0).is_empty());
        assert_eq!(bus.deliver_ready(5).len(), 100);
    }

    #[test]
    fn test_drop_everything() {
        let mut bus = ReplicationBus::new(BusConfig {
            drop_probability: 1.0,
            ..Default::default()
        });
        for _ in 0..10 {
            bus.publish(&update(0, FieldValue::TargetEffect(None)), 0);
        }
        assert!(bus.deliver_ready(100).is_empty());
        assert_eq!(bus.stats().dropped, 10);
        assert_eq!(bus.stats().published, 10);
    }

    #[test]
    fn test_same_seed_same_schedule() {
        let run = |seed| {
            let mut bus = ReplicationBus::new(BusConfig {
                min_delay_ticks: 0,
                max_delay_ticks: 6,
                drop_probability: 0.2,
                seed,
                ..Default::default()
            });
            let mut arrivals = Vec::new();
            for tick in 0..50u64 {
                bus.publish(&update(tick, FieldValue::BlendFraction(0.1)), tick);
                arrivals.push(bus.deliver_ready(tick).len());
            }
            arrivals
        };
        assert_eq!(run(5), run(5));
    }
}
