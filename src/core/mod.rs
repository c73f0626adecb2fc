//! Core primitives.
//!
//! Vector math, range remapping, tick timing, and the deterministic helpers
//! used to replay simulated sessions.

pub mod vec3;
pub mod remap;
pub mod clock;
pub mod rng;
pub mod hash;

// Re-export core types
pub use vec3::Vec3;
pub use remap::{MapMode, remap};
pub use clock::{TickClock, TickContext};
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher, compute_state_hash};
