//! # Effect Handshake
//!
//! Proximity handshake for swapping visual effects between networked peers.
//! Two peers who face each other and hold their hands together long enough
//! exchange the effect they display.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     EFFECT HANDSHAKE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                              │
//! │  ├── vec3.rs       - 3D vector, view angles                  │
//! │  ├── remap.rs      - Range remapping (clamp/wrap/mirror)     │
//! │  ├── clock.rs      - Fixed-rate tick clock                   │
//! │  ├── rng.rs        - Deterministic Xorshift128+ PRNG         │
//! │  └── hash.rs       - State hashing for replay checks         │
//! │                                                              │
//! │  handshake/        - Handshake logic (single-threaded tick)  │
//! │  ├── peer.rs       - Ids, roles, poses, peer views           │
//! │  ├── replicated.rs - Owner-written replicated fields         │
//! │  ├── eligibility.rs- Hand visibility, facing, nearest peer   │
//! │  ├── directory.rs  - Polled roster with join/leave events    │
//! │  ├── effects.rs    - Effect dispatcher and catalog           │
//! │  ├── events.rs     - Handshake events                        │
//! │  └── machine.rs    - Per-peer handshake state machine        │
//! │                                                              │
//! │  network/          - Replication plumbing                    │
//! │  ├── protocol.rs   - Field update wire format                │
//! │  ├── bus.rs        - Best-effort delayed delivery            │
//! │  ├── session.rs    - Session setup, readiness, ticking       │
//! │  └── loopback.rs   - In-process multi-peer network           │
//! │                                                              │
//! │  config.rs         - Tunables (JSON)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Each replicated field has exactly one writer, its owning peer. Fields
//! propagate independently, so an observer may briefly see a target from
//! one tick next to a blend from another. Readers tolerate this; nothing
//! waits for a consistent triple.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod handshake;
pub mod network;

// Re-export commonly used types
pub use config::{ConfigError, HandshakeConfig};
pub use core::clock::{TickClock, TickContext};
pub use core::vec3::Vec3;
pub use handshake::peer::{EffectId, GameMode, PeerId, PeerRole};
pub use handshake::machine::{HandshakeStateMachine, SetupError};
pub use network::session::{HandshakeSession, SessionError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tick rate (Hz)
pub const TICK_RATE: u32 = 60;
