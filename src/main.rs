//! Effect Handshake Simulator
//!
//! Runs a scripted in-process session: two players walk up to each other,
//! shake hands and swap effects while a spectator watches. The run is then
//! replayed to check that it ends in the same state.
//!
//! Usage: `effect-handshake-sim [config.json]`

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use effect_handshake::{
    HandshakeConfig, PeerId, PeerRole, GameMode, Vec3, VERSION,
    core::hash::StateHash,
    handshake::{
        events::HandshakeEventData,
        peer::{BodyPose, LocalPose},
    },
    network::{BusConfig, LoopbackNetwork},
};

const EFFECTS: [&str; 4] = ["ripple", "aurora", "sparks", "tide"];
const WALK_TICKS: u64 = 240;
const TOTAL_TICKS: u64 = 480;
const BUS_SEED: u64 = 12345;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = match std::env::args().nth(1) {
        Some(path) => HandshakeConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => HandshakeConfig::default(),
    };

    info!("Effect Handshake Simulator v{}", VERSION);
    info!("Tick Rate: {} Hz", config.tick_rate);

    let hash = simulate(&config, true).await?;
    info!("Final State Hash: {}", hex::encode(hash));

    info!("=== Verifying Determinism ===");
    let replay_hash = simulate(&config, false).await?;
    info!("Replay State Hash: {}", hex::encode(replay_hash));

    if hash == replay_hash {
        info!("DETERMINISM VERIFIED: Hashes match!");
    } else {
        info!("DETERMINISM FAILURE: Hashes differ!");
    }
    Ok(())
}

/// Hand held out in front of the body at chest height.
fn hand_in_front(position: Vec3, forward: Vec3, reach: f32) -> Vec3 {
    position + Vec3::new(0.0, 1.2, 0.0) + forward.normalize().scale(reach)
}

fn pose(position: Vec3, forward: Vec3) -> LocalPose {
    LocalPose::new(BodyPose::new(position, forward), hand_in_front(position, forward, 0.45))
}

/// Run the scripted session and return the final state hash.
async fn simulate(config: &HandshakeConfig, verbose: bool) -> anyhow::Result<StateHash> {
    let a = PeerId::new(1);
    let b = PeerId::new(2);
    let watcher = PeerId::new(3);

    let mut net = LoopbackNetwork::new(
        config.clone(),
        BusConfig {
            seed: BUS_SEED,
            drop_probability: 0.05,
            ..Default::default()
        },
        EFFECTS,
    );

    let start_a = Vec3::new(0.0, 0.0, -2.0);
    let start_b = Vec3::new(0.0, 0.0, 2.0);
    net.add_peer(a, PeerRole::Player, pose(start_a, Vec3::FORWARD))?;
    net.add_peer(b, PeerRole::Player, pose(start_b, Vec3::BACK))?;
    net.add_peer(watcher, PeerRole::Spectator, pose(Vec3::new(3.0, 0.0, 0.0), Vec3::RIGHT.scale(-1.0)))?;
    net.start_all(GameMode::MultiplePlayer).await?;

    for tick in 1..=TOTAL_TICKS {
        // Walk towards each other, stopping half a metre apart
        let t = (tick.min(WALK_TICKS) as f32) / WALK_TICKS as f32;
        let offset = 1.5 * t;
        net.board().set(a, pose(start_a + Vec3::FORWARD.scale(offset), Vec3::FORWARD));
        net.board().set(b, pose(start_b + Vec3::BACK.scale(offset), Vec3::BACK));

        for event in net.step() {
            if !verbose {
                continue;
            }
            match event.data {
                HandshakeEventData::CandidateAcquired { candidate, effect, distance } => {
                    info!("Tick {}: {} noticed {} ({}) at {:.2}", event.tick, event.peer, candidate, effect, distance);
                }
                HandshakeEventData::Committed { from, to } => {
                    info!("Tick {}: {} swapped {} -> {}", event.tick, event.peer, from, to);
                }
                HandshakeEventData::CandidateLost { .. } | HandshakeEventData::Aborted { .. } => {}
            }
        }
    }

    if verbose {
        for id in net.peer_ids() {
            if let Some(state) = net.snapshot(id) {
                info!("{}: current {}, target {:?}, blend {:.2}", id, state.current, state.target, state.blend);
            }
        }
    }

    Ok(net.state_hash())
}
