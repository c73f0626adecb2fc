//! Effect Dispatch
//!
//! The sink the state machine talks to: `start` on commit, `present` every
//! tick with the local replicated triple for cross-fade rendering.
//!
//! `EffectCatalog` is the bundled implementation. It keeps per-effect
//! bookkeeping (on/off, alpha, marching range) for a renderer to read.

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::remap::{remap, MapMode};
use crate::handshake::peer::EffectId;
use crate::handshake::replicated::ReplicaSnapshot;

/// What the render layer needs for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendFrame {
    /// Local replicated triple
    pub state: ReplicaSnapshot,
    /// Seconds since the previous frame
    pub dt: f32,
}

/// Activates effects and receives blend state.
pub trait EffectDispatcher {
    /// Switch an effect on after a commit or at game start.
    fn start(&mut self, effect: EffectId);

    /// Per-tick blend state. Default ignores it.
    fn present(&mut self, _frame: &BlendFrame) {}

    /// Number of available effects.
    fn effect_count(&self) -> usize;
}

impl<T: EffectDispatcher + ?Sized> EffectDispatcher for Box<T> {
    fn start(&mut self, effect: EffectId) {
        (**self).start(effect)
    }

    fn present(&mut self, frame: &BlendFrame) {
        (**self).present(frame)
    }

    fn effect_count(&self) -> usize {
        (**self).effect_count()
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Animation settings for one effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    /// Distance the marching band can travel
    pub max_range: f32,
    /// Width of the marching band
    pub width: f32,
    /// Band speed per second
    pub marching_speed: f32,
    /// What happens when the band passes `max_range`
    pub marching_mode: MapMode,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            max_range: 30.0,
            width: 2.0,
            marching_speed: 1.0,
            marching_mode: MapMode::Wrap,
        }
    }
}

/// Runtime state of one effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectSlot {
    /// Display name
    pub name: String,
    /// Animation settings
    pub settings: EffectSettings,
    /// Switched on
    pub running: bool,
    /// Current blend alpha
    pub alpha: f32,
    /// Band outer/inner edge
    pub range: (f32, f32),
    marching: f32,
}

impl EffectSlot {
    fn new(name: String, settings: EffectSettings) -> Self {
        Self {
            name,
            settings,
            running: false,
            alpha: 0.0,
            range: (0.0, 0.0),
            marching: 0.0,
        }
    }

    fn switch(&mut self, on: bool) {
        self.running = on;
        self.marching = 0.0;
        self.range = (0.0, 0.0);
        if !on {
            self.alpha = 0.0;
        }
    }

    fn advance(&mut self, dt: f32) {
        let s = &self.settings;
        self.marching += dt * s.marching_speed;
        let outer = remap(self.marching, 0.0, s.max_range, 0.0, s.max_range, s.marching_mode);
        let inner = remap(
            (self.marching - s.width).max(0.0),
            0.0,
            s.max_range,
            0.0,
            s.max_range,
            s.marching_mode,
        );
        self.range = (outer, inner);
    }
}

/// Named list of effects, addressed by `EffectId`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EffectCatalog {
    slots: Vec<EffectSlot>,
    started: Vec<EffectId>,
}

impl EffectCatalog {
    /// Catalog with default settings for each name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: names
                .into_iter()
                .map(|name| EffectSlot::new(name.into(), EffectSettings::default()))
                .collect(),
            started: Vec::new(),
        }
    }

    /// Append an effect with explicit settings.
    pub fn with_effect(mut self, name: impl Into<String>, settings: EffectSettings) -> Self {
        self.slots.push(EffectSlot::new(name.into(), settings));
        self
    }

    /// All slots.
    pub fn slots(&self) -> &[EffectSlot] {
        &self.slots
    }

    /// One slot.
    pub fn slot(&self, effect: EffectId) -> Option<&EffectSlot> {
        self.slots.get(effect.index())
    }

    /// Effects started so far, oldest first.
    pub fn start_history(&self) -> &[EffectId] {
        &self.started
    }

    /// The effect currently switched on.
    pub fn running(&self) -> Option<EffectId> {
        self.slots
            .iter()
            .position(|slot| slot.running)
            .map(|i| EffectId(i as u32))
    }
}

impl EffectDispatcher for EffectCatalog {
    fn start(&mut self, effect: EffectId) {
        if effect.index() >= self.slots.len() {
            warn!("Ignoring start of unknown {} ({} effects)", effect, self.slots.len());
            return;
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.switch(i == effect.index());
        }
        self.started.push(effect);
        debug!("Started {} ({})", effect, self.slots[effect.index()].name);
    }

    fn present(&mut self, frame: &BlendFrame) {
        let weights = frame.state.weights();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let id = EffectId(i as u32);
            let involved = frame.state.current == id || frame.state.target == Some(id);
            if !involved {
                slot.alpha = 0.0;
                continue;
            }
            slot.alpha = weights.weight_of(id);
            if slot.running {
                slot.advance(frame.dt);
            }
        }
    }

    fn effect_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(current: u32, target: Option<u32>, blend: f32) -> BlendFrame {
        BlendFrame {
            state: ReplicaSnapshot {
                current: EffectId(current),
                target: target.map(EffectId),
                blend,
            },
            dt: 0.5,
        }
    }

    #[test]
    fn test_start_switches_one_effect() {
        let mut catalog = EffectCatalog::new(["ripple", "aurora", "sparks"]);
        assert_eq!(catalog.effect_count(), 3);

        catalog.start(EffectId(1));
        assert_eq!(catalog.running(), Some(EffectId(1)));

        catalog.start(EffectId(2));
        assert_eq!(catalog.running(), Some(EffectId(2)));
        assert!(!catalog.slot(EffectId(1)).unwrap().running);
        assert_eq!(catalog.start_history(), &[EffectId(1), EffectId(2)]);
    }

    #[test]
    fn test_start_unknown_is_ignored() {
        let mut catalog = EffectCatalog::new(["ripple"]);
        catalog.start(EffectId(4));
        assert_eq!(catalog.running(), None);
        assert!(catalog.start_history().is_empty());
    }

    #[test]
    fn test_present_sets_alphas() {
        let mut catalog = EffectCatalog::new(["a", "b", "c"]);
        catalog.start(EffectId(0));
        catalog.present(&frame(0, Some(2), 0.25));

        assert_eq!(catalog.slot(EffectId(0)).unwrap().alpha, 0.75);
        assert_eq!(catalog.slot(EffectId(1)).unwrap().alpha, 0.0);
        assert_eq!(catalog.slot(EffectId(2)).unwrap().alpha, 0.25);
    }

    #[test]
    fn test_marching_band_wraps() {
        let settings = EffectSettings {
            max_range: 1.0,
            width: 0.25,
            marching_speed: 1.0,
            marching_mode: MapMode::Wrap,
        };
        let mut catalog = EffectCatalog::default().with_effect("band", settings);
        catalog.start(EffectId(0));

        // 0.5, then 1.0 wraps to 0, then 1.5 wraps to 0.5
        catalog.present(&frame(0, None, 0.0));
        catalog.present(&frame(0, None, 0.0));
        catalog.present(&frame(0, None, 0.0));

        let (outer, inner) = catalog.slot(EffectId(0)).unwrap().range;
        assert!((outer - 0.5).abs() < 1e-5);
        assert!((inner - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_boxed_dispatcher_forwards() {
        let mut boxed: Box<dyn EffectDispatcher> = Box::new(EffectCatalog::new(["a", "b"]));
        boxed.start(EffectId(1));
        assert_eq!(boxed.effect_count(), 2);
    }
}
