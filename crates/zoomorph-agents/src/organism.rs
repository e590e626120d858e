//! The learning organism.
//!
//! Every tick an organism advances its frame-skip counter. On a decision
//! tick it perceives the old snapshot, selects an action, and stores a
//! half-built experience; on other ticks it repeats its last action. The
//! action always moves the attention point by `attention_speed` along one
//! axis, and the body steps `movement_speed` towards where the attention
//! point is heading. Metabolism and reproduction run every tick.
//!
//! In [`Entity::apply`] the reward shaping weights decay, and on a decision
//! tick the pending experience is scored against the resolved state and
//! pushed into the experience store. Once the store can sample, a batch
//! goes to the learning worker together with the organism's
//! hyperparameters.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use zoomorph_policy::PolicyRuntime;
use zoomorph_types::{Action, EntityId, EntityKind, PendingExperience};
use zoomorph_world::fields::names;
use zoomorph_world::{
    Capabilities, Effects, Entity, FieldValue, PerceptionRequest, Position, Snapshot, SpawnRequest,
    SyncSchema, UpdateContext, WorldError,
};

use crate::config::OrganismConfig;
use crate::error::OrganismError;
use crate::perception::{ItemMemory, ItemView, Perception, curriculum_items};
use crate::reward::RewardShaper;

/// Field holding the tracked food id (null when lost).
pub const TARGET: &str = "target";
/// Field holding the current exploration rate.
pub const EPSILON: &str = "epsilon";
/// Field holding the number of items currently tracked.
pub const TRACKED_ITEMS: &str = "tracked_items";

const ORGANISM_FIELDS: &[&str] = &[
    names::ENERGY,
    names::NUTRITION,
    names::PENDING_REWARD,
    names::ATTENTION_X,
    names::ATTENTION_Y,
    TARGET,
    EPSILON,
    TRACKED_ITEMS,
    // composite, never synchronized
    "nearest_items",
    "item_memory",
];

/// An agent whose actions come from a learned policy.
pub struct Organism {
    id: EntityId,
    position: Position,
    attention: Position,
    energy: f64,
    nutrition: f64,
    pending_reward: f64,
    config: OrganismConfig,
    perception: Perception,
    runtime: Arc<PolicyRuntime>,
    shaper: RewardShaper,
    memory: ItemMemory,
    nearest: Vec<EntityId>,
    target: Option<EntityId>,
    tracked_items: usize,
    frame_skip_counter: u32,
    decision_tick: bool,
    last_action: Option<Action>,
    pending: Option<PendingExperience>,
    just_spawned: bool,
    rng: StdRng,
    schema: SyncSchema,
}

impl std::fmt::Debug for Organism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organism")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("energy", &self.energy)
            .field("nutrition", &self.nutrition)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Organism {
    /// Create an organism at `position` driven by `runtime`.
    ///
    /// The frame-skip phase is random so organisms spawned together do not
    /// all decide on the same tick.
    pub fn new(
        id: EntityId,
        position: Position,
        config: OrganismConfig,
        runtime: Arc<PolicyRuntime>,
        perception: Perception,
        seed: Option<u64>,
    ) -> Result<Self, OrganismError> {
        config.validate()?;
        if runtime.agent_id() != id {
            return Err(OrganismError::InvalidConfig {
                reason: format!("runtime belongs to {}, not {id}", runtime.agent_id()),
            });
        }
        let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let frame_skip_counter = rng.random_range(0..config.frame_skip.max(1));
        info!(organism_id = %id, x = position.x, y = position.y, "organism created");
        Ok(Self {
            id,
            position,
            attention: position,
            energy: config.starting_energy,
            nutrition: config.starting_nutrition,
            pending_reward: 0.0,
            shaper: RewardShaper::new(config.reward),
            tracked_items: config.start_nearest_items,
            config,
            perception,
            runtime,
            memory: ItemMemory::new(),
            nearest: Vec::new(),
            target: None,
            frame_skip_counter,
            decision_tick: false,
            last_action: None,
            pending: None,
            just_spawned: true,
            rng,
            schema: SyncSchema::new(),
        })
    }

    /// Current energy.
    pub const fn energy(&self) -> f64 {
        self.energy
    }

    /// Current nutrition.
    pub const fn nutrition(&self) -> f64 {
        self.nutrition
    }

    /// Current attention point.
    pub const fn attention(&self) -> Position {
        self.attention
    }

    /// Tracked food, if any.
    pub const fn target(&self) -> Option<EntityId> {
        self.target
    }

    /// Action taken on the last tick.
    pub const fn last_action(&self) -> Option<Action> {
        self.last_action
    }

    /// The organism's policy runtime.
    pub const fn runtime(&self) -> &Arc<PolicyRuntime> {
        &self.runtime
    }

    /// Reward shaping state.
    pub const fn shaper(&self) -> &RewardShaper {
        &self.shaper
    }

    /// Remembered food ids.
    pub const fn memory(&self) -> &ItemMemory {
        &self.memory
    }

    fn decide(&mut self, old: &Snapshot, context: &UpdateContext<'_>) -> Result<Effects, OrganismError> {
        self.just_spawned = false;
        self.frame_skip_counter = self
            .frame_skip_counter
            .saturating_add(1)
            .checked_rem(self.config.frame_skip)
            .unwrap_or(0);
        self.decision_tick = self.frame_skip_counter == 0;

        let action = if self.decision_tick {
            self.tracked_items = curriculum_items(
                context.elapsed,
                self.config.start_nearest_items,
                self.config.max_nearest_items,
                self.config.nearest_items_curriculum_seconds,
            );
            self.track(context.nearest, old);
            let state = self.observe(old);
            let action = self.runtime.select_action(&state)?;
            self.pending = Some(PendingExperience::new(state, action.index()));
            action
        } else {
            match self.last_action {
                Some(action) => action,
                None => Action::from_index(self.rng.random_range(0..Action::COUNT)).unwrap_or(Action::NoMove),
            }
        };
        self.last_action = Some(action);

        let attention = self.attention_delta(action);
        let movement = self.movement_toward(attention);
        let spawn = self.metabolize(context);

        Ok(Effects {
            movement: Some(movement),
            attention: Some(attention),
            alive: self.energy > 0.0,
            spawn,
        })
    }

    /// Score and record the pending experience, then fade the shaping
    /// weights. The fade happens on every call, after any scoring.
    fn learn(&mut self, old: &Snapshot, new: &Snapshot) -> Result<(), OrganismError> {
        let outcome = self.record_experience(old, new);
        self.shaper.decay();
        outcome
    }

    fn record_experience(&mut self, old: &Snapshot, new: &Snapshot) -> Result<(), OrganismError> {
        if self.just_spawned || !self.decision_tick {
            return Ok(());
        }
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        let previous = old.get(self.id).ok_or(WorldError::MissingState { id: self.id })?;
        let old_attention = Position::new(
            previous.float(names::ATTENTION_X).unwrap_or(previous.position.x),
            previous.float(names::ATTENTION_Y).unwrap_or(previous.position.y),
        );
        let target = self
            .target
            .and_then(|id| ItemView::lookup(new, id))
            .map(|item| item.position);
        if target.is_none() {
            self.target = None;
        }

        let reward = self.shaper.score(old_attention, self.attention, target, &self.perception) + self.pending_reward;
        self.pending_reward = 0.0;
        let reward = narrow(reward);

        let next_state = self.observe(new);
        self.runtime.record_reward(reward);
        let store = self.runtime.store();
        store.add(pending.complete(reward, next_state));

        if store.can_sample() {
            let batch = store.sample();
            debug!(organism_id = %self.id, batch = batch.len(), "queueing learning request");
            self.runtime.request_learn(self.config.learning, batch)?;
        }
        Ok(())
    }

    /// Adopt the engine's nearest-food answer, falling back to memory.
    fn track(&mut self, nearest: &[EntityId], old: &Snapshot) {
        self.nearest = nearest.iter().copied().take(self.tracked_items).collect();
        self.memory.remember(&self.nearest);
        self.target = self.nearest.first().copied();
        if self.nearest.is_empty()
            && let Some(id) = self.memory.recall(self.position, old)
        {
            self.nearest.push(id);
            self.target = Some(id);
        }
    }

    fn observe(&self, snapshot: &Snapshot) -> Vec<f32> {
        let items: Vec<ItemView> = self
            .nearest
            .iter()
            .filter_map(|id| ItemView::lookup(snapshot, *id))
            .collect();
        let target = self
            .target
            .and_then(|id| ItemView::lookup(snapshot, id))
            .map(|item| item.position);
        self.perception.observe(
            self.position,
            self.attention,
            target,
            &items,
            self.config.max_nearest_items,
        )
    }

    fn attention_delta(&self, action: Action) -> (f64, f64) {
        let speed = self.config.attention_speed;
        match action {
            Action::Up => (0.0, -speed),
            Action::Down => (0.0, speed),
            Action::Left => (-speed, 0.0),
            Action::Right => (speed, 0.0),
            Action::NoMove => (0.0, 0.0),
        }
    }

    /// Unit step (scaled by `movement_speed`) towards the attention point
    /// after it moves by `attention`.
    fn movement_toward(&self, attention: (f64, f64)) -> (f64, f64) {
        let heading = self.attention.offset(attention.0, attention.1);
        let dx = heading.x - self.position.x;
        let dy = heading.y - self.position.y;
        let distance = dx.hypot(dy);
        if distance > 0.0 {
            (dx / distance * self.config.movement_speed, dy / distance * self.config.movement_speed)
        } else {
            (0.0, 0.0)
        }
    }

    fn metabolize(&mut self, context: &UpdateContext<'_>) -> Option<SpawnRequest> {
        self.energy -= self.config.energy_consumption;
        self.nutrition = (self.nutrition - self.config.nutrition_consumption).max(0.0);

        let rules = self.config.reproduction;
        if self.energy > rules.energy_threshold
            && self.nutrition > rules.nutrition_threshold
            && context.population < context.max_population
        {
            self.energy -= rules.energy_cost;
            self.nutrition -= rules.nutrition_cost;
            info!(organism_id = %self.id, energy = self.energy, "organism reproducing");
            return Some(SpawnRequest::Offspring);
        }
        None
    }
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(value: f64) -> f32 {
    value as f32
}

impl Entity for Organism {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Organism
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            consumable: false,
            collidable: true,
            perishable: false,
        }
    }

    fn position(&self) -> Position {
        self.position
    }

    fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    fn field_names(&self) -> &[&'static str] {
        ORGANISM_FIELDS
    }

    fn read_field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            names::ENERGY => FieldValue::Float(self.energy),
            names::NUTRITION => FieldValue::Float(self.nutrition),
            names::PENDING_REWARD => FieldValue::Float(self.pending_reward),
            names::ATTENTION_X => FieldValue::Float(self.attention.x),
            names::ATTENTION_Y => FieldValue::Float(self.attention.y),
            TARGET => FieldValue::Id(self.target),
            EPSILON => FieldValue::Float(self.runtime.epsilon()),
            TRACKED_ITEMS => FieldValue::Int(i64::try_from(self.tracked_items).unwrap_or(i64::MAX)),
            _ => return None,
        })
    }

    fn write_field(&mut self, name: &str, value: &FieldValue) -> bool {
        if name == TARGET {
            let Some(target) = value.as_id() else {
                return false;
            };
            self.target = target;
            return true;
        }
        let Some(v) = value.as_f64() else {
            return false;
        };
        match name {
            names::ENERGY => self.energy = v,
            names::NUTRITION => self.nutrition = v,
            names::PENDING_REWARD => self.pending_reward = v,
            names::ATTENTION_X => self.attention.x = v,
            names::ATTENTION_Y => self.attention.y = v,
            _ => return false,
        }
        true
    }

    fn sync_schema(&mut self) -> &mut SyncSchema {
        &mut self.schema
    }

    fn perception_request(&self) -> Option<PerceptionRequest> {
        Some(PerceptionRequest {
            kind: EntityKind::Food,
            count: self.config.max_nearest_items,
            radius: self.config.detection_radius,
        })
    }

    fn update(&mut self, old: &Snapshot, context: &UpdateContext<'_>) -> Result<Effects, WorldError> {
        self.decide(old, context).map_err(|err| err.into_world(self.id))
    }

    fn apply(&mut self, old: &Snapshot, new: &Snapshot) -> Result<(), WorldError> {
        self.learn(old, new).map_err(|err| err.into_world(self.id))
    }
}
