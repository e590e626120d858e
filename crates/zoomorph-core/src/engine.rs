//! The simulation engine and its tick lifecycle.
//!
//! The engine exclusively owns every entity. Snapshots hold copied records
//! only. A tick never interleaves with another one:
//!
//! 1. **Snapshot** -- advance the clock, clone the current snapshot into
//!    `new`, and mark records whose entity no longer exists.
//! 2. **Perceive + Decide** -- answer each entity's perception request
//!    against the old snapshot and collect its [`Effects`].
//! 3. **Apply** -- copy every entity's fields into `new`, then resolve
//!    effects: movement with collisions (against pre-apply positions of
//!    everyone else), consumption, attention, deletion. Resolved values are
//!    pushed back onto each entity and `apply` runs, optionally on a rayon
//!    pool. Marked records are pruned and spawn requests are placed.
//! 4. **Commit** -- the old snapshot joins the bounded history and `new`
//!    becomes current.
//!
//! A failing entity is logged and skipped for the rest of the tick. A
//! missing snapshot record is a desync between the registry and the
//! snapshot, and aborts the tick.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use zoomorph_agents::{Organism, OrganismError, Perception};
use zoomorph_policy::{LearnerChannels, ModelFactory, ModelSpec, PolicyError, PolicyRuntime};
use zoomorph_replay::{ExperienceStore, ReplayError};
use zoomorph_types::{EntityId, EntityKind};
use zoomorph_workers::{PoolError, ShutdownReport, WorkerPool};
use zoomorph_world::fields::names;
use zoomorph_world::{
    Consumption, Effects, Entity, FieldValue, Food, FoodSpawner, Position, Snapshot, SpawnRequest,
    UpdateContext, WorldError,
};

use crate::clock::{ClockError, SimulationClock};
use crate::config::SimulationConfig;
use crate::pump::LearnerRegistry;
use crate::spatial;

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A world operation failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: WorldError,
    },

    /// Registering or releasing a learner failed.
    #[error("worker pool error: {source}")]
    Pool {
        /// The underlying pool error.
        #[from]
        source: PoolError,
    },

    /// Building a policy runtime failed.
    #[error("policy error: {source}")]
    Policy {
        /// The underlying policy error.
        #[from]
        source: PolicyError,
    },

    /// Building an experience store failed.
    #[error("replay error: {source}")]
    Replay {
        /// The underlying replay error.
        #[from]
        source: ReplayError,
    },

    /// Building an organism failed.
    #[error("organism error: {source}")]
    Organism {
        /// The underlying organism error.
        #[from]
        source: OrganismError,
    },

    /// The apply-phase thread pool could not be built.
    #[error("failed to build apply thread pool: {reason}")]
    ApplyPool {
        /// Explanation from rayon.
        reason: String,
    },
}

impl TickError {
    /// Whether the error must stop the simulation rather than skip one
    /// entity or one spawn.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Clock { .. }
                | Self::ApplyPool { .. }
                | Self::World {
                    source: WorldError::MissingState { .. }
                }
        )
    }
}

/// Per-tick figures for the tick driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickSummary {
    /// Tick just committed.
    pub tick: u64,
    /// Simulated seconds since tick 0.
    pub elapsed: f64,
    /// Living organisms.
    pub population: usize,
    /// Food items in the world.
    pub food_items: usize,
    /// Entities created this tick.
    pub spawned: usize,
    /// Items eaten this tick.
    pub consumed: usize,
    /// Organisms that died this tick.
    pub deaths: usize,
    /// Organisms that died since the start of the run.
    pub deceased: u64,
    /// Entities whose processing failed this tick.
    pub entity_failures: usize,
    /// Learning requests not yet answered, over all organisms.
    pub learning_backlog: usize,
    /// Mean of the organisms' rolling average reward.
    pub avg_reward: f64,
    /// Mean of the organisms' rolling average training loss.
    pub avg_loss: f64,
}

/// Owns the world and runs ticks.
pub struct Engine {
    config: SimulationConfig,
    clock: SimulationClock,
    current: Snapshot,
    history: VecDeque<Snapshot>,
    entities: BTreeMap<EntityId, Box<dyn Entity>>,
    learners: Arc<LearnerRegistry>,
    pool: WorkerPool,
    factory: Arc<dyn ModelFactory>,
    perception: Perception,
    rng: StdRng,
    seeded: bool,
    deceased: u64,
    apply_pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick", &self.clock.tick())
            .field("entities", &self.entities.len())
            .field("organisms", &self.learners.len())
            .field("deceased", &self.deceased)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an empty world. Call [`Engine::populate`] to place the
    /// configured spawners and starting organisms.
    ///
    /// # Errors
    ///
    /// Fails on an invalid clock step or if the apply pool cannot be built.
    pub fn new(
        config: SimulationConfig,
        factory: Arc<dyn ModelFactory>,
        pool: WorkerPool,
        learners: Arc<LearnerRegistry>,
    ) -> Result<Self, TickError> {
        let clock = SimulationClock::new(config.world.seconds_per_tick)?;
        let apply_pool = if config.engine.parallel_apply {
            let built = rayon::ThreadPoolBuilder::new()
                .num_threads(config.engine.apply_threads)
                .thread_name(|index| format!("apply-{index}"))
                .build()
                .map_err(|e| TickError::ApplyPool {
                    reason: e.to_string(),
                })?;
            Some(built)
        } else {
            None
        };
        let perception = Perception::new(config.world.perception_width, config.world.perception_height);
        let rng = config
            .world
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Ok(Self {
            current: Snapshot::new(config.world.bounds()),
            history: VecDeque::with_capacity(config.world.history_length),
            seeded: config.world.seed.is_some(),
            config,
            clock,
            entities: BTreeMap::new(),
            learners,
            pool,
            factory,
            perception,
            rng,
            deceased: 0,
            apply_pool,
        })
    }

    /// Place the food spawners and the starting organisms.
    ///
    /// # Errors
    ///
    /// Fails if an organism cannot be registered or the world is full.
    pub fn populate(&mut self) -> Result<(), TickError> {
        let bounds = self.config.world.bounds();
        let centre = Position::new(bounds.max_x() / 2.0, bounds.max_y() / 2.0);
        let mut snapshot = std::mem::replace(&mut self.current, Snapshot::new(bounds));
        let result = self.populate_into(&mut snapshot, centre);
        self.current = snapshot;
        result?;
        info!(
            organisms = self.learners.len(),
            entities = self.entities.len(),
            "world populated"
        );
        Ok(())
    }

    fn populate_into(&mut self, snapshot: &mut Snapshot, centre: Position) -> Result<(), TickError> {
        for spawner_config in self.config.food.spawners.clone() {
            let position = spawner_config.position.unwrap_or(centre);
            let seed = self.next_seed();
            self.register_into(snapshot, Box::new(FoodSpawner::new(position, spawner_config, seed)));
        }
        let spread = self.config.population.spawn_spread.max(0);
        for _ in 0..self.config.population.starting_organisms {
            let dx = self.rng.random_range(spread.saturating_neg()..=spread);
            let dy = self.rng.random_range(spread.saturating_neg()..=spread);
            let wanted = centre.offset(int_to_f64(dx), int_to_f64(dy));
            let position = spatial::nearest_empty_cell(snapshot, wanted, &mut self.rng)?;
            self.hatch(snapshot, position)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Last committed tick.
    pub const fn tick_count(&self) -> u64 {
        self.clock.tick()
    }

    /// The current snapshot.
    pub const fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Retired snapshots, oldest first.
    pub const fn history(&self) -> &VecDeque<Snapshot> {
        &self.history
    }

    /// Configuration in effect.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of entities of every kind.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Living organisms.
    pub fn population(&self) -> usize {
        self.learners.len()
    }

    /// Organisms that died since the start of the run.
    pub const fn deceased(&self) -> u64 {
        self.deceased
    }

    /// An entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(AsRef::as_ref)
    }

    /// The shared learner registry.
    pub const fn learners(&self) -> &Arc<LearnerRegistry> {
        &self.learners
    }

    /// Agents per learning worker.
    pub fn worker_load(&self) -> Vec<usize> {
        self.pool.load()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Add an entity to the registry and give it a record in the current
    /// snapshot.
    pub fn register(&mut self, entity: Box<dyn Entity>) -> EntityId {
        let mut snapshot = std::mem::replace(&mut self.current, Snapshot::new(self.config.world.bounds()));
        let id = self.register_into(&mut snapshot, entity);
        self.current = snapshot;
        id
    }

    fn register_into(&mut self, snapshot: &mut Snapshot, mut entity: Box<dyn Entity>) -> EntityId {
        let id = entity.id();
        snapshot.synchronize_out(entity.as_mut());
        debug!(entity_id = %id, kind = ?entity.kind(), "entity registered");
        self.entities.insert(id, entity);
        id
    }

    /// Start synchronizing an extra field of a registered entity.
    ///
    /// Returns `Ok(false)` if the field was already synchronized.
    ///
    /// # Errors
    ///
    /// [`WorldError::MissingState`] for an unknown id, or
    /// [`WorldError::UnknownField`] if the entity has no such scalar field.
    pub fn synchronize_new_field(&mut self, id: EntityId, name: &'static str) -> Result<bool, WorldError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(WorldError::MissingState { id })?;
        self.current.synchronize_new_field(entity.as_mut(), name)
    }

    /// Create an organism with its own experience store, policy runtime,
    /// and learning worker registration.
    fn hatch(&mut self, snapshot: &mut Snapshot, position: Position) -> Result<EntityId, TickError> {
        let id = EntityId::new();
        let spec = self.config.organism.model_spec(self.rng.random());
        let channels = self.pool.register(id, spec)?;
        match self.build_organism(id, position, &spec, channels) {
            Ok(organism) => {
                self.register_into(snapshot, Box::new(organism));
                Ok(id)
            }
            Err(e) => {
                self.learners.remove(id);
                if let Err(unregister) = self.pool.unregister(id) {
                    warn!(organism_id = %id, error = %unregister, "failed to release learner after hatch failure");
                }
                Err(e)
            }
        }
    }

    fn build_organism(
        &mut self,
        id: EntityId,
        position: Position,
        spec: &ModelSpec,
        channels: LearnerChannels,
    ) -> Result<Organism, TickError> {
        let store = Arc::new(ExperienceStore::with_seed(self.config.organism.replay, self.rng.random())?);
        let runtime = Arc::new(PolicyRuntime::new(
            id,
            spec,
            self.factory.as_ref(),
            store,
            channels,
            self.config.organism.exploration,
        )?);
        let seed = self.next_seed();
        let organism = Organism::new(
            id,
            position,
            self.config.organism.clone(),
            Arc::clone(&runtime),
            self.perception,
            seed,
        )?;
        self.learners.insert(runtime);
        Ok(organism)
    }

    fn place_food(
        &mut self,
        snapshot: &mut Snapshot,
        position: Position,
        energy: f64,
        nutrition: f64,
        high_energy: bool,
    ) -> Result<EntityId, TickError> {
        let cell = spatial::nearest_empty_cell(snapshot, position, &mut self.rng)?;
        let food = Food::new(cell, energy, nutrition, high_energy, self.config.food.expiration_seconds);
        Ok(self.register_into(snapshot, Box::new(food)))
    }

    fn spawn_offspring(&mut self, snapshot: &mut Snapshot, parent: EntityId) -> Result<Option<EntityId>, TickError> {
        if self.learners.len() >= self.config.population.max_organisms {
            debug!(parent_id = %parent, "population cap reached, offspring skipped");
            return Ok(None);
        }
        let Some(origin) = snapshot.get(parent).map(|record| record.position) else {
            debug!(parent_id = %parent, "parent gone before its offspring could hatch");
            return Ok(None);
        };
        let dx = self.rng.random_range(-1_i32..=1);
        let dy = self.rng.random_range(-1_i32..=1);
        let wanted = origin.offset(f64::from(dx), f64::from(dy));
        let position = spatial::nearest_empty_cell(snapshot, wanted, &mut self.rng)?;
        let id = self.hatch(snapshot, position)?;
        info!(organism_id = %id, parent_id = %parent, "offspring hatched");
        Ok(Some(id))
    }

    fn retire(&mut self, id: EntityId) {
        self.learners.remove(id);
        if let Err(e) = self.pool.unregister(id) {
            warn!(organism_id = %id, error = %e, "failed to unregister learner");
        }
        self.deceased = self.deceased.saturating_add(1);
        info!(organism_id = %id, deceased = self.deceased, "organism died");
    }

    fn next_seed(&mut self) -> Option<u64> {
        self.seeded.then(|| self.rng.random())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: clock overflow or a snapshot record
    /// missing for a live entity. Everything else is logged and counted in
    /// [`TickSummary::entity_failures`].
    pub fn tick(&mut self) -> Result<TickSummary, TickError> {
        // Phase 1: snapshot
        let tick = self.clock.advance()?;
        let elapsed = self.clock.elapsed();
        let mut new = self.current.clone();
        new.set_time(tick, elapsed);
        let live = new.list(&self.entities, None).len();

        // Phase 2: perceive + decide
        let population = self.current.entries(Some(EntityKind::Organism)).count();
        let food_count = self.current.entries(Some(EntityKind::Food)).count();
        let mut failed: BTreeSet<EntityId> = BTreeSet::new();
        let mut decisions: Vec<(EntityId, Effects)> = Vec::with_capacity(self.entities.len());
        for (&id, entity) in &mut self.entities {
            let nearest = entity
                .perception_request()
                .map(|request| {
                    let from = self.current.get(id).map_or_else(|| entity.position(), |r| r.position);
                    spatial::nearest(
                        &self.current,
                        from,
                        Some(request.kind),
                        request.count,
                        request.radius,
                        Some(id),
                    )
                })
                .unwrap_or_default();
            let context = UpdateContext {
                tick,
                elapsed,
                dt: self.clock.dt(),
                population,
                max_population: self.config.population.max_organisms,
                food_count,
                max_food: self.config.food.max_food_items,
                nearest: &nearest,
            };
            match entity.update(&self.current, &context) {
                Ok(effects) => decisions.push((id, effects)),
                Err(e) => {
                    isolate(id, "update", e)?;
                    failed.insert(id);
                }
            }
        }

        // Phase 3: apply
        for (id, _) in &decisions {
            if let Some(entity) = self.entities.get_mut(id) {
                new.synchronize_out(entity.as_mut());
            }
        }

        let collision_range = self.config.world.collision_range;
        let mut consumed = 0usize;
        let mut spawns: Vec<(EntityId, SpawnRequest)> = Vec::new();
        for (id, effects) in decisions {
            if new.get(id).is_none_or(|record| record.marked_for_deletion) {
                continue;
            }
            if let Some(delta) = effects.movement {
                consumed = consumed.saturating_add(resolve_movement(
                    &self.current,
                    &mut new,
                    id,
                    delta,
                    collision_range,
                ));
            }
            if let Some(delta) = effects.attention {
                let radius = self
                    .entities
                    .get(&id)
                    .and_then(|entity| entity.perception_request())
                    .map(|request| request.radius);
                resolve_attention(&mut new, id, delta, radius);
            }
            if !effects.alive {
                new.mark_for_deletion(id);
            }
            if let Some(request) = effects.spawn {
                spawns.push((id, request));
            }
        }

        let old = &self.current;
        let resolved = &new;
        let targets: Vec<(EntityId, &mut dyn Entity)> = self
            .entities
            .iter_mut()
            .filter(|(id, _)| !failed.contains(*id))
            .filter(|(id, _)| resolved.get(**id).is_some_and(|record| !record.marked_for_deletion))
            .map(|(id, entity)| (*id, entity.as_mut()))
            .collect();
        let outcomes: Vec<(EntityId, Result<(), WorldError>)> = match &self.apply_pool {
            Some(pool) => pool.install(|| {
                targets
                    .into_par_iter()
                    .map(|(id, entity)| (id, apply_entity(entity, old, resolved)))
                    .collect()
            }),
            None => targets
                .into_iter()
                .map(|(id, entity)| (id, apply_entity(entity, old, resolved)))
                .collect(),
        };
        for (id, outcome) in outcomes {
            if let Err(e) = outcome {
                isolate(id, "apply", e)?;
                failed.insert(id);
            }
        }

        let mut deaths = 0usize;
        for id in new.marked() {
            new.remove(id);
            let Some(entity) = self.entities.remove(&id) else {
                continue;
            };
            if entity.kind() == EntityKind::Organism {
                self.retire(id);
                deaths = deaths.saturating_add(1);
            }
        }

        let mut spawned = 0usize;
        let mut food_items = new.entries(Some(EntityKind::Food)).count();
        for (parent, request) in spawns {
            let result = match request {
                SpawnRequest::Offspring => self.spawn_offspring(&mut new, parent),
                SpawnRequest::Food { .. } if food_items >= self.config.food.max_food_items => Ok(None),
                SpawnRequest::Food {
                    position,
                    energy,
                    nutrition,
                    high_energy,
                } => {
                    let placed = self.place_food(&mut new, position, energy, nutrition, high_energy);
                    if placed.is_ok() {
                        food_items = food_items.saturating_add(1);
                    }
                    placed.map(Some)
                }
            };
            match result {
                Ok(Some(_)) => spawned = spawned.saturating_add(1),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(tick, parent_id = %parent, error = %e, "spawn skipped");
                    failed.insert(parent);
                }
            }
        }

        // Phase 4: commit
        let retired = std::mem::replace(&mut self.current, new);
        self.history.push_back(retired);
        while self.history.len() > self.config.world.history_length {
            self.history.pop_front();
        }

        let summary = self.summarize(spawned, consumed, deaths, failed.len());
        debug!(
            tick,
            records = live,
            population = summary.population,
            food = summary.food_items,
            spawned,
            consumed,
            deaths,
            failures = summary.entity_failures,
            backlog = summary.learning_backlog,
            "tick complete"
        );
        Ok(summary)
    }

    fn summarize(&self, spawned: usize, consumed: usize, deaths: usize, failures: usize) -> TickSummary {
        let runtimes = self.learners.runtimes();
        let (reward_sum, loss_sum) = runtimes.iter().fold((0.0, 0.0), |(reward, loss), runtime| {
            let stats = runtime.stats();
            (reward + stats.avg_reward, loss + stats.avg_loss)
        });
        let count = int_to_f64(runtimes.len()).max(1.0);
        TickSummary {
            tick: self.clock.tick(),
            elapsed: self.clock.elapsed(),
            population: runtimes.len(),
            food_items: self.current.entries(Some(EntityKind::Food)).count(),
            spawned,
            consumed,
            deaths,
            deceased: self.deceased,
            entity_failures: failures,
            learning_backlog: runtimes
                .iter()
                .fold(0usize, |total, runtime| total.saturating_add(runtime.backlog())),
            avg_reward: reward_sum / count,
            avg_loss: loss_sum / count,
        }
    }

    /// Stop every learning worker, waiting at most `timeout`.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        self.pool.shutdown(timeout)
    }
}

// ---------------------------------------------------------------------------
// Effect resolution
// ---------------------------------------------------------------------------

/// Something a mover touches at its destination.
struct Contact {
    id: EntityId,
    consumable: bool,
    blocks: bool,
}

/// Move `id` by `delta` in `new`, resolving collisions against the
/// positions others had in `old`. Returns the number of items eaten.
fn resolve_movement(old: &Snapshot, new: &mut Snapshot, id: EntityId, delta: (f64, f64), range: f64) -> usize {
    let Some(from) = new.get(id).map(|record| record.position) else {
        return 0;
    };
    let destination = new.bounds().clamp(from.offset(delta.0, delta.1));
    let cell = destination.cell();

    let contacts: Vec<Contact> = old
        .records()
        .filter(|(other, record)| *other != id && record.collidable)
        .filter(|(_, record)| destination.distance(record.position) <= range)
        .filter(|(other, _)| new.get(*other).is_some_and(|record| !record.marked_for_deletion))
        .map(|(other, record)| Contact {
            id: other,
            consumable: record.consumable,
            blocks: !record.consumable && record.position.cell() == cell,
        })
        .collect();

    if !contacts.iter().any(|contact| contact.blocks)
        && let Some(record) = new.get_mut(id)
    {
        record.position = destination;
    }

    let mut eaten = 0usize;
    for contact in contacts.iter().filter(|contact| contact.consumable) {
        let Some(gain) = new.get(contact.id).map(Consumption::from_record) else {
            continue;
        };
        new.mark_for_deletion(contact.id);
        if let Some(mover) = new.get_mut(id) {
            gain.apply_to(mover);
        }
        debug!(consumer_id = %id, item_id = %contact.id, energy = gain.energy, "item consumed");
        eaten = eaten.saturating_add(1);
    }
    eaten
}

/// Move the attention point of `id`, clamp it to the world, and keep it
/// within `radius` of the entity along the same bearing.
fn resolve_attention(new: &mut Snapshot, id: EntityId, delta: (f64, f64), radius: Option<f64>) {
    let bounds = new.bounds();
    let Some(record) = new.get_mut(id) else {
        return;
    };
    let origin = record.position;
    let attention = Position::new(
        record.float(names::ATTENTION_X).unwrap_or(origin.x),
        record.float(names::ATTENTION_Y).unwrap_or(origin.y),
    );
    let mut moved = bounds.clamp(attention.offset(delta.0, delta.1));
    if let Some(radius) = radius
        && origin.distance(moved) > radius
    {
        let angle = origin.angle_to(moved);
        moved = bounds.clamp(Position::new(
            radius.mul_add(angle.cos(), origin.x),
            radius.mul_add(angle.sin(), origin.y),
        ));
    }
    record.set(names::ATTENTION_X, FieldValue::Float(moved.x));
    record.set(names::ATTENTION_Y, FieldValue::Float(moved.y));
}

fn apply_entity(entity: &mut dyn Entity, old: &Snapshot, new: &Snapshot) -> Result<(), WorldError> {
    new.synchronize_in(entity)?;
    entity.apply(old, new)
}

/// Log a per-entity failure. A missing record is a desync and is returned.
fn isolate(id: EntityId, phase: &'static str, error: WorldError) -> Result<(), TickError> {
    if matches!(error, WorldError::MissingState { .. }) {
        return Err(error.into());
    }
    warn!(entity_id = %id, phase, error = %error, "entity failed, skipping for this tick");
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn int_to_f64<T: TryInto<i64>>(value: T) -> f64 {
    value.try_into().unwrap_or(i64::MAX) as f64
}
