//! Tick lifecycle scenarios with scripted entities and in-process workers.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use zoomorph_core::config::SimulationConfig;
use zoomorph_core::engine::Engine;
use zoomorph_core::pump::LearnerRegistry;
use zoomorph_policy::MlpFactory;
use zoomorph_types::{EntityId, EntityKind};
use zoomorph_workers::{PoolConfig, WorkerMode, WorkerPool};
use zoomorph_world::fields::names;
use zoomorph_world::{
    Capabilities, Effects, Entity, FieldValue, Food, Position, Snapshot, SyncSchema, UpdateContext,
    WorldError,
};

/// Collidable mover that repeats one scripted step every tick.
struct Walker {
    id: EntityId,
    position: Position,
    energy: f64,
    nutrition: f64,
    pending_reward: f64,
    mood: f64,
    step: Option<(f64, f64)>,
    schema: SyncSchema,
}

const WALKER_FIELDS: &[&str] = &[names::ENERGY, names::NUTRITION, names::PENDING_REWARD];

impl Walker {
    fn new(x: f64, y: f64, step: Option<(f64, f64)>) -> Self {
        Self {
            id: EntityId::new(),
            position: Position::new(x, y),
            energy: 1.0,
            nutrition: 1.0,
            pending_reward: 0.0,
            mood: 0.5,
            step,
            schema: SyncSchema::new(),
        }
    }
}

impl Entity for Walker {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Organism
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collidable: true,
            ..Capabilities::default()
        }
    }

    fn position(&self) -> Position {
        self.position
    }

    fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    fn field_names(&self) -> &[&'static str] {
        WALKER_FIELDS
    }

    fn read_field(&self, name: &str) -> Option<FieldValue> {
        match name {
            names::ENERGY => Some(FieldValue::Float(self.energy)),
            names::NUTRITION => Some(FieldValue::Float(self.nutrition)),
            names::PENDING_REWARD => Some(FieldValue::Float(self.pending_reward)),
            "mood" => Some(FieldValue::Float(self.mood)),
            _ => None,
        }
    }

    fn write_field(&mut self, name: &str, value: &FieldValue) -> bool {
        let Some(v) = value.as_f64() else {
            return false;
        };
        match name {
            names::ENERGY => self.energy = v,
            names::NUTRITION => self.nutrition = v,
            names::PENDING_REWARD => self.pending_reward = v,
            "mood" => self.mood = v,
            _ => return false,
        }
        true
    }

    fn sync_schema(&mut self) -> &mut SyncSchema {
        &mut self.schema
    }

    fn update(&mut self, _old: &Snapshot, _context: &UpdateContext<'_>) -> Result<Effects, WorldError> {
        Ok(Effects {
            movement: self.step,
            ..Effects::none()
        })
    }
}

fn bare_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.world.width = 32;
    config.world.height = 32;
    config.world.seed = Some(21);
    config.population.starting_organisms = 0;
    config.food.spawners.clear();
    config.engine.parallel_apply = false;
    config.organism.hidden_size = 8;
    config.organism.hidden_layers = 1;
    config
}

fn engine(config: SimulationConfig) -> Engine {
    let factory = Arc::new(MlpFactory);
    let pool = WorkerPool::start(
        &PoolConfig {
            workers: 2,
            mode: WorkerMode::InProcess,
            ..PoolConfig::default()
        },
        factory.clone(),
    )
    .unwrap();
    Engine::new(config, factory, pool, Arc::new(LearnerRegistry::new())).unwrap()
}

fn float(engine: &Engine, id: EntityId, name: &str) -> f64 {
    engine
        .entity(id)
        .and_then(|entity| entity.read_field(name))
        .and_then(|value| value.as_f64())
        .unwrap()
}

#[test]
fn standing_on_food_consumes_it() {
    let mut engine = engine(bare_config());
    let walker = engine.register(Box::new(Walker::new(10.0, 10.0, Some((0.0, 0.0)))));
    let food = engine.register(Box::new(Food::new(Position::new(10.0, 10.0), 5.0, 2.0, false, 60.0)));

    let summary = engine.tick().unwrap();

    assert_eq!(summary.consumed, 1);
    assert!(engine.entity(food).is_none());
    assert!(engine.current().get(food).is_none());
    assert!((float(&engine, walker, names::ENERGY) - 6.0).abs() < 1e-9);
    assert!((float(&engine, walker, names::NUTRITION) - 3.0).abs() < 1e-9);
    assert!(float(&engine, walker, names::PENDING_REWARD) > 0.0);
    assert_eq!(engine.current().get(walker).unwrap().position, Position::new(10.0, 10.0));
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn food_within_range_is_eaten_on_the_way() {
    let mut config = bare_config();
    config.engine.parallel_apply = true;
    config.engine.apply_threads = 2;
    let mut engine = engine(config);
    let walker = engine.register(Box::new(Walker::new(4.0, 4.0, Some((3.0, 0.0)))));
    let food = engine.register(Box::new(Food::new(Position::new(8.0, 4.0), 1.0, 0.0, false, 60.0)));

    let summary = engine.tick().unwrap();

    assert_eq!(summary.consumed, 1);
    assert!(engine.entity(food).is_none());
    assert_eq!(engine.current().get(walker).unwrap().position, Position::new(7.0, 4.0));
    assert!((float(&engine, walker, names::ENERGY) - 2.0).abs() < 1e-9);
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn occupied_cell_blocks_movement() {
    let mut engine = engine(bare_config());
    let mover = engine.register(Box::new(Walker::new(10.0, 10.0, Some((1.0, 0.0)))));
    let wall = engine.register(Box::new(Walker::new(11.0, 10.0, None)));

    engine.tick().unwrap();

    assert_eq!(engine.current().get(mover).unwrap().position, Position::new(10.0, 10.0));
    assert_eq!(engine.current().get(wall).unwrap().position, Position::new(11.0, 10.0));
    assert_eq!(engine.entity(mover).unwrap().position(), Position::new(10.0, 10.0));
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn nearby_neighbour_in_another_cell_does_not_block() {
    let mut engine = engine(bare_config());
    let mover = engine.register(Box::new(Walker::new(10.0, 10.0, Some((0.0, 1.0)))));
    engine.register(Box::new(Walker::new(11.0, 10.0, None)));

    engine.tick().unwrap();

    assert_eq!(engine.current().get(mover).unwrap().position, Position::new(10.0, 11.0));
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn movement_is_clamped_to_the_world() {
    let mut engine = engine(bare_config());
    let mover = engine.register(Box::new(Walker::new(30.0, 1.0, Some((10.0, -10.0)))));

    engine.tick().unwrap();

    assert_eq!(engine.current().get(mover).unwrap().position, Position::new(31.0, 0.0));
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn expired_food_is_removed_without_being_eaten() {
    let mut engine = engine(bare_config());
    let food = engine.register(Box::new(Food::new(Position::new(3.0, 3.0), 1.0, 1.0, false, 0.01)));

    let summary = engine.tick().unwrap();

    assert_eq!(summary.consumed, 0);
    assert_eq!(summary.food_items, 0);
    assert!(engine.entity(food).is_none());
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn late_field_is_synchronized_on_request() {
    let mut engine = engine(bare_config());
    let walker = engine.register(Box::new(Walker::new(5.0, 5.0, None)));
    assert!(engine.current().get(walker).unwrap().float("mood").is_none());

    assert!(engine.synchronize_new_field(walker, "mood").unwrap());
    assert_eq!(engine.current().get(walker).unwrap().float("mood"), Some(0.5));
    assert!(!engine.synchronize_new_field(walker, "mood").unwrap());
    assert!(matches!(
        engine.synchronize_new_field(walker, "missing"),
        Err(WorldError::UnknownField { .. })
    ));
    assert!(matches!(
        engine.synchronize_new_field(EntityId::new(), "mood"),
        Err(WorldError::MissingState { .. })
    ));
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn history_keeps_only_the_configured_snapshots() {
    let mut config = bare_config();
    config.world.history_length = 2;
    let mut engine = engine(config);
    engine.register(Box::new(Walker::new(5.0, 5.0, Some((1.0, 0.0)))));

    for _ in 0..5 {
        engine.tick().unwrap();
    }

    assert_eq!(engine.tick_count(), 5);
    assert_eq!(engine.current().tick(), 5);
    let retired: Vec<u64> = engine.history().iter().map(Snapshot::tick).collect();
    assert_eq!(retired, vec![3, 4]);
    engine.shutdown(Duration::from_secs(2));
}

#[test]
fn populated_world_runs_with_organisms_and_food() {
    let mut config = bare_config();
    config.population.starting_organisms = 3;
    config.population.max_organisms = 4;
    config.population.spawn_spread = 4;
    config.engine.parallel_apply = true;
    config.engine.apply_threads = 2;
    config.food = SimulationConfig::default().food;
    let mut engine = engine(config);
    engine.populate().unwrap();

    assert_eq!(engine.population(), 3);
    assert_eq!(engine.learners().len(), 3);
    assert_eq!(engine.worker_load().iter().sum::<usize>(), 3);
    assert_eq!(engine.current().entries(Some(EntityKind::FoodSpawner)).count(), 1);

    let mut last = None;
    for _ in 0..10 {
        let summary = engine.tick().unwrap();
        assert_eq!(summary.entity_failures, 0);
        assert!(summary.population <= 4);
        last = Some(summary);
    }

    let summary = last.unwrap();
    assert_eq!(summary.tick, 10);
    assert_eq!(engine.current().len(), engine.entity_count());
    let organisms = engine.current().entries(Some(EntityKind::Organism)).count();
    assert_eq!(organisms, engine.population());
    assert!(
        engine
            .current()
            .records()
            .all(|(_, record)| !record.marked_for_deletion)
    );
    let report = engine.shutdown(Duration::from_secs(5));
    assert_eq!(report.forced, 0);
}
