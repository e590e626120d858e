//! Passive world objects: food and food spawners.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zoomorph_types::{EntityId, EntityKind};

use crate::entity::{Capabilities, Effects, Entity, SpawnRequest, UpdateContext};
use crate::error::WorldError;
use crate::fields::{FieldValue, SyncSchema, names};
use crate::geometry::Position;
use crate::snapshot::Snapshot;

const REGULAR_COLOR: [u8; 4] = [255, 255, 0, 255];
const HIGH_ENERGY_COLOR: [u8; 4] = [128, 0, 128, 255];
const HIGH_ENERGY_CHANCE: f64 = 0.1;
const MIN_SPAWN_DELAY: f64 = 0.1;
const MIN_ENERGY: f64 = 0.1;
const MIN_NUTRITION: f64 = 0.01;
const NUTRITION_REWARD_FACTOR: f64 = 5.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Mean energy and nutrition of one food variety.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodParams {
    /// Mean energy content.
    pub energy: f64,
    /// Mean nutrition content.
    pub nutrition: f64,
}

/// One food spawner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodSpawnerConfig {
    /// Spawner position. Defaults to the centre of the world.
    #[serde(default)]
    pub position: Option<Position>,
    /// Maximum offset of spawned food from the spawner, per axis.
    #[serde(default = "default_spawn_range")]
    pub spawn_range: f64,
    /// Spawns per simulated second when the world holds no food.
    #[serde(default = "default_spawn_frequency")]
    pub spawn_frequency: f64,
    /// Relative standard deviation of spawn delays and food contents.
    #[serde(default = "default_entropy")]
    pub entropy: f64,
    /// Common food.
    #[serde(default = "default_regular_food")]
    pub regular_food: FoodParams,
    /// Rare, richer food.
    #[serde(default = "default_high_energy_food")]
    pub high_energy_food: FoodParams,
}

/// Food settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodConfig {
    /// Food cap; spawners stay idle while it is reached.
    #[serde(default = "default_max_food_items")]
    pub max_food_items: usize,
    /// Simulated seconds a food item lives.
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: f64,
    /// Spawners placed at start-up.
    #[serde(default = "default_spawners")]
    pub spawners: Vec<FoodSpawnerConfig>,
}

fn default_spawn_range() -> f64 {
    50.0
}
fn default_spawn_frequency() -> f64 {
    0.5
}
fn default_entropy() -> f64 {
    0.2
}
const fn default_regular_food() -> FoodParams {
    FoodParams {
        energy: 2.0,
        nutrition: 0.25,
    }
}
const fn default_high_energy_food() -> FoodParams {
    FoodParams {
        energy: 10.0,
        nutrition: 2.5,
    }
}
const fn default_max_food_items() -> usize {
    32
}
fn default_expiration_seconds() -> f64 {
    60.0
}
fn default_spawners() -> Vec<FoodSpawnerConfig> {
    vec![FoodSpawnerConfig::default()]
}

impl Default for FoodSpawnerConfig {
    fn default() -> Self {
        Self {
            position: None,
            spawn_range: default_spawn_range(),
            spawn_frequency: default_spawn_frequency(),
            entropy: default_entropy(),
            regular_food: default_regular_food(),
            high_energy_food: default_high_energy_food(),
        }
    }
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            max_food_items: default_max_food_items(),
            expiration_seconds: default_expiration_seconds(),
            spawners: default_spawners(),
        }
    }
}

// ---------------------------------------------------------------------------
// Food
// ---------------------------------------------------------------------------

const FOOD_FIELDS: &[&str] = &[
    names::ENERGY,
    names::NUTRITION,
    names::REWARD,
    names::COLOR,
    names::EXPIRATION_TIMER,
];

/// A consumable, perishable item.
#[derive(Debug, Clone)]
pub struct Food {
    id: EntityId,
    position: Position,
    energy: f64,
    nutrition: f64,
    reward: f64,
    color: [u8; 4],
    expiration_timer: f64,
    schema: SyncSchema,
}

impl Food {
    /// Create a food item.
    pub fn new(position: Position, energy: f64, nutrition: f64, high_energy: bool, expiration_seconds: f64) -> Self {
        Self {
            id: EntityId::new(),
            position,
            energy,
            nutrition,
            reward: NUTRITION_REWARD_FACTOR.mul_add(nutrition, energy),
            color: if high_energy {
                HIGH_ENERGY_COLOR
            } else {
                REGULAR_COLOR
            },
            expiration_timer: expiration_seconds,
            schema: SyncSchema::new(),
        }
    }

    /// Energy content.
    pub const fn energy(&self) -> f64 {
        self.energy
    }

    /// Nutrition content.
    pub const fn nutrition(&self) -> f64 {
        self.nutrition
    }

    /// Reward granted on consumption.
    pub const fn reward(&self) -> f64 {
        self.reward
    }

    /// Simulated seconds left.
    pub const fn expiration_timer(&self) -> f64 {
        self.expiration_timer
    }
}

impl Entity for Food {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Food
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            consumable: true,
            collidable: true,
            perishable: true,
        }
    }

    fn position(&self) -> Position {
        self.position
    }

    fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    fn field_names(&self) -> &[&'static str] {
        FOOD_FIELDS
    }

    fn read_field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            names::ENERGY => FieldValue::Float(self.energy),
            names::NUTRITION => FieldValue::Float(self.nutrition),
            names::REWARD => FieldValue::Float(self.reward),
            names::COLOR => FieldValue::Color(self.color),
            names::EXPIRATION_TIMER => FieldValue::Float(self.expiration_timer),
            _ => return None,
        })
    }

    fn write_field(&mut self, name: &str, value: &FieldValue) -> bool {
        if let FieldValue::Color(color) = value {
            if name == names::COLOR {
                self.color = *color;
                return true;
            }
            return false;
        }
        let Some(v) = value.as_f64() else {
            return false;
        };
        match name {
            names::ENERGY => self.energy = v,
            names::NUTRITION => self.nutrition = v,
            names::REWARD => self.reward = v,
            names::EXPIRATION_TIMER => self.expiration_timer = v,
            _ => return false,
        }
        true
    }

    fn sync_schema(&mut self) -> &mut SyncSchema {
        &mut self.schema
    }

    fn update(&mut self, _old: &Snapshot, context: &UpdateContext<'_>) -> Result<Effects, WorldError> {
        self.expiration_timer -= context.dt;
        Ok(Effects {
            alive: self.expiration_timer > 0.0,
            ..Effects::none()
        })
    }
}

// ---------------------------------------------------------------------------
// Food spawner
// ---------------------------------------------------------------------------

/// Drops food around itself at a rate that slows as the world fills up.
#[derive(Debug, Clone)]
pub struct FoodSpawner {
    id: EntityId,
    position: Position,
    config: FoodSpawnerConfig,
    next_spawn_time: f64,
    rng: StdRng,
    schema: SyncSchema,
}

impl FoodSpawner {
    /// Create a spawner at `position`. The first spawn is due immediately.
    pub fn new(position: Position, config: FoodSpawnerConfig, seed: Option<u64>) -> Self {
        Self {
            id: EntityId::new(),
            position,
            config,
            next_spawn_time: 0.0,
            rng: seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64),
            schema: SyncSchema::new(),
        }
    }

    /// Simulated time of the next spawn.
    pub const fn next_spawn_time(&self) -> f64 {
        self.next_spawn_time
    }

    /// Spawner settings.
    pub const fn config(&self) -> &FoodSpawnerConfig {
        &self.config
    }

    fn should_spawn(&self, context: &UpdateContext<'_>) -> bool {
        context.elapsed >= self.next_spawn_time && context.food_count < context.max_food
    }

    fn spawn_delay(&mut self, food_count: usize, max_food: usize) -> f64 {
        let fill = ratio(food_count, max_food);
        let base = fill / self.config.spawn_frequency;
        (gaussian(&mut self.rng) * self.config.entropy)
            .mul_add(base, base)
            .max(MIN_SPAWN_DELAY)
    }

    fn draw_food(&mut self) -> SpawnRequest {
        let range = self.config.spawn_range.abs();
        let dx = self.rng.random_range(-range..=range);
        let dy = self.rng.random_range(-range..=range);
        let high_energy = self.rng.random::<f64>() < HIGH_ENERGY_CHANCE;
        let params = if high_energy {
            self.config.high_energy_food
        } else {
            self.config.regular_food
        };
        let entropy = self.config.entropy;
        let energy = (gaussian(&mut self.rng) * entropy)
            .mul_add(params.energy, params.energy)
            .max(MIN_ENERGY);
        let nutrition = (gaussian(&mut self.rng) * entropy)
            .mul_add(params.nutrition, params.nutrition)
            .max(MIN_NUTRITION);
        SpawnRequest::Food {
            position: self.position.offset(dx, dy),
            energy,
            nutrition,
            high_energy,
        }
    }
}

impl Entity for FoodSpawner {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::FoodSpawner
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn position(&self) -> Position {
        self.position
    }

    fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    fn field_names(&self) -> &[&'static str] {
        &[]
    }

    fn read_field(&self, _name: &str) -> Option<FieldValue> {
        None
    }

    fn write_field(&mut self, _name: &str, _value: &FieldValue) -> bool {
        false
    }

    fn sync_schema(&mut self) -> &mut SyncSchema {
        &mut self.schema
    }

    fn update(&mut self, _old: &Snapshot, context: &UpdateContext<'_>) -> Result<Effects, WorldError> {
        if !self.should_spawn(context) {
            return Ok(Effects::none());
        }
        let delay = self.spawn_delay(context.food_count, context.max_food);
        self.next_spawn_time = context.elapsed + delay;
        let request = self.draw_food();
        debug!(spawner_id = %self.id, next_spawn = self.next_spawn_time, "spawning food");
        Ok(Effects {
            spawn: Some(request),
            ..Effects::none()
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 1.0;
    }
    numerator as f64 / denominator as f64
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1 = rng.random::<f64>().clamp(f64::MIN_POSITIVE, 1.0);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
