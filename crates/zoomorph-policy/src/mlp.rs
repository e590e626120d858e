//! Reference policy model: a fully connected ReLU Q-network.
//!
//! Inference is a plain forward pass. Training is a DQN step against a
//! lagging target network: smooth-L1 loss on the taken action's value,
//! global gradient-norm clipping, and an AdamW update. The target network
//! and optimiser moments are created on the first training step, so
//! inference-only copies (the runtime's buffers) carry no training state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zoomorph_types::{Experience, LearnHyperparams};

use crate::error::PolicyError;
use crate::learn::TrainMetrics;
use crate::model::{LayerWeights, ModelFactory, ModelSpec, ModelWeights, PolicyModel, TrainStep};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;
const WEIGHT_DECAY: f32 = 0.01;

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Dense {
    inputs: usize,
    outputs: usize,
    /// Row-major, one row of `inputs` weights per output.
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn random(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let fan = count_as_f32(inputs.saturating_add(outputs)).max(1.0);
        let limit = (6.0 / fan).sqrt();
        let weights = (0..inputs.saturating_mul(outputs))
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
        }
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .chunks_exact(self.inputs)
            .zip(&self.bias)
            .map(|(row, bias)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + bias)
            .collect()
    }

    fn to_weights(&self) -> LayerWeights {
        LayerWeights {
            inputs: self.inputs,
            outputs: self.outputs,
            weights: self.weights.clone(),
            bias: self.bias.clone(),
        }
    }
}

fn relu(values: &mut [f32]) {
    for value in values {
        *value = value.max(0.0);
    }
}

/// Forward pass returning only the output layer.
fn forward(layers: &[Dense], input: &[f32]) -> Vec<f32> {
    let last = layers.len().saturating_sub(1);
    let mut current = input.to_vec();
    for (idx, layer) in layers.iter().enumerate() {
        current = layer.forward(&current);
        if idx < last {
            relu(&mut current);
        }
    }
    current
}

/// Forward pass keeping every activation; entry 0 is the input.
fn forward_trace(layers: &[Dense], input: &[f32]) -> Vec<Vec<f32>> {
    let last = layers.len().saturating_sub(1);
    let mut trace = Vec::with_capacity(layers.len().saturating_add(1));
    trace.push(input.to_vec());
    for (idx, layer) in layers.iter().enumerate() {
        let mut out = layer.forward(trace.last().map_or(&[][..], Vec::as_slice));
        if idx < last {
            relu(&mut out);
        }
        trace.push(out);
    }
    trace
}

// ---------------------------------------------------------------------------
// Training state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Gradient {
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Gradient {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            bias: vec![0.0; layer.bias.len()],
        }
    }

    fn squared_norm(&self) -> f32 {
        self.weights.iter().chain(&self.bias).map(|g| g * g).sum()
    }

    fn scale(&mut self, factor: f32) {
        for g in self.weights.iter_mut().chain(self.bias.iter_mut()) {
            *g *= factor;
        }
    }
}

#[derive(Debug, Clone)]
struct Trainer {
    target: Vec<Dense>,
    first_moment: Vec<Gradient>,
    second_moment: Vec<Gradient>,
    updates: i32,
}

impl Trainer {
    fn new(layers: &[Dense]) -> Self {
        Self {
            target: layers.to_vec(),
            first_moment: layers.iter().map(Gradient::zeros_like).collect(),
            second_moment: layers.iter().map(Gradient::zeros_like).collect(),
            updates: 0,
        }
    }
}

/// Accumulate gradients for one sample. `delta` is dLoss/dOutput.
fn backprop(layers: &[Dense], trace: &[Vec<f32>], mut delta: Vec<f32>, grads: &mut [Gradient]) {
    for (idx, (layer, grad)) in layers.iter().zip(grads.iter_mut()).enumerate().rev() {
        let Some(input) = trace.get(idx) else {
            return;
        };
        for ((row_grad, bias_grad), d) in grad
            .weights
            .chunks_exact_mut(layer.inputs)
            .zip(grad.bias.iter_mut())
            .zip(&delta)
        {
            *bias_grad += d;
            for (g, x) in row_grad.iter_mut().zip(input) {
                *g += d * x;
            }
        }
        if idx == 0 {
            break;
        }

        let mut upstream = vec![0.0; layer.inputs];
        for (row, d) in layer.weights.chunks_exact(layer.inputs).zip(&delta) {
            for (u, w) in upstream.iter_mut().zip(row) {
                *u += w * d;
            }
        }
        // `input` is a post-ReLU activation of the previous layer.
        for (u, a) in upstream.iter_mut().zip(input) {
            if *a <= 0.0 {
                *u = 0.0;
            }
        }
        delta = upstream;
    }
}

fn adamw_update(
    params: &mut [f32],
    grads: &[f32],
    first: &mut [f32],
    second: &mut [f32],
    learning_rate: f32,
    updates: i32,
) {
    let correction1 = 1.0 - BETA1.powi(updates);
    let correction2 = 1.0 - BETA2.powi(updates);
    for (((p, g), m), v) in params
        .iter_mut()
        .zip(grads)
        .zip(first.iter_mut())
        .zip(second.iter_mut())
    {
        *p -= learning_rate * WEIGHT_DECAY * *p;
        *m = BETA1 * *m + (1.0 - BETA1) * g;
        *v = BETA2 * *v + (1.0 - BETA2) * g * g;
        let m_hat = *m / correction1;
        let v_hat = *v / correction2;
        *p -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
    }
}

fn smooth_l1(diff: f32) -> f32 {
    let abs = diff.abs();
    if abs < 1.0 { 0.5 * diff * diff } else { abs - 0.5 }
}

fn fires(step: u64, every: u64) -> bool {
    step.checked_rem(every) == Some(0)
}

fn count_as_f32(count: usize) -> f32 {
    f32::from(u16::try_from(count).unwrap_or(u16::MAX))
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Fully connected ReLU Q-network.
#[derive(Debug, Clone)]
pub struct MlpQNetwork {
    spec: ModelSpec,
    layers: Vec<Dense>,
    trainer: Option<Trainer>,
}

impl MlpQNetwork {
    /// Build a network with Xavier-uniform weights seeded from `spec.seed`.
    pub fn new(spec: &ModelSpec) -> Result<Self, PolicyError> {
        spec.validate()?;
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let mut layers = Vec::with_capacity(spec.hidden_layers.saturating_add(1));
        let mut inputs = spec.input_size;
        for _ in 0..spec.hidden_layers {
            layers.push(Dense::random(inputs, spec.hidden_size, &mut rng));
            inputs = spec.hidden_size;
        }
        layers.push(Dense::random(inputs, spec.output_size, &mut rng));
        Ok(Self {
            spec: *spec,
            layers,
            trainer: None,
        })
    }

    /// The shape this network was built with.
    pub const fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn check_experience(&self, experience: &Experience) -> Result<(), PolicyError> {
        if experience.state.len() != self.spec.input_size {
            return Err(PolicyError::ShapeMismatch {
                what: "experience state",
                expected: self.spec.input_size,
                actual: experience.state.len(),
            });
        }
        if experience.next_state.len() != self.spec.input_size {
            return Err(PolicyError::ShapeMismatch {
                what: "experience next state",
                expected: self.spec.input_size,
                actual: experience.next_state.len(),
            });
        }
        if experience.action >= self.spec.output_size {
            return Err(PolicyError::ShapeMismatch {
                what: "experience action index",
                expected: self.spec.output_size,
                actual: experience.action,
            });
        }
        Ok(())
    }
}

impl PolicyModel for MlpQNetwork {
    fn infer(&self, input: &[f32]) -> Result<Vec<f32>, PolicyError> {
        if input.len() != self.spec.input_size {
            return Err(PolicyError::ShapeMismatch {
                what: "perception vector",
                expected: self.spec.input_size,
                actual: input.len(),
            });
        }
        Ok(forward(&self.layers, input))
    }

    fn train_step(
        &mut self,
        hyperparams: &LearnHyperparams,
        batch: &[Experience],
        step: u64,
    ) -> Result<TrainStep, PolicyError> {
        for experience in batch {
            self.check_experience(experience)?;
        }
        let trainer = self
            .trainer
            .get_or_insert_with(|| Trainer::new(&self.layers));

        let scale = 1.0 / count_as_f32(batch.len()).max(1.0);
        let mut grads: Vec<Gradient> = self.layers.iter().map(Gradient::zeros_like).collect();
        let mut errors = Vec::with_capacity(batch.len());
        let mut loss = 0.0_f32;
        let mut q_sum = 0.0_f32;

        for experience in batch {
            let trace = forward_trace(&self.layers, &experience.state);
            let q_taken = trace
                .last()
                .and_then(|q| q.get(experience.action))
                .copied()
                .unwrap_or(0.0);
            let next_best = forward(&trainer.target, &experience.next_state)
                .into_iter()
                .fold(f32::NEG_INFINITY, f32::max);
            let next_best = if next_best.is_finite() { next_best } else { 0.0 };
            let target = hyperparams.gamma.mul_add(next_best, experience.reward);

            let diff = q_taken - target;
            errors.push(diff.abs());
            loss += smooth_l1(diff) * scale;
            q_sum += q_taken;

            let mut delta = vec![0.0; self.spec.output_size];
            if let Some(d) = delta.get_mut(experience.action) {
                *d = diff.clamp(-1.0, 1.0) * scale;
            }
            backprop(&self.layers, &trace, delta, &mut grads);
        }

        if !loss.is_finite() {
            return Err(PolicyError::NonFinite { what: "loss" });
        }

        let norm = grads.iter().map(Gradient::squared_norm).sum::<f32>().sqrt();
        if hyperparams.gradient_clip > 0.0 && norm > hyperparams.gradient_clip {
            let factor = hyperparams.gradient_clip / (norm + 1e-6);
            for grad in &mut grads {
                grad.scale(factor);
            }
        }

        trainer.updates = trainer.updates.saturating_add(1);
        for (((layer, grad), first), second) in self
            .layers
            .iter_mut()
            .zip(&grads)
            .zip(trainer.first_moment.iter_mut())
            .zip(trainer.second_moment.iter_mut())
        {
            adamw_update(
                &mut layer.weights,
                &grad.weights,
                &mut first.weights,
                &mut second.weights,
                hyperparams.learning_rate,
                trainer.updates,
            );
            adamw_update(
                &mut layer.bias,
                &grad.bias,
                &mut first.bias,
                &mut second.bias,
                hyperparams.learning_rate,
                trainer.updates,
            );
        }

        let target_updated = fires(step, hyperparams.target_update);
        if target_updated {
            trainer.target.clone_from(&self.layers);
        }
        let weights_published = fires(step, hyperparams.inference_update);
        let weights = weights_published.then(|| self.weights());

        Ok(TrainStep {
            metrics: TrainMetrics {
                loss,
                mean_q: q_sum * scale,
                step,
                target_updated,
                weights_published,
            },
            weights,
            errors,
        })
    }

    fn load_weights(&mut self, weights: &ModelWeights) -> Result<(), PolicyError> {
        if weights.layers.len() != self.layers.len() {
            return Err(PolicyError::ShapeMismatch {
                what: "layer count",
                expected: self.layers.len(),
                actual: weights.layers.len(),
            });
        }
        for (layer, incoming) in self.layers.iter().zip(&weights.layers) {
            if incoming.inputs != layer.inputs || incoming.outputs != layer.outputs {
                return Err(PolicyError::ShapeMismatch {
                    what: "layer shape",
                    expected: layer.weights.len(),
                    actual: incoming.inputs.saturating_mul(incoming.outputs),
                });
            }
            if incoming.weights.len() != layer.weights.len() {
                return Err(PolicyError::ShapeMismatch {
                    what: "layer weights",
                    expected: layer.weights.len(),
                    actual: incoming.weights.len(),
                });
            }
            if incoming.bias.len() != layer.bias.len() {
                return Err(PolicyError::ShapeMismatch {
                    what: "layer bias",
                    expected: layer.bias.len(),
                    actual: incoming.bias.len(),
                });
            }
        }
        for (layer, incoming) in self.layers.iter_mut().zip(&weights.layers) {
            layer.weights.clone_from(&incoming.weights);
            layer.bias.clone_from(&incoming.bias);
        }
        Ok(())
    }

    fn weights(&self) -> ModelWeights {
        ModelWeights {
            layers: self.layers.iter().map(Dense::to_weights).collect(),
        }
    }
}

/// [`ModelFactory`] for [`MlpQNetwork`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MlpFactory;

impl ModelFactory for MlpFactory {
    fn build(&self, spec: &ModelSpec) -> Result<Box<dyn PolicyModel>, PolicyError> {
        Ok(Box::new(MlpQNetwork::new(spec)?))
    }
}
