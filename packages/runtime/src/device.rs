//! Devices
//!
//! A [`Device`] executes compiled payloads for one compile target. Devices are
//! serially-reusable exclusive resources: a [`DeviceHandle`] wraps one in a
//! FIFO async mutex and is passed explicitly to every engine that shares it,
//! so at most one execution is ever in flight per device.
//!
//! [`ReferenceDevice`] runs `reference-cpu` programs with candle tensors on
//! the CPU.

use crate::batch::{DeviceOutput, PaddedBatch};
use crate::error::DeviceError;
use candle_core::{Device as CandleDevice, Tensor};
use shapeforge_core::{CompiledArtifact, Pooling, ReferenceProgram, REFERENCE_TARGET_NAME};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Executes compiled programs at their fixed shape
pub trait Device: Send + 'static {
    /// Human-readable device name for logs and errors
    fn name(&self) -> &str;

    /// Compile target whose payloads this device executes
    fn target(&self) -> &str;

    /// Run `artifact` on a batch padded to the artifact's exact shape
    fn execute(
        &mut self,
        artifact: &CompiledArtifact,
        batch: &PaddedBatch,
    ) -> Result<DeviceOutput, DeviceError>;
}

/// Shared handle to one exclusive device
#[derive(Clone)]
pub struct DeviceHandle {
    device: Arc<Mutex<Box<dyn Device>>>,
    name: Arc<str>,
    target: Arc<str>,
}

impl DeviceHandle {
    pub fn new<D: Device>(device: D) -> Self {
        let name: Arc<str> = device.name().into();
        let target: Arc<str> = device.target().into();
        Self {
            device: Arc::new(Mutex::new(Box::new(device))),
            name,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn supports(&self, target: &str) -> bool {
        *self.target == *target
    }

    /// Wait for exclusive access. Waiters are served in arrival order;
    /// dropping the future before it resolves leaves the queue.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub(crate) async fn acquire(
        &self,
        timeout: Option<Duration>,
    ) -> Option<OwnedMutexGuard<Box<dyn Device>>> {
        let lock = self.device.clone().lock_owned();
        match timeout {
            Some(limit) => tokio::time::timeout(limit, lock).await.ok(),
            None => Some(lock.await),
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

/// Decoded program with weights resident as tensors
struct PreparedProgram {
    program_shape: (usize, usize),
    hidden_size: usize,
    vocab_size: usize,
    pooling: Pooling,
    normalize: bool,
    token_table: Tensor,
    position_table: Tensor,
}

/// CPU executor for `reference-cpu` programs
pub struct ReferenceDevice {
    name: String,
    device: CandleDevice,
    /// Programs keyed by payload checksum
    programs: HashMap<String, PreparedProgram>,
}

/// Programs kept resident before the oldest is dropped
const MAX_RESIDENT_PROGRAMS: usize = 8;

impl ReferenceDevice {
    pub fn new() -> Self {
        Self::named("reference-cpu:0")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: CandleDevice::Cpu,
            programs: HashMap::new(),
        }
    }

    fn prepare(&mut self, artifact: &CompiledArtifact) -> Result<&PreparedProgram, DeviceError> {
        let key = artifact.checksum().to_string();

        if !self.programs.contains_key(&key) {
            if self.programs.len() >= MAX_RESIDENT_PROGRAMS {
                self.programs.clear();
            }

            let program =
                ReferenceProgram::decode(artifact.payload()).map_err(DeviceError::ProgramRejected)?;
            let header = &program.header;

            let token_table = Tensor::from_vec(
                program.token_table,
                (header.vocab_size, header.hidden_size),
                &self.device,
            )
            .map_err(|e| DeviceError::ProgramRejected(e.to_string()))?;
            let position_table = Tensor::from_vec(
                program.position_table,
                (header.sequence_length, header.hidden_size),
                &self.device,
            )
            .map_err(|e| DeviceError::ProgramRejected(e.to_string()))?;

            tracing::debug!(
                "Prepared program for '{}' ({}x{}, hidden {})",
                header.model_identifier,
                header.batch_size,
                header.sequence_length,
                header.hidden_size
            );

            let prepared = PreparedProgram {
                program_shape: (header.batch_size, header.sequence_length),
                hidden_size: header.hidden_size,
                vocab_size: header.vocab_size,
                pooling: header.pooling,
                normalize: header.normalize,
                token_table,
                position_table,
            };
            self.programs.insert(key.clone(), prepared);
        }

        self.programs
            .get(&key)
            .ok_or_else(|| DeviceError::Execution("program eviction race".to_string()))
    }
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for ReferenceDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &str {
        REFERENCE_TARGET_NAME
    }

    fn execute(
        &mut self,
        artifact: &CompiledArtifact,
        batch: &PaddedBatch,
    ) -> Result<DeviceOutput, DeviceError> {
        let device = self.device.clone();
        let program = self.prepare(artifact)?;

        let (b, s) = (batch.batch_size(), batch.sequence_length());
        if (b, s) != program.program_shape {
            return Err(DeviceError::InvalidInput(format!(
                "batch is {}x{} but program was compiled for {}x{}",
                b, s, program.program_shape.0, program.program_shape.1
            )));
        }

        if let Some(id) = batch
            .input_ids()
            .iter()
            .find(|&&id| id as usize >= program.vocab_size)
        {
            return Err(DeviceError::InvalidInput(format!(
                "token id {} is outside the vocabulary of {}",
                id, program.vocab_size
            )));
        }

        run_program(program, batch, &device).map_err(|e| DeviceError::Execution(e.to_string()))
    }
}

/// tanh(token + position), masked pooling, optional L2 normalization
fn run_program(
    program: &PreparedProgram,
    batch: &PaddedBatch,
    device: &CandleDevice,
) -> candle_core::Result<DeviceOutput> {
    let (b, s, h) = (
        batch.batch_size(),
        batch.sequence_length(),
        program.hidden_size,
    );

    let ids = Tensor::from_vec(batch.input_ids().to_vec(), (b * s,), device)?;
    let hidden = program
        .token_table
        .index_select(&ids, 0)?
        .reshape((b, s, h))?
        .broadcast_add(&program.position_table)?
        .tanh()?;

    let pooled = match program.pooling {
        Pooling::Mean => {
            let mask: Vec<f32> = batch.attention_mask().iter().map(|&m| f32::from(m)).collect();
            let mask = Tensor::from_vec(mask, (b, s), device)?;
            let counts: Vec<f32> = (0..b)
                .map(|row| batch.row_length(row).max(1) as f32)
                .collect();
            let counts = Tensor::from_vec(counts, (b, 1), device)?;

            hidden
                .broadcast_mul(&mask.unsqueeze(2)?)?
                .sum(1)?
                .broadcast_div(&counts)?
        }
        Pooling::Cls => hidden.narrow(1, 0, 1)?.squeeze(1)?,
    };

    let sentence = if program.normalize {
        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.affine(1.0, 1e-12)?;
        pooled.broadcast_div(&norm)?
    } else {
        pooled
    };

    Ok(DeviceOutput {
        token_embeddings: hidden.to_vec3::<f32>()?,
        sentence_embedding: sentence.to_vec2::<f32>()?,
    })
}
