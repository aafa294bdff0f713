use std::time::Duration;

use crate::{
    buffer::GridSize,
    config::SimulationParams,
    foundation::error::{SlimeError, SlimeResult},
    present::SurfaceMut,
};

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::{CpuEngine, SimulationState};

/// One simulation backend. The frame driver calls the steps in declaration order every frame
/// and never looks at which backend it is talking to.
pub trait SimulationEngine {
    fn size(&self) -> GridSize;

    /// Flip the substrate pair: last frame's output becomes the read side.
    fn swap_buffers(&mut self);

    /// Write side <- blur and fade of the read side.
    fn diffuse(&mut self) -> SlimeResult<()>;

    /// Sense the write side, steer, move and deposit into it.
    fn move_agents(&mut self) -> SlimeResult<()>;

    /// Copy the finished write side into a presentable surface.
    fn publish(&mut self, target: &mut SurfaceMut<'_>) -> SlimeResult<()>;

    fn teardown(&mut self) -> SlimeResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub size: GridSize,
    pub params: SimulationParams,
    pub seed: u64,
    /// Upper bound for one GPU completion wait.
    pub fence_timeout: Duration,
}

impl EngineSettings {
    pub fn new(size: GridSize, params: SimulationParams, seed: u64) -> Self {
        Self {
            size,
            params,
            seed,
            fence_timeout: Duration::from_secs(5),
        }
    }
}

pub fn create_engine(
    kind: EngineKind,
    settings: &EngineSettings,
) -> SlimeResult<Box<dyn SimulationEngine>> {
    settings.params.validate()?;
    tracing::info!(
        ?kind,
        width = settings.size.width,
        height = settings.size.height,
        agents = settings.params.agent_count,
        seed = settings.seed,
        "creating simulation engine"
    );
    match kind {
        EngineKind::Cpu => Ok(Box::new(CpuEngine::new(settings.clone()))),
        #[cfg(feature = "gpu")]
        EngineKind::Gpu => Ok(Box::new(gpu::GpuEngine::new(settings.clone())?)),
        #[allow(unreachable_patterns)]
        _ => Err(SlimeError::config("requested engine is not available")),
    }
}
