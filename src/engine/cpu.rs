use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    agents::AgentPopulation,
    buffer::{FrameBuffer, FrameBufferPair, GridSize},
    config::SimulationParams,
    diffuse::diffuse_and_fade,
    engine::{EngineSettings, SimulationEngine},
    foundation::error::SlimeResult,
    present::SurfaceMut,
};

/// Everything one run mutates: the substrate pair, the agents and the jitter source.
#[derive(Clone, Debug)]
pub struct SimulationState {
    pub buffers: FrameBufferPair,
    pub population: AgentPopulation,
    pub rng: ChaCha8Rng,
    pub params: SimulationParams,
}

impl SimulationState {
    /// Allocate the buffers and spawn the population. Identical seeds give identical runs.
    pub fn new(size: GridSize, params: SimulationParams, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let population = AgentPopulation::spawn(size, &params, &mut rng);
        Self {
            buffers: FrameBufferPair::new(size),
            population,
            rng,
            params,
        }
    }
}

/// Sequential raster implementation.
#[derive(Debug)]
pub struct CpuEngine {
    state: SimulationState,
}

impl CpuEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::from_state(SimulationState::new(
            settings.size,
            settings.params,
            settings.seed,
        ))
    }

    pub fn from_state(state: SimulationState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Buffer the agents sense and deposit into this frame.
    pub fn substrate(&self) -> &FrameBuffer {
        self.state.buffers.write()
    }
}

impl SimulationEngine for CpuEngine {
    fn size(&self) -> GridSize {
        self.state.buffers.size()
    }

    fn swap_buffers(&mut self) {
        self.state.buffers.swap();
    }

    fn diffuse(&mut self) -> SlimeResult<()> {
        let (read, write) = self.state.buffers.split_mut();
        diffuse_and_fade(
            read,
            write,
            &self.state.params.kernel,
            self.state.params.fade,
        )
    }

    fn move_agents(&mut self) -> SlimeResult<()> {
        let SimulationState {
            buffers,
            population,
            rng,
            params,
        } = &mut self.state;
        population.update(buffers.write_mut(), params, rng);
        Ok(())
    }

    fn publish(&mut self, target: &mut SurfaceMut<'_>) -> SlimeResult<()> {
        target.copy_from(self.state.buffers.write())
    }
}
