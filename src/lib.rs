#![deny(unsafe_code)]

pub mod agents;
pub mod buffer;
pub mod compositor;
pub mod config;
pub mod diffuse;
#[cfg(target_os = "linux")]
pub mod display;
pub mod engine;
mod foundation;
pub mod pixel;
pub mod present;
pub mod shutdown;

pub use agents::{Agent, AgentPopulation, Steer, decide_steer, reflect_axis, sense};
pub use buffer::{FrameBuffer, FrameBufferPair, GridSize};
pub use compositor::{FrameDriver, FrameTiming, RunStats};
pub use config::{FadeAmount, Kernel3x3, SimulationParams, SpawnRegion};
pub use diffuse::{blur_at, diffuse_and_fade};
#[cfg(target_os = "linux")]
pub use display::{DisplayHandle, acquire_display};
pub use engine::{
    CpuEngine, EngineKind, EngineSettings, SimulationEngine, SimulationState, create_engine,
};
pub use foundation::error::{SlimeError, SlimeResult};
pub use pixel::Pixel;
#[cfg(target_os = "linux")]
pub use present::fbdev::FbdevPresenter;
pub use present::{
    PresentOpts, PresentationBackend, Surface, SurfaceMut, SurfacePair,
    headless::HeadlessPresenter,
    png::{PngPresenter, write_png},
};
pub use shutdown::ShutdownSignal;
