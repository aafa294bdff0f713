//! Frame driver: pairs one simulation step with one presentation flip.

use std::time::{Duration, Instant};

use crate::{
    engine::SimulationEngine,
    foundation::error::{SlimeError, SlimeResult},
    present::{PresentOpts, PresentationBackend},
    shutdown::ShutdownSignal,
};

/// Timings of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTiming {
    /// 1-based frame number.
    pub frame: u64,
    /// Diffuse, agent update and publish.
    pub compose: Duration,
    /// Present-and-flip, including the vblank wait.
    pub present: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunStats {
    pub frames: u64,
    pub total_compose: Duration,
    pub max_compose: Duration,
    pub total_present: Duration,
}

impl RunStats {
    fn record(&mut self, t: &FrameTiming) {
        self.frames += 1;
        self.total_compose += t.compose;
        self.max_compose = self.max_compose.max(t.compose);
        self.total_present += t.present;
    }

    pub fn mean_compose(&self) -> Duration {
        if self.frames == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_compose.as_nanos() / u128::from(self.frames);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DriverState {
    Running,
    TornDown,
}

/// Owns the engine and the presenter for the lifetime of a run.
///
/// Construction allocates everything (the Idle to Running transition); every
/// [`FrameDriver::run_frame`] then performs swap, diffuse, move, publish and present, in that
/// order. The substrate swap and the presenter flip therefore stay paired one to one.
pub struct FrameDriver {
    engine: Box<dyn SimulationEngine>,
    presenter: Box<dyn PresentationBackend>,
    opts: PresentOpts,
    frame: u64,
    state: DriverState,
}

impl FrameDriver {
    pub fn new(
        engine: Box<dyn SimulationEngine>,
        presenter: Box<dyn PresentationBackend>,
        opts: PresentOpts,
    ) -> SlimeResult<Self> {
        if engine.size() != presenter.size() {
            let (e, p) = (engine.size(), presenter.size());
            return Err(SlimeError::config(format!(
                "engine grid {}x{} does not match presentation surface {}x{}",
                e.width, e.height, p.width, p.height
            )));
        }
        Ok(Self {
            engine,
            presenter,
            opts,
            frame: 0,
            state: DriverState::Running,
        })
    }

    pub fn frames_done(&self) -> u64 {
        self.frame
    }

    pub fn presenter(&self) -> &dyn PresentationBackend {
        self.presenter.as_ref()
    }

    pub fn presenter_mut(&mut self) -> &mut dyn PresentationBackend {
        self.presenter.as_mut()
    }

    pub fn run_frame(&mut self) -> SlimeResult<FrameTiming> {
        if self.state == DriverState::TornDown {
            return Err(SlimeError::setup("frame requested after teardown"));
        }

        self.engine.swap_buffers();

        let start = Instant::now();
        self.engine.diffuse()?;
        self.engine.move_agents()?;
        {
            let mut surfaces = self.presenter.surfaces();
            self.engine.publish(&mut surfaces.back)?;
        }
        let compose = start.elapsed();

        let flip_start = Instant::now();
        self.presenter.present_and_flip()?;
        let present = flip_start.elapsed();
        if present > self.opts.vsync_timeout {
            tracing::warn!(
                present_ms = present.as_millis() as u64,
                timeout_ms = self.opts.vsync_timeout.as_millis() as u64,
                "present exceeded the vsync timeout"
            );
        }

        self.frame += 1;
        let timing = FrameTiming {
            frame: self.frame,
            compose,
            present,
        };
        tracing::trace!(
            frame = timing.frame,
            compose_us = compose.as_micros() as u64,
            present_us = present.as_micros() as u64,
            "frame"
        );
        Ok(timing)
    }

    /// Run until `shutdown` fires or `frame_limit` frames are done, then tear down.
    ///
    /// `on_frame` sees every frame's timing. Teardown runs on every exit path, errors included.
    pub fn run(
        &mut self,
        shutdown: &ShutdownSignal,
        frame_limit: Option<u64>,
        mut on_frame: impl FnMut(&FrameTiming),
    ) -> SlimeResult<RunStats> {
        let mut stats = RunStats::default();
        let outcome = loop {
            if shutdown.is_requested() {
                tracing::info!(frames = stats.frames, "shutdown requested");
                break Ok(());
            }
            if frame_limit.is_some_and(|limit| stats.frames >= limit) {
                break Ok(());
            }
            match self.run_frame() {
                Ok(t) => {
                    stats.record(&t);
                    on_frame(&t);
                }
                Err(e) => break Err(e),
            }
        };
        let torn_down = self.teardown();
        outcome?;
        torn_down?;
        Ok(stats)
    }

    /// Release the presenter and the engine. Runs once; later calls are no-ops.
    pub fn teardown(&mut self) -> SlimeResult<()> {
        if self.state == DriverState::TornDown {
            return Ok(());
        }
        self.state = DriverState::TornDown;
        let presenter = self.presenter.teardown();
        let engine = self.engine.teardown();
        tracing::info!(frames = self.frame, "frame driver torn down");
        presenter.and(engine)
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "teardown during drop failed");
        }
    }
}
