use std::path::Path;

use crate::{
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
};

/// Per-channel amount subtracted from every pixel after blurring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FadeAmount {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for FadeAmount {
    fn default() -> Self {
        Self {
            red: 1,
            green: 1,
            blue: 1,
        }
    }
}

/// 3x3 diffusion stencil. `weights[row][col]`, row 0 is the row above the center pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Kernel3x3 {
    pub weights: [[u32; 3]; 3],
    pub divisor: u32,
}

impl Kernel3x3 {
    /// Binomial blur, energy preserving.
    pub const BINOMIAL: Kernel3x3 = Kernel3x3 {
        weights: [[1, 2, 1], [2, 4, 2], [1, 2, 1]],
        divisor: 16,
    };

    pub fn weight_sum(&self) -> u64 {
        self.weights.iter().flatten().map(|&w| u64::from(w)).sum()
    }

    #[inline]
    pub fn weight(&self, dx: i64, dy: i64) -> u32 {
        self.weights[(dy + 1) as usize][(dx + 1) as usize]
    }

    /// `true` when the divisor matches the weight sum, i.e. a uniform image stays uniform.
    pub fn is_energy_preserving(&self) -> bool {
        self.weight_sum() == u64::from(self.divisor)
    }

    /// Largest weighted sum a channel can reach; the GPU accumulates it in a `u32`.
    pub fn max_accumulator(&self) -> u64 {
        self.weight_sum() * 255
    }
}

impl Default for Kernel3x3 {
    fn default() -> Self {
        Self::BINOMIAL
    }
}

/// Where agents are placed at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnRegion {
    /// Uniform over the central half of each axis: `[size/4, 3*size/4)`.
    #[default]
    CentralHalf,
    /// Uniform over the whole grid.
    Full,
}

/// Read-only simulation parameters for one run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationParams {
    /// Population size; constant for the whole run.
    pub agent_count: usize,
    /// Distance travelled per frame, in pixels.
    pub speed: f64,
    /// Full steering field of view in radians. Candidates are `angle ± field_of_view / 2`.
    pub field_of_view: f64,
    /// Look-ahead multiplier; sensors sit at `speed * steer_length` from the agent.
    pub steer_length: f64,
    /// Maximum random heading change per frame, in radians.
    pub max_jitter: f64,
    /// Center luma above which agents keep turning toward the brighter side.
    pub luma_threshold: f64,
    /// Deposit color, XRGB.
    pub deposit_color: u32,
    pub fade: FadeAmount,
    pub kernel: Kernel3x3,
    pub spawn: SpawnRegion,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            agent_count: 10_000,
            speed: 1.0,
            field_of_view: std::f64::consts::FRAC_PI_4,
            steer_length: 9.0,
            max_jitter: 0.1,
            luma_threshold: 0.3,
            deposit_color: Pixel::WHITE.0,
            fade: FadeAmount::default(),
            kernel: Kernel3x3::default(),
            spawn: SpawnRegion::default(),
        }
    }
}

impl SimulationParams {
    pub fn from_json_str(s: &str) -> SlimeResult<Self> {
        let params: Self = serde_json::from_str(s)
            .map_err(|e| SlimeError::serde(format!("parse simulation params: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_path(path: &Path) -> SlimeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SlimeError::config(format!("read params file '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> SlimeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SlimeError::serde(format!("serialize simulation params: {e}")))
    }

    /// Half the field of view.
    pub fn steer_amplitude(&self) -> f64 {
        self.field_of_view * 0.5
    }

    /// Distance from the agent to each sensing point.
    pub fn sense_distance(&self) -> f64 {
        self.speed * self.steer_length
    }

    pub fn deposit_pixel(&self) -> Pixel {
        Pixel(self.deposit_color)
    }

    pub fn validate(&self) -> SlimeResult<()> {
        if self.agent_count == 0 {
            return Err(SlimeError::validation("agent_count must be > 0"));
        }
        for (name, v) in [
            ("speed", self.speed),
            ("field_of_view", self.field_of_view),
            ("steer_length", self.steer_length),
            ("max_jitter", self.max_jitter),
            ("luma_threshold", self.luma_threshold),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(SlimeError::validation(format!(
                    "{name} must be finite and >= 0, got {v}"
                )));
            }
        }
        if self.deposit_color > 0x00FF_FFFF {
            return Err(SlimeError::validation(format!(
                "deposit_color must be XRGB with a zero X byte, got {:#010x}",
                self.deposit_color
            )));
        }
        if self.kernel.divisor == 0 {
            return Err(SlimeError::validation("kernel divisor must be > 0"));
        }
        if self.kernel.max_accumulator() > u64::from(u32::MAX) {
            return Err(SlimeError::validation(format!(
                "kernel weights sum to {}; at most {} fits a channel accumulator",
                self.kernel.weight_sum(),
                u32::MAX / 255
            )));
        }
        if !self.kernel.is_energy_preserving() {
            tracing::warn!(
                divisor = self.kernel.divisor,
                weight_sum = self.kernel.weight_sum(),
                "kernel divisor differs from weight sum; trails will darken or brighten over time"
            );
        }
        Ok(())
    }
}
