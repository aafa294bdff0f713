//! Agent population: sensing, steering, movement, wall reflection and deposit.

use std::f64::consts::{PI, TAU};

use rand::Rng;

use crate::{
    buffer::{FrameBuffer, GridSize},
    config::{SimulationParams, SpawnRegion},
};

/// Luma sensed at the `[left, center, right]` candidate headings.
pub type SensorReading = [f64; 3];

/// One particle. `dir_x`/`dir_y` are always `speed * (cos(angle), sin(angle))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Agent {
    pub pos_x: f64,
    pub pos_y: f64,
    /// Heading in radians.
    pub angle: f64,
    pub dir_x: f64,
    pub dir_y: f64,
}

impl Agent {
    pub fn new(pos_x: f64, pos_y: f64, angle: f64, speed: f64) -> Self {
        let mut a = Self {
            pos_x,
            pos_y,
            angle,
            dir_x: 0.0,
            dir_y: 0.0,
        };
        a.set_heading(angle, speed);
        a
    }

    pub fn set_heading(&mut self, angle: f64, speed: f64) {
        self.angle = angle;
        self.dir_x = speed * angle.cos();
        self.dir_y = speed * angle.sin();
    }

    /// Grid cell under the agent, truncating the continuous position.
    pub fn cell(&self, size: GridSize) -> (u32, u32) {
        let x = (self.pos_x as u32).min(size.width - 1);
        let y = (self.pos_y as u32).min(size.height - 1);
        (x, y)
    }

    /// Mirror the agent back into `[0, width-1] x [0, height-1]`.
    ///
    /// An X-axis bounce maps the heading to `-(angle + π)`, a Y-axis bounce to `-angle`.
    pub fn reflect_into(&mut self, size: GridSize) {
        let (x, dx, hit_x) = reflect_axis(self.pos_x, self.dir_x, size.width);
        if hit_x {
            self.pos_x = x;
            self.dir_x = dx;
            self.angle = -(self.angle + PI);
        }
        let (y, dy, hit_y) = reflect_axis(self.pos_y, self.dir_y, size.height);
        if hit_y {
            self.pos_y = y;
            self.dir_y = dy;
            self.angle = -self.angle;
        }
        // A step longer than the grid can still overshoot after one bounce.
        self.pos_x = self.pos_x.clamp(0.0, f64::from(size.width - 1));
        self.pos_y = self.pos_y.clamp(0.0, f64::from(size.height - 1));
        self.angle = normalize_angle(self.angle);
    }
}

/// Wrap into `[0, 2π)`. `rem_euclid` alone can round up to exactly 2π for tiny negatives.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a >= TAU { 0.0 } else { a }
}

/// Reflect one coordinate against `[0, size-1]`.
///
/// Returns the new position, the new direction component and whether a bounce happened.
pub fn reflect_axis(pos: f64, dir: f64, size: u32) -> (f64, f64, bool) {
    let max = f64::from(size.saturating_sub(1));
    if pos < 0.0 {
        (pos.abs(), -dir, true)
    } else if pos > max {
        (max - (max - pos).abs(), -dir, true)
    } else {
        (pos, dir, false)
    }
}

/// Steering outcome relative to the current heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Steer {
    Left,
    Keep,
    Right,
}

impl Steer {
    pub fn offset(self, amplitude: f64) -> f64 {
        match self {
            Steer::Left => -amplitude,
            Steer::Keep => 0.0,
            Steer::Right => amplitude,
        }
    }
}

/// Pick a turn from the three sensed lumas.
///
/// A strictly brightest side wins. Otherwise, on a trail brighter than `threshold`, the agent
/// leans toward the brighter side; equal sides and dim trails keep the heading.
pub fn decide_steer([left, center, right]: SensorReading, threshold: f64) -> Steer {
    if left > center && left > right {
        Steer::Left
    } else if right > center && right > left {
        Steer::Right
    } else if center > threshold {
        if left > right {
            Steer::Left
        } else if right > left {
            Steer::Right
        } else {
            Steer::Keep
        }
    } else {
        Steer::Keep
    }
}

/// Sample the substrate at the three candidate headings. Off-grid sensors read 0.
pub fn sense(agent: &Agent, substrate: &FrameBuffer, params: &SimulationParams) -> SensorReading {
    let amp = params.steer_amplitude();
    let reach = params.sense_distance();
    [-amp, 0.0, amp].map(|offset| {
        let heading = agent.angle + offset;
        let sx = agent.pos_x + reach * heading.cos();
        let sy = agent.pos_y + reach * heading.sin();
        substrate.sample(sx, sy).map_or(0.0, |px| px.luma())
    })
}

/// Fixed-size population, mutated in place every frame.
#[derive(Clone, Debug, Default)]
pub struct AgentPopulation {
    agents: Vec<Agent>,
}

impl AgentPopulation {
    pub fn from_agents(agents: Vec<Agent>) -> Self {
        Self { agents }
    }

    /// Place `params.agent_count` agents with random positions and headings.
    pub fn spawn<R: Rng>(size: GridSize, params: &SimulationParams, rng: &mut R) -> Self {
        let (x_range, y_range) = match params.spawn {
            SpawnRegion::CentralHalf => (central_half(size.width), central_half(size.height)),
            SpawnRegion::Full => (
                (0.0, f64::from(size.width)),
                (0.0, f64::from(size.height)),
            ),
        };
        let agents = (0..params.agent_count)
            .map(|_| {
                let x = rng.gen_range(x_range.0..x_range.1);
                let y = rng.gen_range(y_range.0..y_range.1);
                let angle = rng.gen_range(0.0..TAU);
                Agent::new(x, y, angle, params.speed)
            })
            .collect();
        Self { agents }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Sense, steer, jitter, move, reflect and deposit every agent, in order.
    ///
    /// Agents later in the list may sense deposits written earlier in the same pass.
    pub fn update<R: Rng>(
        &mut self,
        substrate: &mut FrameBuffer,
        params: &SimulationParams,
        rng: &mut R,
    ) {
        let size = substrate.size();
        let amp = params.steer_amplitude();
        let color = params.deposit_pixel();

        for agent in &mut self.agents {
            let reading = sense(agent, substrate, params);
            let mut angle = agent.angle + decide_steer(reading, params.luma_threshold).offset(amp);
            if params.max_jitter > 0.0 {
                angle += rng.gen_range(-params.max_jitter..=params.max_jitter);
            }
            agent.set_heading(angle, params.speed);

            agent.pos_x += agent.dir_x;
            agent.pos_y += agent.dir_y;
            agent.reflect_into(size);

            let (cx, cy) = agent.cell(size);
            debug_assert!(cx < size.width && cy < size.height);
            substrate.set_pixel(cx, cy, color);
        }
    }
}

fn central_half(extent: u32) -> (f64, f64) {
    let lo = f64::from(extent / 4);
    let span = f64::from((extent / 2).max(1));
    (lo, lo + span)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::pixel::Pixel;

    fn grid(w: u32, h: u32) -> GridSize {
        GridSize::new(w, h).unwrap()
    }

    fn still_params() -> SimulationParams {
        SimulationParams {
            agent_count: 1,
            speed: 1.0,
            field_of_view: 0.0,
            max_jitter: 0.0,
            ..SimulationParams::default()
        }
    }

    #[test]
    fn single_agent_moves_one_cell_and_deposits() {
        let size = grid(10, 10);
        let params = still_params();
        let mut substrate = FrameBuffer::new(size);
        let mut pop = AgentPopulation::from_agents(vec![Agent::new(5.0, 5.0, 0.0, 1.0)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        pop.update(&mut substrate, &params, &mut rng);

        let a = pop.agents()[0];
        assert!((a.pos_x - 6.0).abs() < 1e-12);
        assert!((a.pos_y - 5.0).abs() < 1e-12);
        assert_eq!(substrate.pixels()[5 * 10 + 6], Pixel::WHITE);
        assert_eq!(
            substrate.pixels().iter().filter(|&&p| p != Pixel::BLACK).count(),
            1
        );
    }

    #[test]
    fn reflect_axis_mirrors_negative_position() {
        let (pos, dir, hit) = reflect_axis(-5.0, -1.0, 100);
        assert!(hit);
        assert_eq!(pos, 5.0);
        assert_eq!(dir, 1.0);
    }

    #[test]
    fn reflect_axis_mirrors_against_last_index() {
        let (pos, dir, hit) = reflect_axis(10.0, 1.0, 10);
        assert!(hit);
        assert_eq!(pos, 8.0);
        assert_eq!(dir, -1.0);

        assert_eq!(reflect_axis(9.0, 1.0, 10), (9.0, 1.0, false));
    }

    #[test]
    fn agent_at_right_wall_bounces_back() {
        let size = grid(10, 10);
        let params = still_params();
        let mut substrate = FrameBuffer::new(size);
        let mut pop = AgentPopulation::from_agents(vec![Agent::new(9.0, 5.0, 0.0, 1.0)]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        pop.update(&mut substrate, &params, &mut rng);

        let a = pop.agents()[0];
        assert!((a.pos_x - 8.0).abs() < 1e-12);
        assert!(a.dir_x < 0.0);
        // -(0 + π) normalized into [0, 2π) is π: heading now points left.
        assert!((a.angle - PI).abs() < 1e-12);
        assert_eq!(substrate.pixel_at(8, 5), Pixel::WHITE);
    }

    #[test]
    fn y_bounce_negates_heading() {
        let size = grid(10, 10);
        let mut a = Agent::new(4.0, -2.0, -std::f64::consts::FRAC_PI_2, 1.0);
        a.reflect_into(size);
        assert_eq!(a.pos_y, 2.0);
        assert!(a.dir_y > 0.0);
        assert!((a.angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn normalize_angle_stays_below_full_turn() {
        assert_eq!(normalize_angle(-1e-18), 0.0);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(3.0 * TAU + 1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn equal_dim_readings_keep_heading() {
        assert_eq!(decide_steer([0.0, 0.0, 0.0], 0.3), Steer::Keep);
        assert_eq!(decide_steer([0.2, 0.2, 0.2], 0.3), Steer::Keep);
    }

    #[test]
    fn strictly_brightest_side_wins() {
        assert_eq!(decide_steer([5.0, 1.0, 1.0], 0.3), Steer::Left);
        assert_eq!(decide_steer([1.0, 1.0, 5.0], 0.3), Steer::Right);
        assert_eq!(decide_steer([5.0, 5.0, 1.0], 0.3), Steer::Left);
    }

    #[test]
    fn bright_center_leans_to_brighter_side() {
        assert_eq!(decide_steer([3.0, 9.0, 4.0], 0.3), Steer::Right);
        assert_eq!(decide_steer([4.0, 9.0, 3.0], 0.3), Steer::Left);
        assert_eq!(decide_steer([4.0, 9.0, 4.0], 0.3), Steer::Keep);
        assert_eq!(decide_steer([0.0, 0.2, 0.1], 0.3), Steer::Keep);
    }

    #[test]
    fn uniform_substrate_leaves_heading_unchanged() {
        let size = grid(40, 40);
        let params = SimulationParams {
            max_jitter: 0.0,
            luma_threshold: 255.0,
            ..SimulationParams::default()
        };
        let substrate = FrameBuffer::filled(size, Pixel::from_rgb(9, 9, 9));
        let agent = Agent::new(20.0, 20.0, 1.0, params.speed);
        let reading = sense(&agent, &substrate, &params);
        assert_eq!(reading[0], reading[1]);
        assert_eq!(reading[1], reading[2]);
        assert_eq!(decide_steer(reading, params.luma_threshold), Steer::Keep);
    }

    #[test]
    fn sensors_off_grid_read_zero() {
        let size = grid(10, 10);
        let params = SimulationParams::default();
        let substrate = FrameBuffer::filled(size, Pixel::WHITE);
        // Facing the left wall from x = 1, every sensor lands beyond it.
        let agent = Agent::new(1.0, 5.0, PI, params.speed);
        assert_eq!(sense(&agent, &substrate, &params), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn spawn_honors_central_half() {
        let size = grid(200, 100);
        let params = SimulationParams {
            agent_count: 500,
            ..SimulationParams::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pop = AgentPopulation::spawn(size, &params, &mut rng);
        assert_eq!(pop.len(), 500);
        for a in pop.agents() {
            assert!((50.0..150.0).contains(&a.pos_x), "{a:?}");
            assert!((25.0..75.0).contains(&a.pos_y), "{a:?}");
            assert!((a.dir_x.hypot(a.dir_y) - params.speed).abs() < 1e-9);
        }
    }

    #[test]
    fn fast_agents_never_leave_the_grid() {
        let size = grid(16, 9);
        let params = SimulationParams {
            agent_count: 64,
            speed: 40.0,
            max_jitter: 1.0,
            spawn: SpawnRegion::Full,
            ..SimulationParams::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut pop = AgentPopulation::spawn(size, &params, &mut rng);
        let mut substrate = FrameBuffer::new(size);
        for _ in 0..50 {
            pop.update(&mut substrate, &params, &mut rng);
            for a in pop.agents() {
                assert!(a.pos_x >= 0.0 && a.pos_x < f64::from(size.width), "{a:?}");
                assert!(a.pos_y >= 0.0 && a.pos_y < f64::from(size.height), "{a:?}");
                let (cx, cy) = a.cell(size);
                assert!(cx < size.width && cy < size.height);
            }
        }
    }
}
