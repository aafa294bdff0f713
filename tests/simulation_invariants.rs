use slime::{
    AgentPopulation, CpuEngine, EngineSettings, FadeAmount, FrameBuffer, GridSize, Kernel3x3,
    Pixel, SimulationEngine, SimulationParams, SpawnRegion, blur_at, diffuse_and_fade,
};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn step(engine: &mut CpuEngine) {
    engine.swap_buffers();
    engine.diffuse().unwrap();
    engine.move_agents().unwrap();
}

#[test]
fn agents_stay_in_bounds_across_seeds_and_shapes() {
    let shapes = [(2, 2), (3, 17), (64, 48), (101, 7)];
    for (i, &(w, h)) in shapes.iter().enumerate() {
        let size = GridSize::new(w, h).unwrap();
        let params = SimulationParams {
            agent_count: 200,
            speed: 1.0 + i as f64 * 3.5,
            max_jitter: 0.6,
            spawn: SpawnRegion::Full,
            ..SimulationParams::default()
        };
        for seed in 0..4 {
            let mut engine = CpuEngine::new(EngineSettings::new(size, params.clone(), seed));
            for _ in 0..60 {
                step(&mut engine);
                for a in engine.state().population.agents() {
                    assert!(
                        a.pos_x >= 0.0 && a.pos_x < f64::from(w),
                        "{w}x{h} seed {seed}: {a:?}"
                    );
                    assert!(
                        a.pos_y >= 0.0 && a.pos_y < f64::from(h),
                        "{w}x{h} seed {seed}: {a:?}"
                    );
                    assert!(a.angle >= 0.0 && a.angle < std::f64::consts::TAU);
                }
            }
            assert_eq!(engine.state().population.len(), 200);
        }
    }
}

#[test]
fn different_seeds_diverge() {
    let size = GridSize::new(48, 48).unwrap();
    let mut a = CpuEngine::new(EngineSettings::new(size, SimulationParams::default(), 1));
    let mut b = CpuEngine::new(EngineSettings::new(size, SimulationParams::default(), 2));
    for _ in 0..3 {
        step(&mut a);
        step(&mut b);
    }
    assert_ne!(a.substrate(), b.substrate());
}

#[test]
fn fade_never_exceeds_blur_on_random_images() {
    let size = GridSize::new(23, 11).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut src = FrameBuffer::new(size);
    for p in src.pixels_mut() {
        *p = Pixel(rand::Rng::r#gen::<u32>(&mut rng) & 0x00FF_FFFF);
    }
    let fade = FadeAmount {
        red: 30,
        green: 1,
        blue: 200,
    };
    let mut dst = FrameBuffer::new(size);
    diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, fade).unwrap();

    for y in 0..size.height {
        for x in 0..size.width {
            let b = blur_at(&src, i64::from(x), i64::from(y), &Kernel3x3::BINOMIAL);
            let out = dst.pixel_at(x, y);
            assert_eq!(out.red(), b.red().saturating_sub(30));
            assert_eq!(out.green(), b.green().saturating_sub(1));
            assert_eq!(out.blue(), b.blue().saturating_sub(200));
        }
    }
}

#[test]
fn uniform_substrate_is_stable_without_fade() {
    let size = GridSize::new(9, 5).unwrap();
    let px = Pixel::from_rgb(17, 200, 3);
    let mut buf = FrameBuffer::filled(size, px);
    let mut out = FrameBuffer::new(size);
    let no_fade = FadeAmount {
        red: 0,
        green: 0,
        blue: 0,
    };
    for _ in 0..10 {
        diffuse_and_fade(&buf, &mut out, &Kernel3x3::BINOMIAL, no_fade).unwrap();
        std::mem::swap(&mut buf, &mut out);
    }
    assert!(buf.pixels().iter().all(|&p| p == px));
}

#[test]
fn trails_decay_to_black_once_agents_are_gone() {
    let size = GridSize::new(12, 12).unwrap();
    let params = SimulationParams::default();
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let mut substrate = FrameBuffer::new(size);
    let mut pop = AgentPopulation::spawn(size, &params, &mut rng);
    pop.update(&mut substrate, &params, &mut rng);
    assert!(substrate.pixels().iter().any(|&p| p != Pixel::BLACK));

    let mut next = FrameBuffer::new(size);
    for _ in 0..300 {
        diffuse_and_fade(&substrate, &mut next, &params.kernel, params.fade).unwrap();
        std::mem::swap(&mut substrate, &mut next);
    }
    assert!(substrate.pixels().iter().all(|&p| p == Pixel::BLACK));
}
