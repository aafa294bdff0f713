//! wgpu compute implementation of the simulation.
//!
//! The substrate pair lives in two storage buffers. Each pipeline gets two bind groups, one per
//! write index, so swapping is a flip of an index exactly like [`crate::buffer::FrameBufferPair`].
//! wgpu tracks buffer usage per submission and inserts the barriers between the compute, copy and
//! map stages.

use std::sync::mpsc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wgpu::util::DeviceExt;

use crate::{
    agents::AgentPopulation,
    buffer::{FrameBuffer, GridSize},
    engine::{EngineSettings, SimulationEngine},
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
    present::SurfaceMut,
};

const DIFFUSE_WORKGROUP: u32 = 16;
const AGENT_WORKGROUP: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    width: u32,
    height: u32,
    agent_count: u32,
    frame: u32,
    speed: f32,
    steer_amplitude: f32,
    sense_distance: f32,
    max_jitter: f32,
    luma_threshold: f32,
    deposit_color: u32,
    divisor: u32,
    _pad0: u32,
    fade: [u32; 4],
    kernel: [[u32; 4]; 3],
}

/// Agent record as laid out in the storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuAgent {
    pub pos: [f32; 2],
    pub angle: f32,
    /// PCG state for this agent's jitter.
    pub seed: u32,
}

pub struct GpuEngine {
    settings: EngineSettings,
    device: wgpu::Device,
    queue: wgpu::Queue,
    substrate: [wgpu::Buffer; 2],
    agents: wgpu::Buffer,
    params: wgpu::Buffer,
    readback: wgpu::Buffer,
    agent_readback: wgpu::Buffer,
    bind_groups: [wgpu::BindGroup; 2],
    diffuse_pipeline: wgpu::ComputePipeline,
    agents_pipeline: wgpu::ComputePipeline,
    write: usize,
    frame: u32,
}

impl GpuEngine {
    pub fn new(settings: EngineSettings) -> SlimeResult<Self> {
        settings.params.validate()?;
        let size = settings.size;
        let agent_count = u32::try_from(settings.params.agent_count)
            .map_err(|_| SlimeError::gpu("agent count does not fit a dispatch"))?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                SlimeError::gpu("no gpu adapter available")
            }
            other => SlimeError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;
        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "gpu adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("slime_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| SlimeError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        let substrate_bytes = (size.pixel_count() as u64)
            .checked_mul(4)
            .ok_or_else(|| SlimeError::gpu("substrate size overflow"))?;
        let make_substrate = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: substrate_bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let substrate = [
            make_substrate("slime_substrate_0"),
            make_substrate("slime_substrate_1"),
        ];

        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let population = AgentPopulation::spawn(size, &settings.params, &mut rng);
        let initial: Vec<GpuAgent> = population
            .agents()
            .iter()
            .map(|a| GpuAgent {
                pos: [a.pos_x as f32, a.pos_y as f32],
                angle: a.angle as f32,
                seed: rng.r#gen::<u32>() | 1,
            })
            .collect();
        let agents = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("slime_agents"),
            contents: bytemuck::cast_slice(&initial),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("slime_params"),
            size: std::mem::size_of::<GpuParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("slime_readback"),
            size: substrate_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let agent_readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("slime_agent_readback"),
            size: agents.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("slime_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, false),
            ],
        });
        // bind_groups[w] writes substrate[w] and reads substrate[w ^ 1].
        let make_bind_group = |write: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("slime_bind_group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: substrate[write ^ 1].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: substrate[write].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: agents.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [make_bind_group(0), make_bind_group(1)];

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("slime_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("slime_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let make_pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let diffuse_pipeline = make_pipeline("diffuse");
        let agents_pipeline = make_pipeline("step_agents");

        let mut engine = Self {
            settings,
            device,
            queue,
            substrate,
            agents,
            params,
            readback,
            agent_readback,
            bind_groups,
            diffuse_pipeline,
            agents_pipeline,
            write: 0,
            frame: 0,
        };
        engine.write_params(agent_count);
        Ok(engine)
    }

    fn write_params(&mut self, agent_count: u32) {
        let p = &self.settings.params;
        let k = p.kernel.weights;
        let gpu = GpuParams {
            width: self.settings.size.width,
            height: self.settings.size.height,
            agent_count,
            frame: self.frame,
            speed: p.speed as f32,
            steer_amplitude: p.steer_amplitude() as f32,
            sense_distance: p.sense_distance() as f32,
            max_jitter: p.max_jitter as f32,
            luma_threshold: p.luma_threshold as f32,
            deposit_color: p.deposit_color,
            divisor: p.kernel.divisor,
            _pad0: 0,
            fade: [
                u32::from(p.fade.red),
                u32::from(p.fade.green),
                u32::from(p.fade.blue),
                0,
            ],
            kernel: k.map(|row| [row[0], row[1], row[2], 0]),
        };
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&gpu));
    }

    fn dispatch(&self, label: &str, pipeline: &wgpu::ComputePipeline, groups: (u32, u32)) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_groups[self.write], &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Copy `src` into `dst`, then map `dst` and hand its bytes to `read`.
    fn read_back<T>(
        &self,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        read: impl FnOnce(&[u8]) -> T,
    ) -> SlimeResult<T> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("slime_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, src.size());
        let submission = self.queue.submit(Some(encoder.finish()));

        let slice = dst.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: Some(self.settings.fence_timeout),
            })
            .map_err(|e| SlimeError::gpu(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| SlimeError::gpu("readback channel closed"))?
            .map_err(|e| SlimeError::gpu(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let out = read(&mapped[..]);
        drop(mapped);
        dst.unmap();
        Ok(out)
    }

    /// Current agent records, for inspection.
    pub fn read_agents(&self) -> SlimeResult<Vec<GpuAgent>> {
        self.read_back(&self.agents, &self.agent_readback, |bytes| {
            bytes
                .chunks_exact(std::mem::size_of::<GpuAgent>())
                .map(bytemuck::pod_read_unaligned::<GpuAgent>)
                .collect()
        })
    }

    /// Overwrite the read side of the substrate pair.
    pub fn upload_read_side(&mut self, fb: &FrameBuffer) -> SlimeResult<()> {
        if fb.size() != self.settings.size {
            return Err(SlimeError::validation("upload size does not match engine"));
        }
        let words: Vec<u32> = fb.pixels().iter().map(|p| p.0).collect();
        self.queue.write_buffer(
            &self.substrate[self.write ^ 1],
            0,
            bytemuck::cast_slice(&words),
        );
        Ok(())
    }
}

impl SimulationEngine for GpuEngine {
    fn size(&self) -> GridSize {
        self.settings.size
    }

    fn swap_buffers(&mut self) {
        self.write ^= 1;
    }

    fn diffuse(&mut self) -> SlimeResult<()> {
        let agent_count = self.settings.params.agent_count as u32;
        self.frame = self.frame.wrapping_add(1);
        self.write_params(agent_count);
        let size = self.settings.size;
        self.dispatch(
            "slime_diffuse",
            &self.diffuse_pipeline,
            (
                size.width.div_ceil(DIFFUSE_WORKGROUP),
                size.height.div_ceil(DIFFUSE_WORKGROUP),
            ),
        );
        Ok(())
    }

    fn move_agents(&mut self) -> SlimeResult<()> {
        let groups = (self.settings.params.agent_count as u32).div_ceil(AGENT_WORKGROUP);
        self.dispatch("slime_step_agents", &self.agents_pipeline, (groups, 1));
        Ok(())
    }

    fn publish(&mut self, target: &mut SurfaceMut<'_>) -> SlimeResult<()> {
        let size = self.settings.size;
        if target.size() != size {
            return Err(SlimeError::validation("publish target size does not match engine"));
        }
        let w = size.width as usize;
        self.read_back(&self.substrate[self.write], &self.readback, |bytes| {
            for (y, row) in bytes.chunks_exact(w * 4).enumerate() {
                let dst = target.row_mut(y as u32);
                for (px, word) in dst.iter_mut().zip(row.chunks_exact(4)) {
                    *px = Pixel(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
                }
            }
        })
    }

    fn teardown(&mut self) -> SlimeResult<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(self.settings.fence_timeout),
            })
            .map_err(|e| SlimeError::gpu(format!("wgpu drain on teardown failed: {e:?}")))?;
        tracing::info!(frames = self.frame, "gpu engine released");
        Ok(())
    }
}

const SHADER: &str = r#"
struct Params {
  width: u32,
  height: u32,
  agent_count: u32,
  frame: u32,
  speed: f32,
  steer_amplitude: f32,
  sense_distance: f32,
  max_jitter: f32,
  luma_threshold: f32,
  deposit_color: u32,
  divisor: u32,
  _pad0: u32,
  fade: vec4<u32>,
  kernel: array<vec4<u32>, 3>,
};

struct Agent {
  pos: vec2<f32>,
  angle: f32,
  seed: u32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> src: array<u32>;
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;
@group(0) @binding(3) var<storage, read_write> agents: array<Agent>;

const PI: f32 = 3.14159265358979;
const TAU: f32 = 6.28318530717959;

fn channels(px: u32) -> vec3<u32> {
  return vec3<u32>((px >> 16u) & 0xffu, (px >> 8u) & 0xffu, px & 0xffu);
}

fn src_clamped(x: i32, y: i32) -> u32 {
  let cx = clamp(x, 0, i32(params.width) - 1);
  let cy = clamp(y, 0, i32(params.height) - 1);
  return src[u32(cy) * params.width + u32(cx)];
}

@compute @workgroup_size(16, 16)
fn diffuse(@builtin(global_invocation_id) id: vec3<u32>) {
  if (id.x >= params.width || id.y >= params.height) {
    return;
  }
  var acc = vec3<u32>(0u);
  for (var dy = -1; dy <= 1; dy++) {
    for (var dx = -1; dx <= 1; dx++) {
      let w = params.kernel[dy + 1][dx + 1];
      acc += w * channels(src_clamped(i32(id.x) + dx, i32(id.y) + dy));
    }
  }
  let blurred = min(acc / params.divisor, vec3<u32>(255u));
  let faded = blurred - min(blurred, params.fade.xyz);
  dst[id.y * params.width + id.x] = (faded.x << 16u) | (faded.y << 8u) | faded.z;
}

fn pcg(state: u32) -> u32 {
  let s = state * 747796405u + 2891336453u;
  let word = ((s >> ((s >> 28u) + 4u)) ^ s) * 277803737u;
  return (word >> 22u) ^ word;
}

fn luma_at(p: vec2<f32>) -> f32 {
  if (p.x < 0.0 || p.y < 0.0 || p.x >= f32(params.width) || p.y >= f32(params.height)) {
    return 0.0;
  }
  let c = vec3<f32>(channels(dst[u32(p.y) * params.width + u32(p.x)]));
  return 0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z;
}

fn heading(angle: f32) -> vec2<f32> {
  return vec2<f32>(cos(angle), sin(angle));
}

@compute @workgroup_size(64)
fn step_agents(@builtin(global_invocation_id) id: vec3<u32>) {
  let i = id.x;
  if (i >= params.agent_count) {
    return;
  }
  var a = agents[i];
  let amp = params.steer_amplitude;
  let l = luma_at(a.pos + params.sense_distance * heading(a.angle - amp));
  let c = luma_at(a.pos + params.sense_distance * heading(a.angle));
  let r = luma_at(a.pos + params.sense_distance * heading(a.angle + amp));

  var angle = a.angle;
  if (l > c && l > r) {
    angle -= amp;
  } else if (r > c && r > l) {
    angle += amp;
  } else if (c > params.luma_threshold) {
    if (l > r) {
      angle -= amp;
    } else if (r > l) {
      angle += amp;
    }
  }
  if (params.max_jitter > 0.0) {
    a.seed = pcg(a.seed ^ params.frame);
    let u = f32(a.seed) / 4294967295.0;
    angle += (u * 2.0 - 1.0) * params.max_jitter;
  }

  var pos = a.pos + params.speed * heading(angle);
  let hi = vec2<f32>(f32(params.width - 1u), f32(params.height - 1u));
  if (pos.x < 0.0) {
    pos.x = abs(pos.x);
    angle = -(angle + PI);
  } else if (pos.x > hi.x) {
    pos.x = hi.x - abs(hi.x - pos.x);
    angle = -(angle + PI);
  }
  if (pos.y < 0.0) {
    pos.y = abs(pos.y);
    angle = -angle;
  } else if (pos.y > hi.y) {
    pos.y = hi.y - abs(hi.y - pos.y);
    angle = -angle;
  }
  pos = clamp(pos, vec2<f32>(0.0), hi);
  a.pos = pos;
  a.angle = angle - TAU * floor(angle / TAU);
  agents[i] = a;

  let cell = min(vec2<u32>(pos), vec2<u32>(params.width - 1u, params.height - 1u));
  dst[cell.y * params.width + cell.x] = params.deposit_color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_block_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<GpuParams>(), 112);
        assert_eq!(std::mem::size_of::<GpuAgent>(), 16);
    }
}
