//! GPU compute backend using wgpu for large batched affine steps.
//!
//! Every element of a lowered batch is independent, so one invocation per
//! element evaluates `a·p + b·x + c` in f32 on the device.
//!
//! Enable with the `gpu` feature flag.

use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use wgpu::util::DeviceExt;

thread_local! {
    static GPU_CTX: std::cell::OnceCell<Option<GpuContext>> = const { std::cell::OnceCell::new() };
}

/// Access the shared GPU context (lazily initialized).
///
/// The context is cached per-thread for simplicity.
pub fn with_gpu_context<T>(max_elements: usize, f: impl FnOnce(Option<&GpuContext>) -> T) -> T {
    GPU_CTX.with(|cell| {
        let ctx = cell.get_or_init(|| {
            let ctx = GpuContext::new(max_elements);
            tracing::debug!(available = ctx.is_some(), "gpu context initialized");
            ctx
        });
        f(ctx.as_ref())
    })
}

/// Returns true if a GPU context can be created.
///
/// Note: this may initialize the GPU context and can be expensive.
pub fn gpu_available(max_elements: usize) -> bool {
    with_gpu_context(max_elements, |ctx| ctx.is_some())
}

/// Coefficients and previous value of one element (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuAffineRow {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub p: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GpuParams {
    count: u32,
    _padding: [u32; 3],
}

/// Error type for GPU operations.
#[derive(Debug)]
pub enum GpuError {
    /// Failed to receive result from GPU.
    ReceiveError,
    /// GPU buffer mapping failed.
    MapError(wgpu::BufferAsyncError),
    /// Batch exceeds the context's capacity.
    SizeExceeded { requested: usize, max: usize },
    /// Row and input counts differ.
    ShapeMismatch { rows: usize, inputs: usize },
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::ReceiveError => write!(f, "Failed to receive GPU result"),
            GpuError::MapError(e) => write!(f, "GPU buffer mapping failed: {:?}", e),
            GpuError::SizeExceeded { requested, max } => {
                write!(f, "Requested {} elements exceeds max {}", requested, max)
            }
            GpuError::ShapeMismatch { rows, inputs } => {
                write!(f, "{} affine rows but {} inputs", rows, inputs)
            }
        }
    }
}

impl std::error::Error for GpuError {}

/// GPU compute context for batched affine steps.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    max_elements: usize,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuContext {
    /// Create a new GPU context. Blocks until GPU is ready.
    pub fn new(max_elements: usize) -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("integra GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .ok()?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Affine Step Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(AFFINE_SHADER)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Affine Bind Group Layout"),
            entries: &[
                // Rows (read-only)
                storage_entry(0, true),
                // Inputs (read-only)
                storage_entry(1, true),
                // Output (read-write)
                storage_entry(2, false),
                // Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Affine Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Affine Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Some(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            max_elements,
        })
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Evaluates `a·p + b·x + c` for every row.
    ///
    /// # Errors
    /// Returns `GpuError` if the operation fails or size exceeds limits.
    pub fn evaluate_affine(&self, rows: &[GpuAffineRow], inputs: &[f32]) -> Result<Vec<f32>, GpuError> {
        let n = rows.len();
        if n != inputs.len() {
            return Err(GpuError::ShapeMismatch {
                rows: n,
                inputs: inputs.len(),
            });
        }
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > self.max_elements {
            return Err(GpuError::SizeExceeded {
                requested: n,
                max: self.max_elements,
            });
        }

        let rows_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Rows Buffer"),
            contents: bytemuck::cast_slice(rows),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let inputs_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Inputs Buffer"),
            contents: bytemuck::cast_slice(inputs),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let out_size = std::mem::size_of_val(inputs) as u64;
        let out_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = GpuParams {
            count: n as u32,
            _padding: [0; 3],
        };
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // Staging buffer for readback
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: out_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Affine Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: rows_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: inputs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Affine Encoder"),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Affine Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // 64 threads per group
            pass.dispatch_workgroups(n.div_ceil(64) as u32, 1, 1);
        }

        encoder.copy_buffer_to_buffer(&out_buffer, 0, &staging_buffer, 0, out_size);

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        let map_result = rx.recv().map_err(|_| GpuError::ReceiveError)?;
        map_result.map_err(GpuError::MapError)?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();
        Ok(result)
    }
}

/// WGSL compute shader for the lowered affine step.
const AFFINE_SHADER: &str = r#"
struct Row {
    a: f32,
    b: f32,
    c: f32,
    p: f32,
}

struct Params {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<storage, read> rows: array<Row>;
@group(0) @binding(1) var<storage, read> inputs: array<f32>;
@group(0) @binding(2) var<storage, read_write> results: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.count {
        return;
    }

    let r = rows[i];
    results[i] = r.a * r.p + r.b * inputs[i] + r.c;
}
"#;
