use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::window::{Window, WindowId};

use super::{
    ClearOps, DrawCall, Extent, FrameStatus, PassDesc, PassTarget, ProgramDesc, ProgramOutput,
    RenderBackend, TextureSlot, Viewport,
};
use crate::error::{EngineError, EngineResult};
use crate::mesh::Vertex;
use crate::texture::ImageData;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Uint32x4,
    4 => Float32x4,
];

/// Format of every sampleable depth target, including the shadow map.
const DEPTH_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// [`RenderBackend`] drawing into a winit window through wgpu.
pub struct WgpuBackend {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: Extent,
    depth: DepthBuffer,
    linear_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    fallback_texture: WgpuTexture,
    fallback_depth: WgpuDepthTarget,
    frame: Option<Frame>,
    pass: Option<PendingPass>,
}

pub struct WgpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    slots: Vec<TextureSlot>,
}

pub struct WgpuGeometry {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

pub struct WgpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct WgpuDepthTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Frame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

enum PendingTarget {
    Screen,
    Depth(wgpu::TextureView),
}

/// Pass recorded between `begin_pass` and `end_pass`. The wgpu pass itself
/// is only encoded once every draw is known.
struct PendingPass {
    label: String,
    target: PendingTarget,
    viewport: Viewport,
    clear: ClearOps,
    draws: Vec<PendingDraw>,
}

struct PendingDraw {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl WgpuBackend {
    /// Initializes the GPU for the provided window.
    pub async fn new(window: Arc<Window>) -> EngineResult<Self> {
        let inner = window.inner_size();
        let size = Extent::new(inner.width, inner.height);
        if size.is_empty() {
            return Err(EngineError::GpuInit("window has zero area".into()));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| EngineError::GpuInit(format!("failed to create surface: {err}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| EngineError::GpuInit(format!("failed to acquire GPU adapter: {err}")))?;
        info!("using adapter {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("curse-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: Default::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|err| EngineError::GpuInit(format!("failed to create GPU device: {err}")))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| EngineError::GpuInit("surface reports no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let depth = DepthBuffer::create(&device, size);

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("diffuse-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let (texture, view) =
            upload_rgba(&device, &queue, "fallback-white", &ImageData::solid([255; 4]));
        let fallback_texture = WgpuTexture {
            _texture: texture,
            view,
        };
        // Never written; only bound where a program declares a depth slot
        // that the draw leaves empty.
        let (texture, view) = create_depth_texture(&device, "fallback-depth", Extent::new(1, 1));
        let fallback_depth = WgpuDepthTarget {
            _texture: texture,
            view,
        };

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            depth,
            linear_sampler,
            shadow_sampler,
            fallback_texture,
            fallback_depth,
            frame: None,
            pass: None,
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn bind_group_layout(&self, desc: &ProgramDesc<'_>) -> wgpu::BindGroupLayout {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(desc.uniform_size as u64),
            },
            count: None,
        }];
        for slot in desc.slots {
            match slot {
                TextureSlot::Diffuse => {
                    entries.push(texture_entry(1, wgpu::TextureSampleType::Float { filterable: true }));
                    entries.push(sampler_entry(2, wgpu::SamplerBindingType::Filtering));
                }
                TextureSlot::ShadowMap => {
                    entries.push(texture_entry(3, wgpu::TextureSampleType::Depth));
                    entries.push(sampler_entry(4, wgpu::SamplerBindingType::Comparison));
                }
                TextureSlot::DepthView => {
                    entries.push(texture_entry(5, wgpu::TextureSampleType::Depth));
                }
            }
        }
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}-bind-layout", desc.label)),
                entries: &entries,
            })
    }

    fn finish_pass(&mut self, pass: PendingPass) {
        let Some(frame) = self.frame.as_mut() else {
            debug!("dropping pass {} outside of a frame", pass.label);
            return;
        };

        let load_depth = match pass.clear.depth {
            Some(depth) => wgpu::LoadOp::Clear(depth),
            None => wgpu::LoadOp::Load,
        };
        let depth_view = match &pass.target {
            PendingTarget::Screen => &self.depth.view,
            PendingTarget::Depth(view) => view,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> =
            match &pass.target {
                PendingTarget::Screen => vec![Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match pass.clear.color {
                            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })],
                PendingTarget::Depth(_) => Vec::new(),
            };

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: load_depth,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let viewport = pass.viewport;
        render_pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        for draw in &pass.draws {
            render_pass.set_pipeline(&draw.pipeline);
            render_pass.set_bind_group(0, &draw.bind_group, &[]);
            render_pass.set_vertex_buffer(0, draw.vertex.slice(..));
            render_pass.set_index_buffer(draw.index.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..draw.index_count, 0, 0..1);
        }
    }
}

impl RenderBackend for WgpuBackend {
    type Program = WgpuProgram;
    type Geometry = WgpuGeometry;
    type Texture = WgpuTexture;
    type DepthTarget = WgpuDepthTarget;

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<WgpuProgram> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });
        let layout = self.bind_group_layout(desc);
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{}-pipeline-layout", desc.label)),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let color_targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let fragment = desc.output.writes_color().then(|| wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &color_targets,
        });
        let depth_stencil = match desc.output {
            ProgramOutput::Color => wgpu::DepthStencilState {
                format: DepthBuffer::FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            },
            ProgramOutput::DepthOnly => wgpu::DepthStencilState {
                format: DEPTH_TARGET_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            },
            ProgramOutput::Overlay => wgpu::DepthStencilState {
                format: DepthBuffer::FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: Default::default(),
                bias: Default::default(),
            },
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRIBUTES,
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil: Some(depth_stencil),
                multisample: wgpu::MultisampleState::default(),
                fragment,
                multiview: None,
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EngineError::ShaderCompile {
                label: desc.label.to_string(),
                message: err.to_string(),
            });
        }
        debug!("compiled program {}", desc.label);

        Ok(WgpuProgram {
            label: desc.label.to_string(),
            pipeline,
            layout,
            slots: desc.slots.to_vec(),
        })
    }

    fn upload_geometry(&mut self, label: &str, vertices: &[Vertex], indices: &[u32]) -> WgpuGeometry {
        let vertex = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}-vertices")),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}-indices")),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        WgpuGeometry {
            vertex,
            index,
            index_count: indices.len() as u32,
        }
    }

    fn create_texture(&mut self, label: &str, image: &ImageData) -> WgpuTexture {
        let (texture, view) = upload_rgba(&self.device, &self.queue, label, image);
        WgpuTexture {
            _texture: texture,
            view,
        }
    }

    fn create_depth_target(&mut self, label: &str, extent: Extent) -> WgpuDepthTarget {
        let (texture, view) = create_depth_texture(&self.device, label, extent);
        WgpuDepthTarget {
            _texture: texture,
            view,
        }
    }

    fn surface_size(&self) -> Extent {
        self.size
    }

    fn resize(&mut self, size: Extent) {
        if size.is_empty() {
            return;
        }
        self.size = size;
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth = DepthBuffer::create(&self.device, size);
    }

    fn begin_frame(&mut self) -> Result<FrameStatus> {
        if self.size.is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(FrameStatus::Skipped);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(anyhow!("GPU is out of memory"));
            }
            Err(err) => {
                warn!("skipping frame: {err}");
                return Ok(FrameStatus::Skipped);
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });
        self.frame = Some(Frame {
            output,
            view,
            encoder,
        });
        Ok(FrameStatus::Ready)
    }

    fn begin_pass(&mut self, pass: PassDesc<'_, Self>) {
        if let Some(open) = self.pass.take() {
            warn!("pass {} was not ended before {}", open.label, pass.label);
            self.finish_pass(open);
        }
        let target = match pass.target {
            PassTarget::Screen => PendingTarget::Screen,
            PassTarget::Depth(depth) => PendingTarget::Depth(depth.view.clone()),
        };
        self.pass = Some(PendingPass {
            label: pass.label.to_string(),
            target,
            viewport: pass.viewport,
            clear: pass.clear,
            draws: Vec::new(),
        });
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) {
        if self.pass.is_none() {
            warn!("draw with {} outside of a pass", call.program.label);
            return;
        }

        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{}-uniforms", call.program.label)),
                contents: call.uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let diffuse = call
            .textures
            .diffuse
            .map(|texture| &texture.view)
            .unwrap_or(&self.fallback_texture.view);
        let depth = call
            .textures
            .depth
            .map(|target| &target.view)
            .unwrap_or(&self.fallback_depth.view);

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }];
        for slot in &call.program.slots {
            match slot {
                TextureSlot::Diffuse => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(diffuse),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                    });
                }
                TextureSlot::ShadowMap => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(depth),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                    });
                }
                TextureSlot::DepthView => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(depth),
                    });
                }
            }
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-bind-group", call.program.label)),
            layout: &call.program.layout,
            entries: &entries,
        });

        if let Some(pass) = self.pass.as_mut() {
            pass.draws.push(PendingDraw {
                pipeline: call.program.pipeline.clone(),
                bind_group,
                vertex: call.geometry.vertex.clone(),
                index: call.geometry.index.clone(),
                index_count: call.geometry.index_count,
            });
        }
    }

    fn end_pass(&mut self) {
        match self.pass.take() {
            Some(pass) => self.finish_pass(pass),
            None => warn!("end_pass without an open pass"),
        }
    }

    fn present(&mut self) {
        if let Some(open) = self.pass.take() {
            self.finish_pass(open);
        }
        let Some(frame) = self.frame.take() else {
            return;
        };
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        self.window.pre_present_notify();
        frame.output.present();
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32, ty: wgpu::SamplerBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(ty),
        count: None,
    }
}

fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &ImageData,
) -> (wgpu::Texture, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width: image.width.max(1),
        height: image.height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    if !image.pixels.is_empty() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            size,
        );
    }
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_depth_texture(
    device: &wgpu::Device,
    label: &str,
    extent: Extent,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        aspect: wgpu::TextureAspect::DepthOnly,
        ..Default::default()
    });
    (texture, view)
}

/// Depth buffer paired with the window surface.
struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

    fn create(device: &wgpu::Device, size: Extent) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen-depth"),
            size: wgpu::Extent3d {
                width: size.width.max(1),
                height: size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}
