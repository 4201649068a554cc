// Route viewer: ribbons extruded from the route network, travelers drawn
// as INSTANCED boxes (one draw call for all of them)
//
// Usage: trackway [route.ron]
// Without an argument a two-path demo network joined by one junction is built.
//
// Keys: F3 overlay | P pause | N single step | +/- time scale |
//       R toggle sample spacing | F5 save route | A/D orbit | Space auto-orbit

use std::cell::Cell;
use std::rc::Rc;

use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use wgpu::util::DeviceExt;
use winit::{
    event::{ElementState, Event as WinitEvent, KeyEvent, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use trackway::engine::camera::OrbitCamera;
use trackway::engine::debug_overlay::{DebugOverlay, DebugStats, NodeMarker};
use trackway::engine::*;

const SAVE_PATH: &str = "trackway_route.ron";
const TRAVELER_COUNT: usize = 60;

// ============================================================================
// VERTEX DEFINITION (traveler box)
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BoxVertex {
    position: Vec3,
    normal:   Vec3,
}

impl BoxVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<BoxVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<Vec3>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Box elongated along +Z so the travel direction is visible.
/// Four vertices per face so every face gets a flat normal.
fn traveler_box(half: Vec3) -> (Vec<BoxVertex>, Vec<u16>) {
    // (normal, u, v) with u × v = normal, so corners wind CCW from outside
    let faces = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let corner = (normal + u * su + v * sv) * half;
            vertices.push(BoxVertex { position: corner, normal });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

// ============================================================================
// INSTANCE DATA (per-traveler)
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct InstanceData {
    position: Vec3,
    _padding: f32,  // Align to 16 bytes
    rotation: Quat,
    color:    [f32; 4],
}

impl InstanceData {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // Position (location 2)
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Rotation quaternion (location 3)
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // Color (location 4)
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

// ============================================================================
// UNIFORM DATA (camera + light)
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    view_proj: Mat4,
    light_dir: Vec4,
}

// ============================================================================
// ROUTE SETUP
// ============================================================================

/// Flat main road with a thick branch leaving from its second control point.
fn demo_network() -> Result<RouteNetwork, NetworkError> {
    let mut network = RouteNetwork::new();

    let mut main = PathGeometry::new(
        vec![
            ControlPoint::new(0, Vec3::new(-14.0, 0.0, -6.0), Vec3::new(4.0, 0.0, 0.0)),
            ControlPoint::new(1, Vec3::new(-4.0, 0.0, -6.0), Vec3::new(-3.0, 0.0, 0.0)),
            ControlPoint::new(2, Vec3::new(6.0, 0.0, -2.0), Vec3::new(-3.0, 0.0, -2.0)),
            ControlPoint::new(3, Vec3::new(14.0, 0.0, 6.0), Vec3::new(-4.0, 0.0, 0.0)),
        ],
        SamplingConfig::new(0.25, 0.02),
    );
    main.set_build_on_awake(true);

    let mut branch = PathGeometry::new(
        vec![
            ControlPoint::new(0, Vec3::ZERO, Vec3::new(0.0, 0.0, 3.0)),
            ControlPoint::new(1, Vec3::new(2.0, 0.0, 10.0), Vec3::new(-2.0, 0.0, -3.0)),
            ControlPoint::new(2, Vec3::new(-10.0, 0.0, 12.0), Vec3::new(4.0, 0.0, 0.0)),
        ],
        SamplingConfig::new(0.25, 0.02),
    );
    branch.set_build_on_awake(true);

    let main = network.add_path(main)?;
    let branch = network.add_path(branch)?;
    network.attach_ribbon(main, RibbonSettings::flat(0.6))?;
    network.attach_ribbon(branch, RibbonSettings::new(0.5, 0.3))?;

    let junction = network.add_node(Vec3::ZERO);
    network.connect(junction, main, 1)?;
    network.connect(junction, branch, 0)?;

    Ok(network)
}

fn load_network(path: &str) -> Result<RouteNetwork, DocumentError> {
    let network = RouteDocument::load_from_file(path)?.load()?;
    log::info!("loaded route from {}", path);
    Ok(network)
}

fn spawn_travelers(world: &mut World, network: &RouteNetwork, count: usize) {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    let routes: Vec<(PathId, &PathGeometry)> =
        network.paths().filter(|(_, path)| path.samples().len() >= 2).collect();
    if routes.is_empty() {
        log::warn!("no built paths, spawning no travelers");
        return;
    }

    for i in 0..count {
        let (id, path) = routes[i % routes.len()];
        let direction = if rng.gen_bool(0.5) { TravelDirection::Forward } else { TravelDirection::Reversed };
        let mut traveler = Traveler::new(id, rng.gen_range(1.5..4.0))
            .with_direction(direction)
            .with_offset(Vec3::new(0.0, 0.45, 0.0));
        traveler.set_percentage(path, rng.gen_range(0.0..1.0));

        let transform = traveler
            .pose(path)
            .map(|pose| Transform { position: pose.position, rotation: pose.rotation })
            .unwrap_or_default();
        let bundle = (traveler, transform, TravelerColor::random());
        if i % 2 == 0 {
            world.spawn((bundle, BranchAtJunctions));
        } else {
            world.spawn(bundle);
        }
    }

    log::info!("spawned {} travelers on {} path(s)", count, routes.len());
}

/// Running totals fed by event subscribers.
#[derive(Default, Clone)]
struct EventCounters {
    crossed:  Rc<Cell<u64>>,
    switched: Rc<Cell<u64>>,
    ended:    Rc<Cell<u64>>,
    rebuilt:  Rc<Cell<u64>>,
}

impl EventCounters {
    fn subscribe(&self, events: &mut EventDispatcher) {
        let (crossed, switched) = (self.crossed.clone(), self.switched.clone());
        events.subscribe::<JunctionCrossed>(move |event| {
            crossed.set(crossed.get() + 1);
            if event.switched_to.is_some() {
                switched.set(switched.get() + 1);
            }
            Ok(())
        });

        let ended = self.ended.clone();
        events.subscribe::<ReachedEnd>(move |event| {
            ended.set(ended.get() + 1);
            log::trace!("{:?} reached the end of {:?} going {:?}", event.entity, event.path, event.direction);
            Ok(())
        });

        let rebuilt = self.rebuilt.clone();
        events.subscribe::<PathRebuilt>(move |event| {
            rebuilt.set(rebuilt.get() + 1);
            log::debug!("path {:?} rebuilt: {} samples, length {:.2}", event.path, event.samples.len(), event.length);
            Ok(())
        });
    }
}

// ============================================================================
// GPU RIBBONS
// ============================================================================

struct GpuRibbon {
    path:          PathId,
    revision:      u64,
    vertex_buffer: wgpu::Buffer,
    index_buffer:  wgpu::Buffer,
    index_count:   u32,
    vertex_count:  usize,
}

fn upload_ribbon(device: &wgpu::Device, path: PathId, revision: u64, mesh: &RenderMesh) -> GpuRibbon {
    let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Ribbon Vertex Buffer"),
        contents: mesh.vertex_bytes(),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Ribbon Index Buffer"),
        contents: mesh.index_bytes(),
        usage: wgpu::BufferUsages::INDEX,
    });
    GpuRibbon {
        path,
        revision,
        vertex_buffer,
        index_buffer,
        index_count: mesh.index_count() as u32,
        vertex_count: mesh.vertices.len(),
    }
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width.max(1),
            height: config.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    buffers: &[wgpu::VertexBufferLayout],
    format: wgpu::TextureFormat,
    cull_mode: Option<wgpu::Face>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

struct State {
    window: std::sync::Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: winit::dpi::PhysicalSize<u32>,
    depth_view: wgpu::TextureView,

    ribbon_pipeline: wgpu::RenderPipeline,
    traveler_pipeline: wgpu::RenderPipeline,
    box_vertex_buffer: wgpu::Buffer,
    box_index_buffer: wgpu::Buffer,
    box_index_count: u32,
    instance_buffer: wgpu::Buffer,
    max_instances: usize,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    ribbons: Vec<GpuRibbon>,

    // Simulation
    world: World,
    network: RouteNetwork,
    clock: FollowerClock,
    counters: EventCounters,
    coarse_sampling: bool,
    last_update: std::time::Instant,

    camera: OrbitCamera,
    overlay: DebugOverlay,
    stats: DebugStats,
    frame_times: Vec<f32>,
    last_stats_update: std::time::Instant,
}

impl State {
    async fn new(window: std::sync::Arc<Window>, mut network: RouteNetwork) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone()).unwrap();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("no suitable GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .expect("failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Buffer"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("uniform_bind_group_layout"),
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("uniform_bind_group"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&uniform_bind_group_layout],
            push_constant_ranges: &[],
        });

        let ribbon_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ribbon Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("ribbon.wgsl").into()),
        });
        let traveler_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Traveler Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("traveler_instanced.wgsl").into()),
        });

        // Flat ribbons are seen from both sides
        let ribbon_pipeline = create_pipeline(
            &device,
            "Ribbon Pipeline",
            &pipeline_layout,
            &ribbon_shader,
            &[RibbonVertex::desc()],
            config.format,
            None,
        );
        let traveler_pipeline = create_pipeline(
            &device,
            "Traveler Pipeline",
            &pipeline_layout,
            &traveler_shader,
            &[BoxVertex::desc(), InstanceData::desc()],
            config.format,
            Some(wgpu::Face::Back),
        );

        let (box_vertices, box_indices) = traveler_box(Vec3::new(0.2, 0.2, 0.4));
        let box_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Box Vertex Buffer"),
            contents: bytemuck::cast_slice(&box_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let box_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Box Index Buffer"),
            contents: bytemuck::cast_slice(&box_indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let max_instances = 4096;
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Instance Buffer"),
            size: (max_instances * std::mem::size_of::<InstanceData>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let counters = EventCounters::default();
        counters.subscribe(network.events_mut());
        if !network.is_initialized() {
            if let Err(err) = network.initialize() {
                log::warn!("route initialization failed: {}", err);
            }
        }

        let mut world = World::new();
        spawn_travelers(&mut world, &network, TRAVELER_COUNT);

        let overlay = DebugOverlay::new(&window, &device, config.format);

        let mut state = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            depth_view,
            ribbon_pipeline,
            traveler_pipeline,
            box_vertex_buffer,
            box_index_buffer,
            box_index_count: box_indices.len() as u32,
            instance_buffer,
            max_instances,
            uniform_buffer,
            uniform_bind_group,
            ribbons: Vec::new(),
            world,
            network,
            clock: FollowerClock::new(),
            counters,
            coarse_sampling: false,
            last_update: std::time::Instant::now(),
            camera: OrbitCamera::new(Vec3::new(0.0, 0.0, 2.0), 34.0),
            overlay,
            stats: DebugStats {
                fps: 0,
                frame_time_avg_ms: 0.0,
                frame_time_min_ms: 0.0,
                frame_time_max_ms: 0.0,
                traveler_count: 0,
                following_count: 0,
                path_count: 0,
                node_count: 0,
                ribbon_vertices: 0,
                draw_calls: 0,
                resolution: (size.width, size.height),
                time_scale: 1.0,
                clock_enabled: true,
                junctions_crossed: 0,
                branch_switches: 0,
                ends_reached: 0,
                path_rebuilds: 0,
            },
            frame_times: Vec::with_capacity(256),
            last_stats_update: std::time::Instant::now(),
        };
        state.sync_ribbons();
        state
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_view = create_depth_view(&self.device, &self.config);
        }
    }

    /// Returns true when the key was one of ours.
    fn handle_key(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::F3 => self.overlay.toggle(),
            KeyCode::KeyP => {
                let enabled = !self.clock.enabled;
                self.clock.set_enabled(enabled);
            }
            KeyCode::KeyN => {
                let report = self.clock.update_immediately(&mut self.world, &mut self.network);
                log::info!("single step: {:?}", report);
            }
            KeyCode::Equal | KeyCode::NumpadAdd => {
                self.clock.set_time_scale(self.clock.time_scale() * 1.5);
            }
            KeyCode::Minus | KeyCode::NumpadSubtract => {
                self.clock.set_time_scale(self.clock.time_scale() / 1.5);
            }
            KeyCode::KeyR => self.toggle_sampling(),
            KeyCode::F5 => self.save_route(),
            _ => return false,
        }
        true
    }

    fn toggle_sampling(&mut self) {
        self.coarse_sampling = !self.coarse_sampling;
        let spacing = if self.coarse_sampling { 1.0 } else { 0.25 };
        let ids: Vec<PathId> = self.network.paths().map(|(id, _)| id).collect();
        for id in ids {
            let resolution = self.network.path(id).map_or(0.02, |p| p.config().resolution());
            if let Err(err) = self.network.set_sampling(id, spacing, resolution) {
                log::warn!("resampling path {:?} failed: {}", id, err);
            }
        }
        log::info!("sample spacing set to {}", spacing);
    }

    fn save_route(&self) {
        match RouteDocument::save(&self.network).save_to_file(SAVE_PATH) {
            Ok(()) => log::info!("route saved to {}", SAVE_PATH),
            Err(err) => log::warn!("saving route failed: {}", err),
        }
    }

    /// Re-upload ribbons whose mesh revision changed since the last upload.
    fn sync_ribbons(&mut self) {
        let mut uploaded = Vec::new();
        for (id, extruder) in self.network.ribbons() {
            let current = self.ribbons.iter().find(|r| r.path == id);
            if current.is_some_and(|r| r.revision == extruder.revision()) {
                continue;
            }
            let Some(path) = self.network.path(id) else {
                continue;
            };
            let mesh = RenderMesh::from_ribbon_in(extruder.mesh(), path.transform());
            if mesh.is_empty() {
                continue;
            }
            uploaded.push(upload_ribbon(&self.device, id, extruder.revision(), &mesh));
        }

        for ribbon in uploaded {
            self.ribbons.retain(|r| r.path != ribbon.path);
            self.ribbons.push(ribbon);
        }
        self.ribbons.retain(|r| self.network.ribbon(r.path).is_some());
    }

    /// Travelers that stopped at an end turn around and set off again.
    fn bounce_finished_travelers(&mut self) {
        let mut query = self.world.query::<&mut Traveler>();
        for mut traveler in query.iter_mut(&mut self.world) {
            if traveler.is_following() {
                continue;
            }
            let Some(path) = self.network.path(traveler.path()) else {
                continue;
            };
            let direction = traveler.direction().flipped();
            let percentage = traveler.percentage();
            traveler.set_direction(direction);
            traveler.set_percentage(path, percentage);
            traveler.set_following(true);
        }
    }

    fn update(&mut self) {
        let now = std::time::Instant::now();
        // Clamp so a stalled frame (window drag) does not teleport travelers
        let dt = (now - self.last_update).as_secs_f32().min(0.1);
        self.last_update = now;

        self.camera.update(dt);
        if let Some(report) = self.clock.tick(&mut self.world, &mut self.network, dt) {
            if report.failed > 0 {
                log::debug!("{} traveler(s) failed this frame", report.failed);
            }
        }
        self.bounce_finished_travelers();
        self.sync_ribbons();

        self.frame_times.push(dt * 1000.0);
        if (now - self.last_stats_update).as_secs_f32() >= 1.0 {
            self.refresh_stats();
            self.frame_times.clear();
            self.last_stats_update = now;
        }
    }

    fn refresh_stats(&mut self) {
        let frames = self.frame_times.len().max(1) as f32;
        let mut query = self.world.query::<&Traveler>();
        let (traveler_count, following_count) = query
            .iter(&self.world)
            .fold((0, 0), |(all, following), t| (all + 1, following + t.is_following() as usize));

        self.stats.fps = self.frame_times.len() as u32;
        self.stats.frame_time_avg_ms = self.frame_times.iter().sum::<f32>() / frames;
        self.stats.frame_time_min_ms = self.frame_times.iter().copied().fold(f32::MAX, f32::min);
        self.stats.frame_time_max_ms = self.frame_times.iter().copied().fold(0.0, f32::max);
        self.stats.traveler_count = traveler_count;
        self.stats.following_count = following_count;
        self.stats.path_count = self.network.path_count();
        self.stats.node_count = self.network.junctions().node_count();
        self.stats.ribbon_vertices = self.ribbons.iter().map(|r| r.vertex_count).sum();
        self.stats.draw_calls = self.ribbons.len() as u32 + 1;
        self.stats.resolution = (self.size.width, self.size.height);
        self.stats.time_scale = self.clock.time_scale();
        self.stats.clock_enabled = self.clock.enabled;
        self.stats.junctions_crossed = self.counters.crossed.get();
        self.stats.branch_switches = self.counters.switched.get();
        self.stats.ends_reached = self.counters.ended.get();
        self.stats.path_rebuilds = self.counters.rebuilt.get();
    }

    fn node_markers(&self) -> Vec<NodeMarker> {
        let scale = self.window.scale_factor() as f32;
        let screen = Vec2::new(self.size.width as f32, self.size.height as f32) / scale;
        self.network
            .junctions()
            .nodes()
            .filter_map(|node| {
                let pos = self.camera.project(node.position, screen)?;
                Some(NodeMarker { pos: egui::pos2(pos.x, pos.y), connections: node.connections().len() })
            })
            .collect()
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Collect instance data from ECS BEFORE creating render pass
        let mut instance_data = Vec::new();
        let mut query = self.world.query::<(&Transform, &TravelerColor)>();
        for (transform, color) in query.iter(&self.world) {
            instance_data.push(InstanceData {
                position: transform.position,
                _padding: 0.0,
                rotation: transform.rotation,
                color: color.to_array(),
            });
        }

        let instance_count = instance_data.len().min(self.max_instances);
        if instance_count > 0 {
            self.queue.write_buffer(
                &self.instance_buffer,
                0,
                bytemuck::cast_slice(&instance_data[..instance_count]),
            );
        }

        let aspect = self.size.width as f32 / self.size.height as f32;
        let uniforms = Uniforms {
            view_proj: self.camera.view_projection(aspect),
            light_dir: Vec3::new(0.4, 1.0, 0.3).normalize().extend(0.0),
        };
        self.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.05,
                            b: 0.1,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);

            // One draw per ribbon
            render_pass.set_pipeline(&self.ribbon_pipeline);
            for ribbon in &self.ribbons {
                render_pass.set_vertex_buffer(0, ribbon.vertex_buffer.slice(..));
                render_pass.set_index_buffer(ribbon.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..ribbon.index_count, 0, 0..1);
            }

            // ONE DRAW CALL for all travelers
            if instance_count > 0 {
                render_pass.set_pipeline(&self.traveler_pipeline);
                render_pass.set_vertex_buffer(0, self.box_vertex_buffer.slice(..));
                render_pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
                render_pass.set_index_buffer(self.box_index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(0..self.box_index_count, 0, 0..instance_count as u32);
            }
        }

        if self.overlay.visible {
            let screen_descriptor = egui_wgpu::ScreenDescriptor {
                size_in_pixels: [self.config.width, self.config.height],
                pixels_per_point: self.window.scale_factor() as f32,
            };
            let markers = self.node_markers();
            self.overlay.render(
                &self.device,
                &self.queue,
                &mut encoder,
                &self.window,
                &view,
                &screen_descriptor,
                Some(&self.stats),
                Some(&markers),
            );
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

// ============================================================================
// MAIN
// ============================================================================

fn main() {
    env_logger::init();

    let network = match std::env::args().nth(1) {
        Some(path) => load_network(&path).expect("failed to load route document"),
        None => demo_network().expect("failed to build demo network"),
    };

    let event_loop = EventLoop::new().unwrap();

    let window_attributes = Window::default_attributes()
        .with_title("Trackway - route viewer")
        .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

    let window = std::sync::Arc::new(event_loop.create_window(window_attributes).unwrap());

    let mut state = pollster::block_on(State::new(window.clone(), network));

    event_loop.run(move |event, control_flow| {
        match event {
            WinitEvent::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => {
                if state.overlay.visible {
                    let _ = state.overlay.handle_window_event(&window, event);
                }
                if state.camera.handle_event(event) {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested
                    | WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                state: ElementState::Pressed,
                                physical_key: PhysicalKey::Code(KeyCode::Escape),
                                ..
                            },
                        ..
                    } => {
                        state.network.shutdown();
                        control_flow.exit();
                    }
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                state: ElementState::Pressed,
                                physical_key: PhysicalKey::Code(key),
                                repeat: false,
                                ..
                            },
                        ..
                    } => {
                        state.handle_key(*key);
                    }
                    WindowEvent::Resized(physical_size) => {
                        state.resize(*physical_size);
                    }
                    WindowEvent::RedrawRequested => {
                        state.update();
                        match state.render() {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost) => state.resize(state.size),
                            Err(wgpu::SurfaceError::OutOfMemory) => control_flow.exit(),
                            Err(e) => log::warn!("{:?}", e),
                        }
                    }
                    _ => {}
                }
            }
            WinitEvent::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    }).unwrap();
}
