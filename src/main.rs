//! Headless instancing benchmark
//!
//! Drives a draw manager over a synthetic lit world on the in-memory backend
//! and logs per-frame statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use clap::Parser;
use glam::{Mat4, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};

use indirect_instancing::core::{
    BlockPos, DataLayer, Environment, Instance, InstanceHandle, InstanceType, Material, Mesh,
    MeshId, Model, ModelId, ModelMesh, SectionPos, VisualType,
};
use indirect_instancing::light::{LightEngine, LightLayer};
use indirect_instancing::render::{CrumblingBlock, DrawManager, Frustum};
use indirect_instancing::{
    HeadlessBackend, LIGHT_SECTION_SIZE_BYTES, MAX_LIGHT_LEVEL, RenderSettings, SECTION_SIZE,
    TaskExecutor, load_or_default,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of frames to simulate
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Instances spread over the world
    #[arg(long, default_value_t = 10_000)]
    instances: usize,

    /// Distinct models the instances use
    #[arg(long, default_value_t = 8)]
    models: u64,

    /// Worker threads for group maintenance (default from settings)
    #[arg(long)]
    workers: Option<usize>,

    /// Radius of the lit world in sections
    #[arg(long, default_value_t = 2)]
    radius: i32,

    /// Settings file to load
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BenchInstance {
    position: [f32; 3],
    light: u32,
}

impl Instance for BenchInstance {
    const TYPE: InstanceType = InstanceType::of::<BenchInstance>("bench");
}

/// Cube of sections with pseudo-random light that changes a little every frame
struct SyntheticWorld {
    block: FxHashMap<SectionPos, DataLayer>,
    sky: FxHashMap<SectionPos, DataLayer>,
    sections: Vec<SectionPos>,
    updated: Vec<SectionPos>,
    seed: u32,
}

impl SyntheticWorld {
    fn new(radius: i32) -> Self {
        let mut world = SyntheticWorld {
            block: FxHashMap::default(),
            sky: FxHashMap::default(),
            sections: Vec::new(),
            updated: Vec::new(),
            seed: 0x9e37_79b9,
        };
        for x in -radius..=radius {
            for y in -radius..=radius {
                for z in -radius..=radius {
                    let section = SectionPos::new(x, y, z);
                    world.sections.push(section);
                    world.sky.insert(section, DataLayer::filled(MAX_LIGHT_LEVEL));
                    world.block.insert(section, DataLayer::new());
                }
            }
        }
        for _ in 0..world.sections.len() * 64 {
            world.scatter_light();
        }
        world.updated.clear();
        world
    }

    fn next_random(&mut self) -> u32 {
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 17;
        self.seed ^= self.seed << 5;
        self.seed
    }

    /// Set one random block light value and report its section as updated
    fn scatter_light(&mut self) {
        let idx = self.next_random() as usize % self.sections.len();
        let section = self.sections[idx];
        let r = self.next_random() as usize;
        let level = (self.next_random() % (MAX_LIGHT_LEVEL as u32 + 1)) as u8;
        if let Some(layer) = self.block.get_mut(&section) {
            layer.set(r & 15, (r >> 4) & 15, (r >> 8) & 15, level);
        }
        self.updated.push(section);
    }

    fn random_position(&mut self, radius: i32) -> [f32; 3] {
        let extent = ((2 * radius + 1) * SECTION_SIZE) as u32;
        let min = (-radius * SECTION_SIZE) as f32;
        [
            min + (self.next_random() % extent) as f32,
            min + (self.next_random() % extent) as f32,
            min + (self.next_random() % extent) as f32,
        ]
    }
}

impl LightEngine for SyntheticWorld {
    fn light_value(&self, layer: LightLayer, pos: BlockPos) -> u8 {
        let (x, y, z) = pos.local();
        self.data_layer(layer, SectionPos::from_block(pos))
            .map_or(0, |l| l.get(x, y, z))
    }

    fn data_layer(&self, layer: LightLayer, section: SectionPos) -> Option<&DataLayer> {
        match layer {
            LightLayer::Block => self.block.get(&section),
            LightLayer::Sky => self.sky.get(&section),
        }
    }

    fn take_updated_sections(&mut self) -> Vec<SectionPos> {
        std::mem::take(&mut self.updated)
    }
}

fn cube_model(id: u64, vertex_stride: u32) -> Arc<Model> {
    let mesh = Arc::new(Mesh {
        id: MeshId(id),
        vertex_stride,
        vertices: vec![0; vertex_stride as usize * 24],
        indices: (0..6u32)
            .flat_map(|face| [0, 1, 2, 2, 3, 0].map(|i| face * 4 + i))
            .collect(),
    });
    let material = Material {
        backface_culling: stage_of(id) != VisualType::Effect,
        ..Default::default()
    };
    Arc::new(Model::new(
        ModelId(id),
        vec![ModelMesh {
            mesh,
            material,
            bias: 0,
        }],
        Vec3::splat(0.5),
        0.87,
    ))
}

fn stage_of(model: u64) -> VisualType {
    match model % 3 {
        0 => VisualType::Entity,
        1 => VisualType::BlockEntity,
        _ => VisualType::Effect,
    }
}

fn camera(frame: u32, radius: i32) -> Frustum {
    let distance = ((radius + 1) * SECTION_SIZE) as f32 * 1.5;
    let angle = frame as f32 * 0.02;
    let eye = Vec3::new(angle.cos() * distance, distance * 0.3, angle.sin() * distance);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.1, distance * 4.0);
    Frustum::from_view_projection(&(projection * view))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        tracing::error!("Benchmark failed: {}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match &args.settings {
        Some(path) => load_or_default(path),
        None => RenderSettings::default(),
    };
    let worker_count = args.workers.unwrap_or(settings.tasks.worker_count);
    let executor = Arc::new(TaskExecutor::new(worker_count)?);

    let mut backend = HeadlessBackend::new();
    let mut manager = DrawManager::new(&mut backend, &settings, Some(executor))?;
    let mut world = SyntheticWorld::new(args.radius);
    let requested: FxHashSet<SectionPos> = world.sections.iter().copied().collect();
    manager.set_requested_light_sections(requested);

    let models: Vec<_> = (0..args.models.max(1))
        .map(|id| cube_model(id, settings.culling.vertex_stride))
        .collect();

    tracing::info!(
        "Running {} frames with {} instances over {} models on {} workers",
        args.frames,
        args.instances,
        models.len(),
        worker_count
    );

    let mut handles: Vec<InstanceHandle> = Vec::with_capacity(args.instances);
    for i in 0..args.instances {
        let model = &models[i % models.len()];
        let instance = BenchInstance {
            position: world.random_position(args.radius),
            light: 0,
        };
        let environment = if i % 10 == 0 {
            Environment::Embedded(1)
        } else {
            Environment::Global
        };
        handles.push(manager.create(environment, model, stage_of(model.id().0), &instance)?);
    }

    let started = Instant::now();
    for frame in 0..args.frames {
        let frame_start = Instant::now();

        // Move a slice of the instances and respawn a few
        for _ in 0..args.instances / 100 {
            if handles.is_empty() {
                break;
            }
            let slot = world.next_random() as usize % handles.len();
            let instance = BenchInstance {
                position: world.random_position(args.radius),
                light: 0,
            };
            manager.update(&handles[slot], &instance)?;
        }
        if frame % 10 == 0 && !handles.is_empty() {
            let slot = world.next_random() as usize % handles.len();
            let removed = handles.swap_remove(slot);
            manager.delete_instance(&removed)?;

            let model = &models[world.next_random() as usize % models.len()];
            let instance = BenchInstance {
                position: world.random_position(args.radius),
                light: 0,
            };
            handles.push(manager.create(
                Environment::Global,
                model,
                stage_of(model.id().0),
                &instance,
            )?);
        }
        for _ in 0..4 {
            world.scatter_light();
        }

        let stats = manager.flush(&mut backend, &mut world, &camera(frame, args.radius))?;
        let draws: usize = [VisualType::Entity, VisualType::BlockEntity, VisualType::Effect]
            .into_iter()
            .map(|stage| manager.render(&mut backend, stage))
            .sum();
        let crumbling = CrumblingBlock {
            progress: (frame % 10) as i32,
            instances: handles.iter().take(4).cloned().collect(),
        };
        let crumbling_draws = manager.render_crumbling(&mut backend, &[crumbling])?;

        // The in-memory GPU finishes everything by the end of the frame
        backend.signal_all_fences();
        backend.take_commands();

        tracing::info!(
            "Frame {}: {} instances in {} groups, {} light sections extracted, {} bytes staged, {} draws (+{} crumbling) in {:?}",
            frame,
            stats.instances,
            stats.groups,
            stats.light_sections_extracted,
            stats.staged_bytes,
            draws,
            crumbling_draws,
            frame_start.elapsed()
        );
    }

    let light = manager.light_storage();
    tracing::info!(
        "Finished {} frames in {:?}: {} light sections ({} KiB), {} GPU bytes allocated",
        args.frames,
        started.elapsed(),
        light.section_count(),
        light.section_count() * LIGHT_SECTION_SIZE_BYTES / 1024,
        backend.allocated_bytes()
    );

    manager.delete(&mut backend);
    Ok(())
}
