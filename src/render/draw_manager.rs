//! Top-level registry of instancers and culling groups
//!
//! Instancers are keyed by (instance type, environment, model, stage) and
//! belong to the culling group of their (instance type, environment). A
//! [`DrawManager::flush`] brings every group and the light data up to date on
//! the GPU; [`DrawManager::render`] then issues the indirect draws of one stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{BufferId, BufferKind, IndirectDraw, RenderBackend};
use crate::constants::DRAW_COMMAND_STRIDE;
use crate::core::{
    Environment, GroupKey, Instance, InstanceHandle, InstanceType, InstancerId, InstancerKey,
    Material, Model, SectionPos, TextureId, VisualType,
};
use crate::error::{RenderError, Result};
use crate::light::{LightBuffers, LightEngine, LightStorage};
use crate::render::commands::DrawIndexedIndirect;
use crate::render::crumbling::{CrumblingBlock, CrumblingInstance, batch_crumbling};
use crate::render::culling_group::CullingGroup;
use crate::render::frustum::Frustum;
use crate::render::instancer::Instancer;
use crate::render::mesh_pool::{MeshPool, ensure_size};
use crate::render::staging::StagingBuffer;
use crate::task::TaskExecutor;
use crate::utils::RenderSettings;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// What one flush did, for logging and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub groups: usize,
    pub instances: u32,
    pub removed_instancers: usize,
    pub light_sections_extracted: usize,
    pub staged_bytes: u64,
}

pub struct DrawManager {
    id: u64,
    workgroup_size: u32,
    executor: Option<Arc<TaskExecutor>>,
    staging: StagingBuffer,
    meshes: MeshPool,
    light_storage: LightStorage,
    light_buffers: LightBuffers,
    groups: Vec<CullingGroup>,
    group_positions: FxHashMap<GroupKey, usize>,
    instancers: FxHashMap<InstancerKey, InstancerId>,
    instancer_groups: FxHashMap<InstancerId, GroupKey>,
    next_instancer: u32,
    crumbling_commands: Option<BufferId>,
}

impl DrawManager {
    pub fn new(
        backend: &mut dyn RenderBackend,
        settings: &RenderSettings,
        executor: Option<Arc<TaskExecutor>>,
    ) -> Result<Self> {
        let staging = StagingBuffer::new(backend, settings.staging.initial_capacity)?;
        let meshes = MeshPool::new(backend, settings.culling.vertex_stride)?;
        let light_storage = LightStorage::new(settings.light.initial_sections);
        let light_buffers =
            LightBuffers::new(backend, &light_storage, settings.light.partial_upload)?;

        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Created draw manager {}", id);
        Ok(DrawManager {
            id,
            workgroup_size: settings.culling.workgroup_size,
            executor,
            staging,
            meshes,
            light_storage,
            light_buffers,
            groups: Vec::new(),
            group_positions: FxHashMap::default(),
            instancers: FxHashMap::default(),
            instancer_groups: FxHashMap::default(),
            next_instancer: 0,
            crumbling_commands: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sections whose light the shaders may sample from the next flush on
    pub fn set_requested_light_sections(&mut self, sections: FxHashSet<SectionPos>) {
        self.light_storage.set_requested_sections(sections);
    }

    pub fn light_storage(&self) -> &LightStorage {
        &self.light_storage
    }

    pub fn light_buffers(&self) -> &LightBuffers {
        &self.light_buffers
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn mesh_pool(&self) -> &MeshPool {
        &self.meshes
    }

    pub fn groups(&self) -> &[CullingGroup] {
        &self.groups
    }

    pub fn group(&self, key: &GroupKey) -> Option<&CullingGroup> {
        self.group_positions.get(key).map(|&i| &self.groups[i])
    }

    pub fn instancer_count(&self) -> usize {
        self.instancers.len()
    }

    /// Add an instance of `model`, creating its instancer and group on first use
    pub fn create<I: Instance>(
        &mut self,
        environment: Environment,
        model: &Arc<Model>,
        visual_type: VisualType,
        value: &I,
    ) -> Result<InstanceHandle> {
        let key = InstancerKey {
            instance_type: I::TYPE,
            environment,
            model: model.id(),
            visual_type,
        };
        let id = match self.instancers.get(&key) {
            Some(&id) => id,
            None => self.create_instancer(key, model)?,
        };

        let instancer = self.instancer_mut(id)?;
        Ok(instancer.create(bytemuck::bytes_of(value)))
    }

    fn create_instancer(&mut self, key: InstancerKey, model: &Arc<Model>) -> Result<InstancerId> {
        for (acquired, model_mesh) in model.meshes().iter().enumerate() {
            if let Err(err) = self.meshes.acquire(&model_mesh.mesh) {
                for earlier in &model.meshes()[..acquired] {
                    self.meshes.release(earlier.mesh.id);
                }
                return Err(err);
            }
        }

        let id = InstancerId(self.next_instancer);
        self.next_instancer += 1;

        let group_key = key.group();
        let position = match self.group_positions.get(&group_key) {
            Some(&position) => position,
            None => {
                self.groups
                    .push(CullingGroup::new(group_key, self.workgroup_size));
                self.group_positions.insert(group_key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[position].add_instancer(Instancer::new(id, key, Arc::clone(model), self.id));
        self.instancers.insert(key, id);
        self.instancer_groups.insert(id, group_key);
        Ok(id)
    }

    /// Overwrite the data of a live instance
    pub fn update<I: Instance>(&mut self, handle: &InstanceHandle, value: &I) -> Result<()> {
        let index = self.live_index(handle)?;
        let instancer = self.instancer_mut(handle.instancer_id())?;
        check_type(instancer, I::TYPE)?;
        instancer.write(index, bytemuck::bytes_of(value));
        Ok(())
    }

    /// Read back the current data of a live instance
    pub fn get<I: Instance>(&self, handle: &InstanceHandle) -> Result<I> {
        let index = self.live_index(handle)?;
        let instancer = self.instancer(handle.instancer_id())?;
        check_type(instancer, I::TYPE)?;
        Ok(bytemuck::pod_read_unaligned(instancer.read(index)))
    }

    /// Remove an instance; its handle reads as deleted from now on
    pub fn delete_instance(&mut self, handle: &InstanceHandle) -> Result<()> {
        let index = self.live_index(handle)?;
        self.instancer_mut(handle.instancer_id())?.remove(index);
        Ok(())
    }

    fn live_index(&self, handle: &InstanceHandle) -> Result<usize> {
        if handle.manager_id() != self.id {
            return Err(RenderError::ForeignHandle {
                handle_owner: handle.manager_id(),
                manager: self.id,
            });
        }
        handle
            .index()
            .map(|index| index as usize)
            .ok_or(RenderError::HandleDeleted)
    }

    fn instancer(&self, id: InstancerId) -> Result<&Instancer> {
        self.instancer_groups
            .get(&id)
            .and_then(|key| self.group_positions.get(key))
            .and_then(|&position| self.groups[position].instancer(id))
            .ok_or(RenderError::UnknownInstancer(id.0))
    }

    fn instancer_mut(&mut self, id: InstancerId) -> Result<&mut Instancer> {
        let position = self
            .instancer_groups
            .get(&id)
            .and_then(|key| self.group_positions.get(key))
            .copied();
        position
            .and_then(|position| self.groups[position].instancer_mut(id))
            .ok_or(RenderError::UnknownInstancer(id.0))
    }

    /// Bring the GPU up to date for this frame.
    ///
    /// Order: reclaim staging, maintain groups, maintain light, stage meshes,
    /// light and instances, flush staging, then cull and apply every group.
    /// The dispatches are submitted before returning.
    pub fn flush<L: LightEngine + ?Sized>(
        &mut self,
        backend: &mut dyn RenderBackend,
        light: &mut L,
        frustum: &Frustum,
    ) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        self.staging.reclaim(backend);

        stats.removed_instancers = self.maintain_groups(backend);
        stats.light_sections_extracted = self.light_storage.maintain(light).extracted;

        self.meshes.flush(backend, &mut self.staging)?;
        self.light_buffers
            .flush(backend, &mut self.staging, &mut self.light_storage)?;
        for group in &mut self.groups {
            group.upload(backend, &mut self.staging, &self.meshes, frustum)?;
            stats.instances += group.instance_count();
        }

        stats.staged_bytes = self.staging.pending_bytes();
        self.staging.flush(backend)?;

        // Transfers above were submitted first, so every dispatch sees them
        for group in &self.groups {
            group.dispatch_cull(backend);
        }
        for group in &self.groups {
            group.dispatch_apply(backend);
        }
        // Draw commands must be final before any draw reads them
        backend.submit();

        stats.groups = self.groups.len();
        tracing::trace!("Flushed draw manager {}: {:?}", self.id, stats);
        Ok(stats)
    }

    /// Compact every group, in parallel when an executor is available
    fn maintain_groups(&mut self, backend: &mut dyn RenderBackend) -> usize {
        let groups = std::mem::take(&mut self.groups);
        let maintained: Vec<(CullingGroup, Vec<Instancer>)> = match &self.executor {
            Some(executor) => executor.run_all(groups, |mut group| {
                let removed = group.maintain();
                (group, removed)
            }),
            None => groups
                .into_iter()
                .map(|mut group| {
                    let removed = group.maintain();
                    (group, removed)
                })
                .collect(),
        };

        let mut removed_count = 0;
        for (mut group, removed) in maintained {
            for instancer in removed {
                removed_count += 1;
                self.instancers.remove(instancer.key());
                self.instancer_groups.remove(&instancer.id());
                for model_mesh in instancer.model().meshes() {
                    self.meshes.release(model_mesh.mesh.id);
                }
            }
            if group.is_empty() {
                tracing::debug!("Deleting empty culling group '{}'", group.key().instance_type.name);
                group.delete(backend);
            } else {
                self.groups.push(group);
            }
        }

        self.group_positions = self
            .groups
            .iter()
            .enumerate()
            .map(|(position, group)| (*group.key(), position))
            .collect();
        removed_count
    }

    /// Draw every instance of one stage; returns the number of indirect draw calls
    pub fn render(&self, backend: &mut dyn RenderBackend, stage: VisualType) -> usize {
        let light = self.light_buffers.bindings();
        self.groups
            .iter()
            .map(|group| group.submit(backend, stage, &self.meshes, &light))
            .sum()
    }

    /// Draw breaking overlays for `blocks`.
    ///
    /// Instances owned by other managers, deleted handles and out-of-range
    /// progress are skipped. Returns the number of draws issued.
    pub fn render_crumbling(
        &mut self,
        backend: &mut dyn RenderBackend,
        blocks: &[CrumblingBlock],
    ) -> Result<usize> {
        let batches = batch_crumbling(blocks, |handle| self.locate(handle));
        if batches.is_empty() {
            return Ok(0);
        }

        struct CrumblingDraw {
            group: usize,
            progress: u8,
            material: Material,
        }

        let mut commands = Vec::new();
        let mut draws = Vec::new();
        for (&group_position, by_progress) in &batches {
            let group = &self.groups[group_position];
            for (&progress, instances) in by_progress {
                for instance in instances {
                    let Some(instancer) = group.instancer(instance.instancer) else {
                        continue;
                    };
                    for draw in group.draws_of(instance.instancer) {
                        commands.push(DrawIndexedIndirect {
                            instance_count: 1,
                            first_instance: instancer.base_instance() + instance.index,
                            ..draw.command
                        });
                        draws.push(CrumblingDraw {
                            group: group_position,
                            progress,
                            material: draw.material.crumbling(progress),
                        });
                    }
                }
            }
        }
        if commands.is_empty() {
            return Ok(0);
        }

        let bytes: &[u8] = bytemuck::cast_slice(&commands);
        let buffer = match self.crumbling_commands {
            Some(buffer) => buffer,
            None => {
                let buffer = backend.create_buffer(
                    "Crumbling Draw Commands",
                    bytes.len() as u64,
                    BufferKind::Indirect,
                )?;
                self.crumbling_commands = Some(buffer);
                buffer
            }
        };
        ensure_size(backend, buffer, bytes.len() as u64)?;
        backend.write_buffer(buffer, 0, bytes);

        let light = self.light_buffers.bindings();
        for (slot, draw) in draws.iter().enumerate() {
            let group = &self.groups[draw.group];
            let Some(group_bindings) = group.crumbling_bindings() else {
                continue;
            };
            let mut bindings = group_bindings.to_vec();
            bindings.extend_from_slice(&light);

            backend.draw_indirect(&IndirectDraw {
                pipeline: group.crumbling_pipeline(&draw.material),
                texture: TextureId::Breaking(draw.progress),
                bindings: &bindings,
                vertex_buffer: self.meshes.vertex_buffer(),
                index_buffer: self.meshes.index_buffer(),
                commands: buffer,
                offset: slot as u64 * DRAW_COMMAND_STRIDE,
                count: 1,
            });
        }
        Ok(draws.len())
    }

    /// Group position and dense slot of a live handle owned by this manager
    fn locate(&self, handle: &InstanceHandle) -> Option<(usize, CrumblingInstance)> {
        if handle.manager_id() != self.id {
            return None;
        }
        let index = handle.index()?;
        let key = self.instancer_groups.get(&handle.instancer_id())?;
        let position = *self.group_positions.get(key)?;
        Some((
            position,
            CrumblingInstance {
                instancer: handle.instancer_id(),
                index,
            },
        ))
    }

    /// Free every GPU resource and invalidate all handles
    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        for mut group in self.groups.drain(..) {
            group.delete(backend);
        }
        self.group_positions.clear();
        self.instancers.clear();
        self.instancer_groups.clear();

        if let Some(buffer) = self.crumbling_commands.take() {
            backend.destroy_buffer(buffer);
        }
        self.meshes.delete(backend);
        self.light_buffers.delete(backend);
        self.light_storage.delete();
        self.staging.delete(backend);
        tracing::info!("Deleted draw manager {}", self.id);
    }
}

fn check_type(instancer: &Instancer, actual: InstanceType) -> Result<()> {
    let expected = instancer.key().instance_type;
    if expected != actual {
        return Err(RenderError::type_mismatch(expected, actual));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, HeadlessBackend};
    use crate::core::{Mesh, MeshId, ModelId, ModelMesh};
    use crate::error::GpuError;
    use crate::light::storage::tests::TestLightWorld;
    use bytemuck::{Pod, Zeroable};
    use glam::{Mat4, Vec3};

    #[repr(C)]
    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    struct Transformed {
        position: [f32; 3],
        light: u32,
    }

    impl Instance for Transformed {
        const TYPE: InstanceType = InstanceType::of::<Transformed>("transformed");
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    struct Oriented {
        rotation: [f32; 4],
        position: [f32; 3],
        light: u32,
    }

    impl Instance for Oriented {
        const TYPE: InstanceType = InstanceType::of::<Oriented>("oriented");
    }

    #[repr(C)]
    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    struct Tint {
        rgb: [u8; 3],
    }

    impl Instance for Tint {
        const TYPE: InstanceType = InstanceType::of::<Tint>("tint");
    }

    fn at(x: f32) -> Transformed {
        Transformed {
            position: [x, 0.0, 0.0],
            light: 0,
        }
    }

    fn quad_model(id: u64) -> Arc<Model> {
        let mesh = Arc::new(Mesh {
            id: MeshId(id),
            vertex_stride: 32,
            vertices: vec![0; 32 * 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        });
        let meshes = vec![ModelMesh {
            mesh,
            material: Material::default(),
            bias: 0,
        }];
        Arc::new(Model::new(ModelId(id), meshes, Vec3::ZERO, 1.0))
    }

    fn small_settings() -> RenderSettings {
        let mut settings = RenderSettings::default();
        settings.staging.initial_capacity = 4096;
        settings.light.initial_sections = 1;
        settings
    }

    fn frustum() -> Frustum {
        Frustum::from_view_projection(&Mat4::orthographic_rh(-8.0, 8.0, -8.0, 8.0, 0.1, 100.0))
    }

    fn manager(backend: &mut HeadlessBackend) -> DrawManager {
        DrawManager::new(backend, &small_settings(), None).unwrap()
    }

    #[test]
    fn test_handles_survive_compaction() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let model = quad_model(1);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                manager
                    .create(Environment::Global, &model, VisualType::Entity, &at(i as f32))
                    .unwrap()
            })
            .collect();
        manager.delete_instance(&handles[1]).unwrap();
        manager.delete_instance(&handles[3]).unwrap();

        let stats = manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        assert_eq!(stats.instances, 3);

        for i in [0, 2, 4] {
            assert_eq!(manager.get::<Transformed>(&handles[i]).unwrap(), at(i as f32));
        }
        assert_eq!(handles[4].index(), Some(2));
        assert_eq!(
            manager.get::<Transformed>(&handles[1]),
            Err(RenderError::HandleDeleted)
        );
        assert_eq!(
            manager.delete_instance(&handles[3]),
            Err(RenderError::HandleDeleted)
        );
    }

    #[test]
    fn test_handle_validation() {
        let mut backend = HeadlessBackend::new();
        let mut first = manager(&mut backend);
        let mut second = manager(&mut backend);
        let model = quad_model(1);

        let handle = first
            .create(Environment::Global, &model, VisualType::Entity, &at(0.0))
            .unwrap();

        assert_eq!(
            second.update(&handle, &at(1.0)),
            Err(RenderError::ForeignHandle {
                handle_owner: first.id(),
                manager: second.id()
            })
        );
        assert_eq!(
            first.get::<Oriented>(&handle),
            Err(RenderError::TypeMismatch {
                expected: "transformed",
                actual: "oriented"
            })
        );

        first.update(&handle, &at(7.0)).unwrap();
        assert_eq!(first.get::<Transformed>(&handle).unwrap(), at(7.0));
    }

    #[test]
    fn test_instancers_share_groups_by_type_and_environment() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let (a, b) = (quad_model(1), quad_model(2));

        manager
            .create(Environment::Global, &a, VisualType::Entity, &at(0.0))
            .unwrap();
        manager
            .create(Environment::Global, &b, VisualType::BlockEntity, &at(0.0))
            .unwrap();
        manager
            .create(Environment::Embedded(3), &a, VisualType::Entity, &at(0.0))
            .unwrap();

        assert_eq!(manager.instancer_count(), 3);
        assert_eq!(manager.groups().len(), 2);
        assert_eq!(manager.mesh_pool().mesh_count(), 2);
    }

    #[test]
    fn test_flush_transfers_before_culling() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        for (id, environment) in [(1, Environment::Global), (2, Environment::Embedded(1))] {
            let model = quad_model(id);
            for i in 0..40 {
                manager
                    .create(environment, &model, VisualType::Entity, &at(i as f32))
                    .unwrap();
            }
        }
        backend.take_commands();

        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        let commands = backend.take_commands();

        let last_transfer = commands
            .iter()
            .rposition(|c| matches!(c, Command::Write { .. } | Command::Copy { .. }))
            .unwrap();
        let submit = commands
            .iter()
            .position(|c| matches!(c, Command::Submit(_)))
            .unwrap();
        assert!(matches!(commands.last(), Some(Command::Submit(_))));
        let labels: Vec<&str> = commands[submit + 1..commands.len() - 1]
            .iter()
            .map(|c| match c {
                Command::Dispatch { label, .. } => *label,
                other => panic!("unexpected command after submit: {:?}", other),
            })
            .collect();

        assert!(last_transfer < submit);
        assert_eq!(
            labels,
            vec![
                "Instance Cull",
                "Instance Cull",
                "Apply Draw Commands",
                "Apply Draw Commands"
            ]
        );
    }

    #[test]
    fn test_empty_instancers_and_groups_are_dropped() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let model = quad_model(1);
        let handle = manager
            .create(Environment::Global, &model, VisualType::Entity, &at(0.0))
            .unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        let group_buffers = manager.groups()[0].buffer_ids();
        assert_eq!(group_buffers.len(), 7);

        manager.delete_instance(&handle).unwrap();
        let stats = manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();

        assert_eq!(stats.removed_instancers, 1);
        assert_eq!(manager.instancer_count(), 0);
        assert!(manager.groups().is_empty());
        assert_eq!(manager.mesh_pool().mesh_count(), 0);
        for buffer in group_buffers {
            assert!(backend.buffer_bytes(buffer).is_none());
        }
    }

    #[test]
    fn test_render_draws_requested_stage() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        manager
            .create(Environment::Global, &quad_model(1), VisualType::Entity, &at(0.0))
            .unwrap();
        manager
            .create(Environment::Global, &quad_model(2), VisualType::Entity, &at(1.0))
            .unwrap();
        manager
            .create(Environment::Global, &quad_model(3), VisualType::Effect, &at(2.0))
            .unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        backend.take_commands();

        // Both entity draws share a pipeline and collapse into one multi-draw
        assert_eq!(manager.render(&mut backend, VisualType::Entity), 1);
        assert_eq!(manager.render(&mut backend, VisualType::BlockEntity), 0);
        assert_eq!(manager.render(&mut backend, VisualType::Effect), 1);

        let counts: Vec<u32> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw { count, .. } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn test_crumbling_skips_invalid_and_leaves_steady_buffers() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let mut other = DrawManager::new(&mut backend, &small_settings(), None).unwrap();
        let model = quad_model(1);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                manager
                    .create(Environment::Global, &model, VisualType::Entity, &at(i as f32))
                    .unwrap()
            })
            .collect();
        let foreign = other
            .create(Environment::Global, &model, VisualType::Entity, &at(0.0))
            .unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        let steady = manager.groups()[0].buffer_ids();
        backend.take_commands();

        let blocks = [
            CrumblingBlock {
                progress: 4,
                instances: vec![handles[2].clone(), foreign],
            },
            CrumblingBlock {
                progress: 10,
                instances: vec![handles[0].clone()],
            },
            CrumblingBlock {
                progress: 0,
                instances: vec![handles[1].clone()],
            },
        ];
        let drawn = manager.render_crumbling(&mut backend, &blocks).unwrap();
        assert_eq!(drawn, 2);

        let commands = backend.take_commands();
        let mut textures = Vec::new();
        for command in &commands {
            match command {
                Command::Write { buffer, .. } => assert!(!steady.contains(buffer)),
                Command::Copy { dst, .. } => assert!(!steady.contains(dst)),
                Command::Draw {
                    texture,
                    pipeline,
                    count,
                    ..
                } => {
                    assert_eq!(*count, 1);
                    assert_eq!(pipeline.context, crate::core::ContextShader::Crumbling);
                    textures.push(*texture);
                }
                _ => {}
            }
        }
        assert_eq!(textures, vec![TextureId::Breaking(0), TextureId::Breaking(4)]);
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let mut backend = HeadlessBackend::with_memory_limit(64 * 1024);
        let mut manager = manager(&mut backend);
        let model = quad_model(1);
        for i in 0..8192 {
            manager
                .create(Environment::Global, &model, VisualType::Entity, &at(i as f32))
                .unwrap();
        }

        let result = manager.flush(&mut backend, &mut TestLightWorld::default(), &frustum());
        assert!(matches!(
            result,
            Err(RenderError::Gpu(GpuError::OutOfMemory { .. }))
        ));
    }

    #[test]
    fn test_delete_invalidates_handles() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let handle = manager
            .create(Environment::Global, &quad_model(1), VisualType::Entity, &at(0.0))
            .unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();

        manager.delete(&mut backend);
        assert!(handle.is_deleted());
        assert_eq!(manager.instancer_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_odd_sized_instances_flush() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let model = quad_model(1);
        let handles: Vec<_> = (0..5u8)
            .map(|i| {
                let tint = Tint { rgb: [i, i, i] };
                manager
                    .create(Environment::Global, &model, VisualType::Entity, &tint)
                    .unwrap()
            })
            .collect();
        manager.delete_instance(&handles[1]).unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();

        manager.update(&handles[3], &Tint { rgb: [9, 8, 7] }).unwrap();
        manager
            .flush(&mut backend, &mut TestLightWorld::default(), &frustum())
            .unwrap();
        assert_eq!(manager.get::<Tint>(&handles[3]).unwrap().rgb, [9, 8, 7]);
        assert_eq!(manager.get::<Tint>(&handles[4]).unwrap().rgb, [4, 4, 4]);
    }

    #[test]
    fn test_failed_instancer_creation_releases_meshes() {
        let mut backend = HeadlessBackend::new();
        let mut manager = manager(&mut backend);
        let good = quad_model(1).meshes()[0].clone();
        let bad = ModelMesh {
            mesh: Arc::new(Mesh {
                id: MeshId(2),
                vertex_stride: 20,
                vertices: vec![0; 20 * 4],
                indices: vec![0, 1, 2],
            }),
            material: Material::default(),
            bias: 0,
        };
        let model = Arc::new(Model::new(ModelId(5), vec![good, bad], Vec3::ZERO, 1.0));

        let result = manager.create(Environment::Global, &model, VisualType::Entity, &at(0.0));
        assert!(matches!(result, Err(RenderError::VertexLayout { actual: 20, .. })));
        assert_eq!(manager.mesh_pool().mesh_count(), 0);
        assert_eq!(manager.instancer_count(), 0);
        assert!(manager.groups().is_empty());
    }
}
