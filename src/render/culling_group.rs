//! GPU-driven culling for every instancer sharing a type and environment
//!
//! Per flush a group runs four stages in order: maintain, upload, cull and
//! apply. Culling tests each instance against the frustum and appends the
//! survivors to its model's range of the target buffer. Apply then copies the
//! per-model counts into the indirect commands, so a command whose model had
//! no visible instance stays in the buffer as a zero-instance draw.

use rustc_hash::FxHashMap;

use crate::backend::{
    BufferBinding, BufferId, BufferKind, ComputeDispatch, ComputeProgram, IndirectDraw,
    PipelineKey, RenderBackend,
};
use crate::constants::DRAW_COMMAND_STRIDE;
use crate::core::{ContextShader, GroupKey, InstancerId, Material, VisualType};
use crate::error::GpuError;
use crate::render::bindings;
use crate::render::commands::{DrawIndexedIndirect, DrawInfoGpu, ModelGpu};
use crate::render::frustum::{CullUniforms, Frustum};
use crate::render::instancer::Instancer;
use crate::render::mesh_pool::{MeshPool, ensure_size};
use crate::render::staging::StagingBuffer;

/// One (mesh, material) draw of one instancer
#[derive(Debug, Clone, Copy)]
pub struct DrawEntry {
    pub instancer: InstancerId,
    pub model_index: u32,
    pub visual_type: VisualType,
    pub bias: i32,
    pub material: Material,
    pub command: DrawIndexedIndirect,
}

impl DrawEntry {
    fn pipeline(&self, group: &GroupKey) -> PipelineKey {
        PipelineKey {
            instance_type: group.instance_type,
            context: group.environment.context_shader(),
            render_state: self.material.render_state(),
        }
    }
}

struct GroupBuffers {
    instances: BufferId,
    targets: BufferId,
    model_index: BufferId,
    models: BufferId,
    commands: BufferId,
    draw_info: BufferId,
    uniforms: BufferId,
}

impl GroupBuffers {
    fn new(backend: &mut dyn RenderBackend) -> Result<Self, GpuError> {
        Ok(GroupBuffers {
            instances: backend.create_buffer("Instance Buffer", 256, BufferKind::Storage)?,
            targets: backend.create_buffer("Cull Target Buffer", 64, BufferKind::Storage)?,
            model_index: backend.create_buffer("Model Index Buffer", 64, BufferKind::Storage)?,
            models: backend.create_buffer("Model Buffer", 64, BufferKind::Storage)?,
            commands: backend.create_buffer("Draw Command Buffer", 80, BufferKind::Indirect)?,
            draw_info: backend.create_buffer("Draw Info Buffer", 64, BufferKind::Storage)?,
            uniforms: backend.create_buffer(
                "Cull Uniforms Buffer",
                std::mem::size_of::<CullUniforms>() as u64,
                BufferKind::Uniform,
            )?,
        })
    }

    fn all(&self) -> [BufferId; 7] {
        [
            self.instances,
            self.targets,
            self.model_index,
            self.models,
            self.commands,
            self.draw_info,
            self.uniforms,
        ]
    }
}

pub struct CullingGroup {
    key: GroupKey,
    instancers: Vec<Instancer>,
    positions: FxHashMap<InstancerId, usize>,
    draws: Vec<DrawEntry>,
    /// Created on the first upload
    buffers: Option<GroupBuffers>,
    instance_total: u32,
    needs_draw_rebuild: bool,
    workgroup_size: u32,
}

impl CullingGroup {
    pub fn new(key: GroupKey, workgroup_size: u32) -> Self {
        tracing::debug!(
            "Creating culling group for '{}' ({:?})",
            key.instance_type.name,
            key.environment
        );
        CullingGroup {
            key,
            instancers: Vec::new(),
            positions: FxHashMap::default(),
            draws: Vec::new(),
            buffers: None,
            instance_total: 0,
            needs_draw_rebuild: false,
            workgroup_size: workgroup_size.max(1),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn add_instancer(&mut self, instancer: Instancer) {
        self.positions.insert(instancer.id(), self.instancers.len());
        self.instancers.push(instancer);
        self.needs_draw_rebuild = true;
    }

    pub fn instancer(&self, id: InstancerId) -> Option<&Instancer> {
        self.positions.get(&id).map(|&i| &self.instancers[i])
    }

    pub fn instancer_mut(&mut self, id: InstancerId) -> Option<&mut Instancer> {
        self.positions.get(&id).map(|&i| &mut self.instancers[i])
    }

    pub fn instancers(&self) -> &[Instancer] {
        &self.instancers
    }

    pub fn is_empty(&self) -> bool {
        self.instancers.is_empty()
    }

    /// Instances across every instancer after the last maintenance
    pub fn instance_count(&self) -> u32 {
        self.instance_total
    }

    pub fn draws(&self) -> &[DrawEntry] {
        &self.draws
    }

    pub fn command_buffer(&self) -> Option<BufferId> {
        self.buffers.as_ref().map(|b| b.commands)
    }

    pub fn instance_buffer(&self) -> Option<BufferId> {
        self.buffers.as_ref().map(|b| b.instances)
    }

    /// Every GPU buffer the group owns, empty before the first upload
    pub fn buffer_ids(&self) -> Vec<BufferId> {
        self.buffers.as_ref().map_or_else(Vec::new, |b| b.all().to_vec())
    }

    /// Bindings a crumbling draw of this group reads
    pub(crate) fn crumbling_bindings(&self) -> Option<[BufferBinding; 3]> {
        self.buffers.as_ref().map(|b| {
            [
                BufferBinding::whole(bindings::INSTANCE, b.instances),
                BufferBinding::whole(bindings::MODEL_INDEX, b.model_index),
                BufferBinding::whole(bindings::DRAW_INFO, b.draw_info),
            ]
        })
    }

    /// Remove empty instancers, compact the rest and lay them out back to back.
    ///
    /// Returns the instancers that were dropped so the caller can forget them.
    pub fn maintain(&mut self) -> Vec<Instancer> {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.instancers)
            .into_iter()
            .partition(|instancer| !instancer.is_empty());
        self.instancers = kept;

        if !removed.is_empty() {
            self.needs_draw_rebuild = true;
            self.positions.clear();
            for (position, instancer) in self.instancers.iter_mut().enumerate() {
                self.positions.insert(instancer.id(), position);
                // Model indices shifted
                instancer.mark_full_upload();
            }
        }

        let mut base = 0u32;
        for instancer in &mut self.instancers {
            instancer.compact();
            instancer.set_base_instance(base);
            base += instancer.instance_count() as u32;
        }
        self.instance_total = base;
        removed
    }

    fn rebuild_draws(&mut self, meshes: &MeshPool) {
        self.draws.clear();
        for (model_index, instancer) in self.instancers.iter().enumerate() {
            for model_mesh in instancer.model().meshes() {
                let Some(range) = meshes.range(model_mesh.mesh.id) else {
                    tracing::warn!("Mesh {:?} missing from the mesh pool", model_mesh.mesh.id);
                    continue;
                };
                self.draws.push(DrawEntry {
                    instancer: instancer.id(),
                    model_index: model_index as u32,
                    visual_type: instancer.key().visual_type,
                    bias: model_mesh.bias,
                    material: model_mesh.material,
                    command: DrawIndexedIndirect {
                        index_count: range.index_count,
                        instance_count: 0,
                        first_index: range.first_index,
                        base_vertex: range.base_vertex,
                        first_instance: 0,
                    },
                });
            }
        }
        self.draws
            .sort_by_key(|draw| (draw.visual_type, draw.bias, draw.material));
    }

    /// Stage instance changes, model metadata and (when needed) draw commands
    pub fn upload(
        &mut self,
        backend: &mut dyn RenderBackend,
        staging: &mut StagingBuffer,
        meshes: &MeshPool,
        frustum: &Frustum,
    ) -> Result<(), GpuError> {
        if self.needs_draw_rebuild {
            self.rebuild_draws(meshes);
        }

        let stride = self.key.instance_type.stride as u64;
        let total = self.instance_total as u64;
        let model_count = self.instancers.len() as u64;
        let draw_count = self.draws.len() as u64;

        if self.buffers.is_none() {
            self.buffers = Some(GroupBuffers::new(backend)?);
        }
        let Some(b) = self.buffers.as_ref() else {
            return Ok(());
        };
        ensure_size(backend, b.instances, total * stride)?;
        ensure_size(backend, b.targets, total * 4)?;
        ensure_size(backend, b.model_index, total * 4)?;
        ensure_size(backend, b.models, model_count * std::mem::size_of::<ModelGpu>() as u64)?;
        ensure_size(backend, b.commands, draw_count * DRAW_COMMAND_STRIDE)?;
        ensure_size(
            backend,
            b.draw_info,
            draw_count * std::mem::size_of::<DrawInfoGpu>() as u64,
        )?;

        for (model_index, instancer) in self.instancers.iter_mut().enumerate() {
            instancer.upload(staging, b.instances, b.model_index, model_index as u32);
        }

        // Uploading models every frame also resets the visible counts to zero
        let models: Vec<ModelGpu> = self
            .instancers
            .iter()
            .map(|instancer| ModelGpu {
                bounding_sphere: instancer.model().bounding_sphere().to_array(),
                instance_count: 0,
                base_instance: instancer.base_instance(),
                _padding: [0; 2],
            })
            .collect();
        staging.enqueue_copy(bytemuck::cast_slice(&models), b.models, 0);

        if self.needs_draw_rebuild {
            let commands: Vec<DrawIndexedIndirect> =
                self.draws.iter().map(|d| d.command).collect();
            let info: Vec<DrawInfoGpu> = self
                .draws
                .iter()
                .map(|d| DrawInfoGpu {
                    model_index: d.model_index,
                    packed_material: d.material.packed(),
                    bias: d.bias,
                    _padding: 0,
                })
                .collect();
            staging.enqueue_copy(bytemuck::cast_slice(&commands), b.commands, 0);
            staging.enqueue_copy(bytemuck::cast_slice(&info), b.draw_info, 0);
            self.needs_draw_rebuild = false;
        }

        let uniforms = frustum.uniforms(self.instance_total, model_count as u32);
        staging.enqueue_copy(bytemuck::bytes_of(&uniforms), b.uniforms, 0);
        Ok(())
    }

    fn workgroups(&self, items: u32) -> u32 {
        items.div_ceil(self.workgroup_size)
    }

    pub fn dispatch_cull(&self, backend: &mut dyn RenderBackend) {
        let Some(b) = self.buffers.as_ref() else {
            return;
        };
        if self.instance_total == 0 {
            return;
        }
        let bindings = [
            BufferBinding::whole(bindings::INSTANCE, b.instances),
            BufferBinding::whole(bindings::TARGET, b.targets),
            BufferBinding::whole(bindings::MODEL_INDEX, b.model_index),
            BufferBinding::whole(bindings::MODEL, b.models),
            BufferBinding::whole(bindings::UNIFORMS, b.uniforms),
        ];
        backend.dispatch(&ComputeDispatch {
            label: "Instance Cull",
            program: ComputeProgram::Cull(self.key.instance_type),
            bindings: &bindings,
            workgroups: self.workgroups(self.instance_total),
        });
    }

    pub fn dispatch_apply(&self, backend: &mut dyn RenderBackend) {
        let Some(b) = self.buffers.as_ref() else {
            return;
        };
        if self.draws.is_empty() {
            return;
        }
        let bindings = [
            BufferBinding::whole(bindings::MODEL, b.models),
            BufferBinding::whole(bindings::DRAW, b.commands),
            BufferBinding::whole(bindings::DRAW_INFO, b.draw_info),
        ];
        backend.dispatch(&ComputeDispatch {
            label: "Apply Draw Commands",
            program: ComputeProgram::Apply,
            bindings: &bindings,
            workgroups: self.workgroups(self.draws.len() as u32),
        });
    }

    /// Issue the indirect draws of one render stage.
    ///
    /// Contiguous draws sharing pipeline and texture collapse into one multi-draw.
    pub fn submit(
        &self,
        backend: &mut dyn RenderBackend,
        stage: VisualType,
        meshes: &MeshPool,
        light: &[BufferBinding],
    ) -> usize {
        let Some(b) = self.buffers.as_ref() else {
            return 0;
        };
        let mut bindings = vec![
            BufferBinding::whole(bindings::INSTANCE, b.instances),
            BufferBinding::whole(bindings::TARGET, b.targets),
            BufferBinding::whole(bindings::MODEL_INDEX, b.model_index),
            BufferBinding::whole(bindings::DRAW_INFO, b.draw_info),
        ];
        bindings.extend_from_slice(light);

        let mut issued = 0;
        let mut start = 0;
        while start < self.draws.len() {
            let first = &self.draws[start];
            let pipeline = first.pipeline(&self.key);
            let texture = first.material.texture;
            let mut end = start + 1;
            while end < self.draws.len() && {
                let next = &self.draws[end];
                next.visual_type == first.visual_type
                    && next.material.texture == texture
                    && next.pipeline(&self.key) == pipeline
            } {
                end += 1;
            }

            if first.visual_type == stage {
                backend.draw_indirect(&IndirectDraw {
                    pipeline,
                    texture,
                    bindings: &bindings,
                    vertex_buffer: meshes.vertex_buffer(),
                    index_buffer: meshes.index_buffer(),
                    commands: b.commands,
                    offset: start as u64 * DRAW_COMMAND_STRIDE,
                    count: (end - start) as u32,
                });
                issued += 1;
            }
            start = end;
        }
        issued
    }

    pub(crate) fn draws_of(
        &self,
        instancer: InstancerId,
    ) -> impl Iterator<Item = &DrawEntry> + '_ {
        self.draws.iter().filter(move |d| d.instancer == instancer)
    }

    pub(crate) fn crumbling_pipeline(&self, material: &Material) -> PipelineKey {
        PipelineKey {
            instance_type: self.key.instance_type,
            context: ContextShader::Crumbling,
            render_state: material.render_state(),
        }
    }

    /// Free every GPU buffer and invalidate all handles
    pub fn delete(&mut self, backend: &mut dyn RenderBackend) -> Vec<Instancer> {
        if let Some(buffers) = self.buffers.take() {
            for buffer in buffers.all() {
                backend.destroy_buffer(buffer);
            }
        }
        let mut instancers = std::mem::take(&mut self.instancers);
        for instancer in &mut instancers {
            instancer.clear();
        }
        self.positions.clear();
        self.draws.clear();
        instancers
    }
}
