//! Game-side objects that own instances
//!
//! A visual keeps handles into a [`DrawManager`] and refreshes their data
//! each tick and frame. The registry drives every live visual in insertion
//! order.

use crate::error::Result;
use crate::render::draw_manager::DrawManager;

pub trait Visual: Send {
    /// Fixed-rate game update
    fn tick(&mut self, _manager: &mut DrawManager) -> Result<()> {
        Ok(())
    }

    /// Called before each flush with the interpolation factor of the frame
    fn begin_frame(&mut self, manager: &mut DrawManager, partial_tick: f32) -> Result<()>;

    /// Release every instance the visual holds
    fn delete(&mut self, manager: &mut DrawManager) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VisualId(u64);

#[derive(Default)]
pub struct VisualRegistry {
    visuals: Vec<(VisualId, Box<dyn Visual>)>,
    next_id: u64,
}

impl VisualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, visual: Box<dyn Visual>) -> VisualId {
        let id = VisualId(self.next_id);
        self.next_id += 1;
        self.visuals.push((id, visual));
        id
    }

    /// Delete and forget one visual; unknown ids are ignored
    pub fn remove(&mut self, manager: &mut DrawManager, id: VisualId) -> Result<()> {
        let Some(position) = self.visuals.iter().position(|(v, _)| *v == id) else {
            return Ok(());
        };
        let (_, mut visual) = self.visuals.remove(position);
        visual.delete(manager)
    }

    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }

    pub fn tick_all(&mut self, manager: &mut DrawManager) -> Result<()> {
        for (_, visual) in &mut self.visuals {
            visual.tick(manager)?;
        }
        Ok(())
    }

    pub fn begin_frame_all(&mut self, manager: &mut DrawManager, partial_tick: f32) -> Result<()> {
        for (_, visual) in &mut self.visuals {
            visual.begin_frame(manager, partial_tick)?;
        }
        Ok(())
    }

    pub fn delete_all(&mut self, manager: &mut DrawManager) -> Result<()> {
        for (_, mut visual) in self.visuals.drain(..) {
            visual.delete(manager)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::core::{
        Environment, Instance, InstanceHandle, InstanceType, Material, Mesh, MeshId, Model,
        ModelId, ModelMesh, VisualType,
    };
    use crate::utils::RenderSettings;
    use bytemuck::{Pod, Zeroable};
    use glam::Vec3;
    use std::sync::Arc;

    #[repr(C)]
    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    struct Offset {
        offset: [f32; 4],
    }

    impl Instance for Offset {
        const TYPE: InstanceType = InstanceType::of::<Offset>("offset");
    }

    struct Bobbing {
        model: Arc<Model>,
        handle: Option<InstanceHandle>,
        ticks: u32,
    }

    impl Visual for Bobbing {
        fn tick(&mut self, _manager: &mut DrawManager) -> Result<()> {
            self.ticks += 1;
            Ok(())
        }

        fn begin_frame(&mut self, manager: &mut DrawManager, partial_tick: f32) -> Result<()> {
            let value = Offset {
                offset: [0.0, self.ticks as f32 + partial_tick, 0.0, 0.0],
            };
            match &self.handle {
                Some(handle) => manager.update(handle, &value),
                None => {
                    let handle = manager.create(
                        Environment::Global,
                        &self.model,
                        VisualType::Entity,
                        &value,
                    )?;
                    self.handle = Some(handle);
                    Ok(())
                }
            }
        }

        fn delete(&mut self, manager: &mut DrawManager) -> Result<()> {
            match self.handle.take() {
                Some(handle) => manager.delete_instance(&handle),
                None => Ok(()),
            }
        }
    }

    fn model() -> Arc<Model> {
        let mesh = Arc::new(Mesh {
            id: MeshId(1),
            vertex_stride: 32,
            vertices: vec![0; 96],
            indices: vec![0, 1, 2],
        });
        let meshes = vec![ModelMesh {
            mesh,
            material: Material::default(),
            bias: 0,
        }];
        Arc::new(Model::new(ModelId(1), meshes, Vec3::ZERO, 0.5))
    }

    #[test]
    fn test_registry_drives_visuals() {
        let mut backend = HeadlessBackend::new();
        let mut manager = DrawManager::new(&mut backend, &RenderSettings::default(), None).unwrap();
        let mut registry = VisualRegistry::new();
        let first = registry.add(Box::new(Bobbing {
            model: model(),
            handle: None,
            ticks: 0,
        }));
        registry.add(Box::new(Bobbing {
            model: model(),
            handle: None,
            ticks: 0,
        }));

        registry.tick_all(&mut manager).unwrap();
        registry.begin_frame_all(&mut manager, 0.5).unwrap();
        assert_eq!(manager.instancer_count(), 1);
        assert_eq!(manager.groups()[0].instancers()[0].instance_count(), 2);

        registry.remove(&mut manager, first).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(manager.groups()[0].instancers()[0].instance_count(), 1);

        registry.delete_all(&mut manager).unwrap();
        assert!(registry.is_empty());
        assert!(manager.groups()[0].instancers()[0].is_empty());
    }
}
