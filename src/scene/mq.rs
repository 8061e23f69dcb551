//! The model queue: the ordered list of textured models the renderer walks
//! each frame.
//!
//! Storage is slotmap-pooled; the queue itself is a stable order of model
//! keys, and every `ModelTx` carries the keys of its live entities. Lookup
//! by name walks the order back to front, so of overlapping matches the
//! most recently added (visually top-most) model wins.

use slotmap::{new_key_type, SlotMap};

use crate::renderer::backend::RenderBackend;
use crate::resources::model::ModelTx;
use crate::scene::entity::{Entity, UpdateKind};

new_key_type! {
    pub struct ModelTxKey;
    pub struct EntityKey;
}

#[derive(Default)]
pub struct Mq {
    models: SlotMap<ModelTxKey, ModelTx>,
    entities: SlotMap<EntityKey, Entity>,
    order: Vec<ModelTxKey>,
    /// Live character-entity count; drives solid outline IDs.
    pub nr_characters: usize,
}

impl Mq {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a model at the end of the render order.
    pub fn add_model(&mut self, txm: ModelTx) -> ModelTxKey {
        let key = self.models.insert(txm);
        self.order.push(key);
        key
    }

    /// Inserts a model at the head of the render order.
    pub fn add_model_front(&mut self, txm: ModelTx) -> ModelTxKey {
        let key = self.models.insert(txm);
        self.order.insert(0, key);
        key
    }

    #[must_use]
    pub fn model(&self, key: ModelTxKey) -> Option<&ModelTx> {
        self.models.get(key)
    }

    pub fn model_mut(&mut self, key: ModelTxKey) -> Option<&mut ModelTx> {
        self.models.get_mut(key)
    }

    #[must_use]
    pub fn entity(&self, key: EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn entity_mut(&mut self, key: EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key)
    }

    /// Render order, stable across adds and removals.
    #[must_use]
    pub fn order(&self) -> &[ModelTxKey] {
        &self.order
    }

    /// Most recently added model with the given name.
    #[must_use]
    pub fn find_model(&self, name: &str) -> Option<ModelTxKey> {
        self.order
            .iter()
            .rev()
            .copied()
            .find(|&key| self.models.get(key).is_some_and(|m| m.name() == name))
    }

    /// The next model in render order with live entities, starting after
    /// `from` (or at the ends when `None`), walking forward or backward.
    #[must_use]
    pub fn nonempty_next(&self, from: Option<ModelTxKey>, fwd: bool) -> Option<ModelTxKey> {
        let start = from.and_then(|key| self.order.iter().position(|&k| k == key));
        let candidates: Box<dyn Iterator<Item = &ModelTxKey>> = if fwd {
            Box::new(self.order.iter().skip(start.map_or(0, |i| i + 1)))
        } else {
            let end = start.unwrap_or(self.order.len());
            Box::new(self.order[..end].iter().rev())
        };
        candidates
            .copied()
            .find(|&key| self.models.get(key).is_some_and(|m| !m.entities().is_empty()))
    }

    /// Creates an entity of `model` and links it into the model's list.
    pub fn spawn_entity(&mut self, model: ModelTxKey) -> EntityKey {
        let txm = self.models.get(model).expect("model key is live");
        let entity = Entity::new(model, txm);
        let key = self.entities.insert(entity);
        self.models
            .get_mut(model)
            .expect("model key is live")
            .add_entity(key);
        key
    }

    /// Marks a character entity; characters get solid outline IDs.
    pub fn make_character(&mut self, key: EntityKey) {
        if let Some(entity) = self.entities.get_mut(key) {
            if entity.update_kind != UpdateKind::Character {
                entity.update_kind = UpdateKind::Character;
                self.nr_characters += 1;
            }
        }
    }

    /// Unlinks and drops an entity.
    pub fn remove_entity(&mut self, key: EntityKey) {
        if let Some(entity) = self.entities.remove(key) {
            if entity.update_kind == UpdateKind::Character {
                self.nr_characters -= 1;
            }
            if let Some(txm) = self.models.get_mut(entity.model()) {
                txm.remove_entity(key);
            }
        }
    }

    #[must_use]
    pub fn nr_models(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn nr_entities(&self) -> usize {
        self.entities.len()
    }

    /// Split-borrow access for the update and draw loops, which need the
    /// model pool read-only while mutating entities.
    pub fn split(
        &mut self,
    ) -> (
        &SlotMap<ModelTxKey, ModelTx>,
        &mut SlotMap<EntityKey, Entity>,
        &[ModelTxKey],
    ) {
        (&self.models, &mut self.entities, &self.order)
    }

    /// Releases every model's GPU resources and clears the queue.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.entities.clear();
        for key in self.order.drain(..) {
            if let Some(txm) = self.models.remove(key) {
                txm.release(backend);
            }
        }
        self.models.clear();
        self.nr_characters = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Shared;
    use crate::renderer::backend::HeadlessBackend;
    use crate::resources::model::{Model, ModelOptions, TextureSource};
    use crate::resources::primitives;
    use crate::resources::shader::{BlockMask, ShaderProgram, ShaderProgramOptions};

    fn make_txm(backend: &mut HeadlessBackend, name: &str) -> ModelTx {
        let program = Shared::new(
            ShaderProgram::new(
                backend,
                &ShaderProgramOptions {
                    name: "model",
                    vert: "void main() {}",
                    frag: "void main() {}",
                    geom: None,
                    blocks: BlockMask::PROJVIEW,
                },
            )
            .unwrap(),
        );
        let mesh = primitives::cube_mesh();
        let model =
            Model::from_mesh(backend, name, program, &mesh, &ModelOptions::default()).unwrap();
        ModelTx::new(backend, Shared::new(model).pass(), TextureSource::None).unwrap()
    }

    #[test]
    fn test_order_is_stable() {
        let mut backend = HeadlessBackend::new();
        let mut mq = Mq::new();
        let a = mq.add_model(make_txm(&mut backend, "a"));
        let b = mq.add_model(make_txm(&mut backend, "b"));
        let c = mq.add_model_front(make_txm(&mut backend, "c"));
        assert_eq!(mq.order(), &[c, a, b]);
    }

    #[test]
    fn test_find_model_prefers_latest() {
        let mut backend = HeadlessBackend::new();
        let mut mq = Mq::new();
        let first = mq.add_model(make_txm(&mut backend, "rock"));
        let second = mq.add_model(make_txm(&mut backend, "rock"));
        assert_ne!(first, second);
        assert_eq!(mq.find_model("rock"), Some(second));
    }

    #[test]
    fn test_entity_linkage() {
        let mut backend = HeadlessBackend::new();
        let mut mq = Mq::new();
        let model = mq.add_model(make_txm(&mut backend, "cube"));
        let e1 = mq.spawn_entity(model);
        let e2 = mq.spawn_entity(model);
        assert_eq!(mq.model(model).unwrap().entities(), &[e1, e2]);

        mq.remove_entity(e1);
        assert_eq!(mq.model(model).unwrap().entities(), &[e2]);
        assert_eq!(mq.nr_entities(), 1);
    }

    #[test]
    fn test_nonempty_next_skips_empty_models() {
        let mut backend = HeadlessBackend::new();
        let mut mq = Mq::new();
        let empty = mq.add_model(make_txm(&mut backend, "empty"));
        let populated = mq.add_model(make_txm(&mut backend, "populated"));
        mq.spawn_entity(populated);

        assert_eq!(mq.nonempty_next(None, true), Some(populated));
        assert_eq!(mq.nonempty_next(Some(populated), true), None);
        assert_eq!(mq.nonempty_next(Some(populated), false), None);
        let _ = empty;
    }
}
