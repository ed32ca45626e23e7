// Context — Caller-owned placeholder bindings
//
// A Context maps placeholder identity to a tensor. Compiled functions read
// their inputs from it and write their outputs into it; the engine never
// keeps a context past the call that received it.
//
// Bindings hold tensor handles, not copies. Binding a tensor and later
// mutating it through the caller's handle is visible to the next run, and a
// compiled function writing an output into an already-bound tensor is
// visible through every clone of that tensor.

use std::collections::HashMap;

use tern_core::{Result, Tensor};

use crate::module::Module;
use crate::placeholder::{Placeholder, PlaceholderId};

/// Placeholder → tensor bindings for one or more runs.
#[derive(Debug, Default, Clone)]
pub struct Context {
    bindings: HashMap<PlaceholderId, Tensor>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `tensor` to `ph`, returning the previous binding.
    pub fn insert(&mut self, ph: &Placeholder, tensor: Tensor) -> Option<Tensor> {
        self.bindings.insert(ph.id(), tensor)
    }

    /// Bind by id.
    pub fn insert_id(&mut self, id: PlaceholderId, tensor: Tensor) -> Option<Tensor> {
        self.bindings.insert(id, tensor)
    }

    pub fn get(&self, ph: &Placeholder) -> Option<&Tensor> {
        self.bindings.get(&ph.id())
    }

    pub fn get_id(&self, id: PlaceholderId) -> Option<&Tensor> {
        self.bindings.get(&id)
    }

    pub fn contains(&self, ph: &Placeholder) -> bool {
        self.bindings.contains_key(&ph.id())
    }

    pub fn remove(&mut self, ph: &Placeholder) -> Option<Tensor> {
        self.bindings.remove(&ph.id())
    }

    /// Return the tensor bound to `ph`, first binding a zero tensor of the
    /// placeholder's type if there is none or the existing one has the
    /// wrong type.
    pub fn allocate(&mut self, ph: &Placeholder) -> Result<Tensor> {
        if let Some(t) = self.bindings.get(&ph.id()) {
            if t.ty() == ph.ty() {
                return Ok(t.clone());
            }
        }
        let t = Tensor::zeros_of(ph.ty())?;
        self.bindings.insert(ph.id(), t.clone());
        Ok(t)
    }

    /// Allocate every placeholder declared in `module`.
    pub fn allocate_all(&mut self, module: &Module) -> Result<()> {
        for ph in module.placeholders() {
            self.allocate(ph)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::ElemKind;

    #[test]
    fn test_binding_shares_storage() {
        let mut m = Module::new();
        let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
        let t = Tensor::from_f64_slice(&[1.0, 2.0], 2, ElemKind::Float).unwrap();
        let mut ctx = Context::new();
        ctx.insert(&x, t.clone());
        t.update_data_inplace(&[3.0, 4.0]).unwrap();
        assert_eq!(ctx.get(&x).unwrap().to_f64_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_allocate_reuses_matching_binding() {
        let mut m = Module::new();
        let x = m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
        let mut ctx = Context::new();
        let first = ctx.allocate(&x).unwrap();
        let second = ctx.allocate(&x).unwrap();
        assert!(first.shares_storage_with(&second));

        let wrong = Tensor::zeros(ElemKind::Float, 3).unwrap();
        ctx.insert(&x, wrong.clone());
        let third = ctx.allocate(&x).unwrap();
        assert!(!third.shares_storage_with(&wrong));
        assert_eq!(third.dims(), &[2]);
    }

    #[test]
    fn test_allocate_all() {
        let mut m = Module::new();
        m.create_placeholder(ElemKind::Float, 2, "x", false).unwrap();
        m.create_placeholder(ElemKind::Int32, (2, 2), "y", false).unwrap();
        let mut ctx = Context::new();
        ctx.allocate_all(&m).unwrap();
        assert_eq!(ctx.len(), 2);
    }
}
