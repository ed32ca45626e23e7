use std::collections::HashMap;

use tern_core::{ElemKind, Error, Result, Shape, TensorType};

use crate::function::Function;
use crate::placeholder::{ModuleId, Placeholder, PlaceholderId};

/// Top-level container of functions and placeholders.
///
/// Names are unique per kind: no two placeholders and no two functions may
/// share a name. Placeholders are identified by [`PlaceholderId`], which is
/// unique across every module in the process.
#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    placeholders: Vec<Placeholder>,
    placeholder_names: HashMap<String, usize>,
    functions: Vec<Function>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    pub fn new() -> Self {
        Self {
            id: ModuleId::new(),
            placeholders: Vec::new(),
            placeholder_names: HashMap::new(),
            functions: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    //  Placeholders

    /// Declare a placeholder. Returns a descriptor clone for the caller.
    pub fn create_placeholder(
        &mut self,
        kind: ElemKind,
        shape: impl Into<Shape>,
        name: impl Into<String>,
        trainable: bool,
    ) -> Result<Placeholder> {
        let name = name.into();
        let shape = shape.into();
        shape.validate()?;
        if self.placeholder_names.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }
        let index = self.placeholders.len();
        let ph = Placeholder::new(
            PlaceholderId::new(self.id, index),
            name.clone(),
            TensorType::new(kind, shape),
            trainable,
        );
        self.placeholders.push(ph.clone());
        self.placeholder_names.insert(name, index);
        Ok(ph)
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Look a placeholder up by name.
    pub fn placeholder_by_name(&self, name: &str) -> Result<&Placeholder> {
        self.placeholder_names
            .get(name)
            .map(|&i| &self.placeholders[i])
            .ok_or_else(|| Error::UnknownPlaceholder {
                name: name.to_string(),
            })
    }

    /// Look a placeholder up by identity. Ids from other modules never match.
    pub fn placeholder(&self, id: PlaceholderId) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.id() == id)
    }

    //  Functions

    /// Create an empty function and return it for building.
    pub fn create_function(&mut self, name: impl Into<String>) -> Result<&mut Function> {
        let name = name.into();
        if self.functions.iter().any(|f| f.name() == name) {
            return Err(Error::DuplicateName { name });
        }
        self.functions.push(Function::new(name, self.id));
        let last = self.functions.len() - 1;
        Ok(&mut self.functions[last])
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Result<&Function> {
        self.functions
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn function_mut(&mut self, name: &str) -> Result<&mut Function> {
        self.functions
            .iter_mut()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Remove a function. Placeholders stay declared.
    pub fn erase_function(&mut self, name: &str) -> Result<Function> {
        let pos = self
            .functions
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })?;
        Ok(self.functions.remove(pos))
    }

    /// Verify every function.
    pub fn verify(&self) -> Result<()> {
        self.functions.iter().try_for_each(Function::verify)
    }
}
