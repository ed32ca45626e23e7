use std::collections::HashMap;

use tern_backends::CompiledFunction;
use tern_core::{Error, Result};

/// Name-keyed store of compiled functions.
///
/// The registry owns every entry. Replacing or clearing an entry drops the
/// compiled function it held.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Box<dyn CompiledFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `compiled` under `name`, returning the entry it replaced.
    pub fn install(
        &mut self,
        name: impl Into<String>,
        compiled: Box<dyn CompiledFunction>,
    ) -> Option<Box<dyn CompiledFunction>> {
        let name = name.into();
        log::debug!("registry: install '{}' ({})", name, compiled.backend_kind());
        self.entries.insert(name, compiled)
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn CompiledFunction> {
        self.entries
            .get(name)
            .map(|f| f.as_ref())
            .ok_or_else(|| Error::NoSuchFunction {
                name: name.to_string(),
            })
    }

    /// The only entry. Fails when there are none or several.
    pub fn lookup_sole(&self) -> Result<&dyn CompiledFunction> {
        let mut iter = self.entries.values();
        match (iter.next(), iter.next()) {
            (Some(f), None) => Ok(f.as_ref()),
            (None, _) => Err(Error::NoSuchFunction {
                name: String::new(),
            }),
            (Some(_), Some(_)) => Err(Error::AmbiguousFunction { names: self.names() }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("registry: clear {} entries", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_backends::BackendKind;
    use tern_graph::Context;

    #[derive(Debug)]
    struct Stub(&'static str);

    impl CompiledFunction for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn backend_kind(&self) -> BackendKind {
            BackendKind::Interpreter
        }
        fn execute(&self, _ctx: &mut Context) -> Result<()> {
            Ok(())
        }
        fn dump(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_lookup_sole() {
        let mut reg = FunctionRegistry::new();
        assert!(matches!(reg.lookup_sole(), Err(Error::NoSuchFunction { .. })));

        reg.install("f", Box::new(Stub("f")));
        assert_eq!(reg.lookup_sole().unwrap().name(), "f");

        reg.install("g", Box::new(Stub("g")));
        match reg.lookup_sole() {
            Err(Error::AmbiguousFunction { names }) => assert_eq!(names, vec!["f", "g"]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_install_replaces() {
        let mut reg = FunctionRegistry::new();
        assert!(reg.install("f", Box::new(Stub("first"))).is_none());
        let old = reg.install("f", Box::new(Stub("second"))).unwrap();
        assert_eq!(old.dump(), "first");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup("f").unwrap().dump(), "second");
    }

    #[test]
    fn test_lookup_missing_and_clear() {
        let mut reg = FunctionRegistry::new();
        reg.install("f", Box::new(Stub("f")));
        assert!(matches!(
            reg.lookup("g"),
            Err(Error::NoSuchFunction { name }) if name == "g"
        ));
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.contains("f"));
    }
}
