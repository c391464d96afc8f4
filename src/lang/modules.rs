//! Import module registry.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::value::MapData;
use super::Object;

/// Reserved key marking an immutable map as an imported builtin module.
pub const MODULE_NAME_KEY: &str = "__module_name__";

/// Something `import("name")` can resolve to.
#[derive(Debug, Clone)]
pub enum Importable {
    /// Ready-made attributes exposed as an immutable map.
    Builtin(Arc<MapData>),
    /// Script source compiled on first import.
    Source(Arc<[u8]>),
}

impl Importable {
    /// The module value a builtin module is imported as: its attributes plus
    /// the name marker that lets serialization re-bind it later.
    pub fn as_module_object(&self, name: &str) -> Option<Object> {
        match self {
            Importable::Builtin(attrs) => {
                let mut attrs = attrs.as_ref().clone();
                attrs.insert(MODULE_NAME_KEY.to_string(), Object::string(name));
                Some(Object::immutable_map(attrs))
            }
            Importable::Source(_) => None,
        }
    }
}

/// Name → module registry handed to the compiler and the decoder.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    modules: FxHashMap<String, Importable>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builtin_module(&mut self, name: impl Into<String>, attrs: MapData) {
        self.modules
            .insert(name.into(), Importable::Builtin(Arc::new(attrs)));
    }

    pub fn add_source_module(&mut self, name: impl Into<String>, src: impl Into<Arc<[u8]>>) {
        self.modules.insert(name.into(), Importable::Source(src.into()));
    }

    /// Copy every module of `other` into this map, replacing same names.
    pub fn add_map(&mut self, other: &ModuleMap) {
        for (name, module) in &other.modules {
            self.modules.insert(name.clone(), module.clone());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Importable> {
        self.modules.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Importable> {
        self.modules.get(name)
    }

    /// Module name carried by an imported builtin module value, if `value`
    /// is one.
    pub fn module_name_of(value: &Object) -> Option<&str> {
        match value {
            Object::ImmutableMap(m) => m.get(MODULE_NAME_KEY).and_then(Object::as_str),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
