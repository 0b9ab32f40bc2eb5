use super::{Function, GlobalId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use veil_utils::errors::IrError;

/// Module-level byte data, typically a C string literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    pub data: Vec<u8>,
    #[serde(default = "default_true")]
    pub constant: bool,
    #[serde(default = "default_true")]
    pub initialized: bool,
    /// Set once the bytes have been XOR-encoded in place with this key. Code reading the
    /// global must decode it before use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xor_key: Option<u8>,
}

const fn default_true() -> bool {
    true
}

impl Global {
    /// Constant, initialized NUL-terminated string.
    pub fn c_string(text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            data,
            constant: true,
            initialized: true,
            xor_key: None,
        }
    }

    /// The stored bytes with any XOR encoding undone.
    pub fn plaintext(&self) -> Vec<u8> {
        match self.xor_key {
            Some(key) => self.data.iter().map(|b| b ^ key).collect(),
            None => self.data.clone(),
        }
    }
}

/// Named globals in declaration order. A [`GlobalId`] is the position in this table and
/// stays valid for the life of the module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTable(IndexMap<String, Global>);

impl GlobalTable {
    pub fn insert(&mut self, name: impl Into<String>, global: Global) -> Result<GlobalId, IrError> {
        let name = name.into();
        if self.0.contains_key(&name) {
            return Err(IrError::DuplicateSymbol(name));
        }
        let (index, _) = self.0.insert_full(name, global);
        Ok(GlobalId(index as u32))
    }

    pub fn get(&self, id: GlobalId) -> Option<&Global> {
        self.0.get_index(id.index()).map(|(_, g)| g)
    }

    pub fn get_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.0.get_index_mut(id.index()).map(|(_, g)| g)
    }

    pub fn id_of(&self, name: &str) -> Option<GlobalId> {
        self.0.get_index_of(name).map(|i| GlobalId(i as u32))
    }

    pub fn name_of(&self, id: GlobalId) -> Option<&str> {
        self.0.get_index(id.index()).map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, &str, &Global)> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, (name, g))| (GlobalId(i as u32), name.as_str(), g))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A translation unit: globals plus functions, both in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub globals: GlobalTable,
    #[serde(default)]
    pub functions: IndexMap<String, Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a function keyed by its name.
    pub fn add_function(&mut self, function: Function) -> Result<(), IrError> {
        if self.functions.contains_key(&function.name) {
            return Err(IrError::DuplicateSymbol(function.name));
        }
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn test_global_ids_follow_declaration_order() {
        let mut table = GlobalTable::default();
        let a = table.insert("a", Global::c_string("x")).unwrap();
        let b = table.insert("b", Global::c_string("yz")).unwrap();
        assert_eq!(table.id_of("b"), Some(b));
        assert_eq!(table.name_of(a), Some("a"));
        assert_eq!(table.get(b).unwrap().data, b"yz\0");
        assert!(matches!(
            table.insert("a", Global::c_string("dup")),
            Err(IrError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn test_plaintext_undoes_xor() {
        let mut g = Global::c_string("hi");
        g.data.iter_mut().for_each(|b| *b ^= 0x42);
        g.xor_key = Some(0x42);
        assert_eq!(g.plaintext(), b"hi\0");
    }

    #[test]
    fn test_module_serde_round_trip() {
        let mut module = Module::new("m");
        module.globals.insert("s", Global::c_string("abc")).unwrap();
        module
            .add_function(Function::new("ext", vec![Type::Ptr], Type::I64))
            .unwrap();
        let json = serde_json::to_string(&module).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, module);
        assert!(back.function("ext").unwrap().is_declaration());
    }
}
