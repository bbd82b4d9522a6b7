//! Metadata records for loaded units - the engine's view of host types.
//!
//! The host loader parses raw unit bytes into these records before handing
//! them to the weaver. The engine never inspects bytecode itself; matching
//! and planning operate purely on this metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved method name the host uses for constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Modifier flags of a method, as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_native: bool,
}

/// One method of a loaded unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodMetadata {
    pub name: String,

    #[serde(default)]
    pub annotations: Vec<String>,

    #[serde(default)]
    pub parameter_types: Vec<String>,

    #[serde(default = "default_return_type")]
    pub return_type: String,

    #[serde(default)]
    pub modifiers: Modifiers,
}

fn default_return_type() -> String {
    "void".to_string()
}

impl MethodMetadata {
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// Stable `name(param,param)` form used in logs and shim signature checks.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.parameter_types.join(","))
    }
}

/// One loaded unit (class or interface) as reported by the host.
///
/// `ancestors` is the full transitive chain: every superclass and every
/// interface reachable from the unit, in no particular order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub name: String,

    #[serde(default)]
    pub annotations: Vec<String>,

    #[serde(default)]
    pub ancestors: Vec<String>,

    #[serde(default)]
    pub is_interface: bool,

    #[serde(default)]
    pub methods: Vec<MethodMetadata>,
}

impl UnitMetadata {
    /// The chain a restriction pattern is evaluated against: the unit itself
    /// plus every transitive ancestor.
    pub fn self_and_ancestors(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.ancestors.iter().map(|a| a.as_str()))
    }

    /// Per-type metadata value handed to advices that bind type metadata.
    pub fn meta_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "annotations": self.annotations,
            "ancestors": self.ancestors,
            "interface": self.is_interface,
        })
    }
}

impl MethodMetadata {
    /// Per-method metadata value handed to advices that bind method metadata.
    pub fn meta_value(&self, unit_name: &str) -> Value {
        serde_json::json!({
            "unit": unit_name,
            "name": self.name,
            "parameterTypes": self.parameter_types,
            "returnType": self.return_type,
            "static": self.modifiers.is_static,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_detection() {
        let m = MethodMetadata {
            name: CONSTRUCTOR_NAME.to_string(),
            annotations: vec![],
            parameter_types: vec![],
            return_type: "void".to_string(),
            modifiers: Modifiers::default(),
        };
        assert!(m.is_constructor());
    }

    #[test]
    fn self_and_ancestors_includes_unit_name() {
        let unit = UnitMetadata {
            name: "com.example.Impl".to_string(),
            annotations: vec![],
            ancestors: vec!["com.example.Base".to_string(), "java.lang.Object".to_string()],
            is_interface: false,
            methods: vec![],
        };
        let chain: Vec<&str> = unit.self_and_ancestors().collect();
        assert_eq!(
            chain,
            vec!["com.example.Impl", "com.example.Base", "java.lang.Object"]
        );
    }
}
