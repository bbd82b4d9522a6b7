//! Type- and method-level targets: the compiled form of one pointcut's
//! pattern attributes.
//!
//! A target AND-combines its base name pattern with annotation patterns and
//! supertype/subtype restrictions; restrictions are evaluated against the
//! candidate's full transitive ancestor chain, never just its declared name.

use super::{ParamPatterns, Pattern, PatternError};
use crate::config::{MethodModifier, PointcutConfig};
use crate::model::{MethodMetadata, Modifiers, UnitMetadata, CONSTRUCTOR_NAME};

/// Compiled type-level constraints of a pointcut.
#[derive(Debug, Clone)]
pub struct TypeTarget {
    name: Pattern,
    annotation: Pattern,
    sub_type_restriction: Pattern,
    super_type_restriction: Pattern,
}

impl TypeTarget {
    pub fn compile(config: &PointcutConfig) -> Result<Self, PatternError> {
        Ok(Self {
            name: Pattern::compile(&config.type_name)?,
            annotation: Pattern::compile(&config.type_annotation)?,
            sub_type_restriction: Pattern::compile(&config.sub_type_restriction)?,
            super_type_restriction: Pattern::compile(&config.super_type_restriction)?,
        })
    }

    /// Full type-level match against a loaded unit.
    pub fn matches_unit(&self, unit: &UnitMetadata) -> bool {
        self.matches_parts(&unit.name, &unit.annotations, &unit.ancestors)
    }

    /// Match against bare metadata parts. Used by both load-time weaving and
    /// reweave planning, which carries a lighter unit record.
    pub fn matches_parts(&self, name: &str, annotations: &[String], ancestors: &[String]) -> bool {
        if !self.name.matches(name) {
            return false;
        }
        if !self.annotation.matches_any(annotations.iter().map(|a| a.as_str())) {
            return false;
        }
        let chain = || std::iter::once(name).chain(ancestors.iter().map(|a| a.as_str()));
        if !self.sub_type_restriction.matches_any(chain()) {
            return false;
        }
        if !self.super_type_restriction.matches_any(chain()) {
            return false;
        }
        true
    }

}

/// Compiled method-level constraints of a pointcut.
#[derive(Debug, Clone)]
pub struct MethodTarget {
    name: Pattern,
    annotation: Pattern,
    params: ParamPatterns,
    return_type: Pattern,
    modifiers: Vec<MethodModifier>,
}

impl MethodTarget {
    pub fn compile(config: &PointcutConfig) -> Result<Self, PatternError> {
        Ok(Self {
            name: Pattern::compile(&config.method_name)?,
            annotation: Pattern::compile(&config.method_annotation)?,
            params: ParamPatterns::compile(&config.method_parameter_types)?,
            return_type: Pattern::compile(&config.method_return_type)?,
            modifiers: config.method_modifiers.clone(),
        })
    }

    pub fn matches_method(&self, method: &MethodMetadata) -> bool {
        // Constructors are never swept up by globs; a rule opts in by naming
        // `<init>` literally.
        if method.is_constructor() && !self.can_match_constructor() {
            return false;
        }
        self.name.matches(&method.name)
            && self
                .annotation
                .matches_any(method.annotations.iter().map(|a| a.as_str()))
            && self.params.matches(&method.parameter_types)
            && self.return_type.matches(&method.return_type)
            && self
                .modifiers
                .iter()
                .all(|m| modifier_holds(*m, &method.modifiers))
    }

    /// Whether this target can select constructors at all. Constructors are
    /// only targeted by an explicit `<init>` branch, never by a glob; this
    /// also decides the constructor-specific validation and reweave policy
    /// for the rule.
    pub fn can_match_constructor(&self) -> bool {
        self.name
            .source()
            .split('|')
            .any(|branch| branch == CONSTRUCTOR_NAME)
    }
}

fn modifier_holds(constraint: MethodModifier, modifiers: &Modifiers) -> bool {
    match constraint {
        MethodModifier::Public => modifiers.is_public,
        MethodModifier::NotPublic => !modifiers.is_public,
        MethodModifier::Static => modifiers.is_static,
        MethodModifier::NotStatic => !modifiers.is_static,
        MethodModifier::Abstract => modifiers.is_abstract,
        MethodModifier::NotAbstract => !modifiers.is_abstract,
        MethodModifier::Native => modifiers.is_native,
        MethodModifier::NotNative => !modifiers.is_native,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, annotations: &[&str], ancestors: &[&str]) -> UnitMetadata {
        UnitMetadata {
            name: name.to_string(),
            annotations: annotations.iter().map(|s| s.to_string()).collect(),
            ancestors: ancestors.iter().map(|s| s.to_string()).collect(),
            is_interface: false,
            methods: vec![],
        }
    }

    fn method(name: &str, params: &[&str], return_type: &str) -> MethodMetadata {
        MethodMetadata {
            name: name.to_string(),
            annotations: vec![],
            parameter_types: params.iter().map(|s| s.to_string()).collect(),
            return_type: return_type.to_string(),
            modifiers: Modifiers {
                is_public: true,
                ..Modifiers::default()
            },
        }
    }

    #[test]
    fn type_target_requires_all_constraints() {
        let config = PointcutConfig {
            type_name: "com.example.*".to_string(),
            sub_type_restriction: "com.example.Base".to_string(),
            ..PointcutConfig::default()
        };
        let target = TypeTarget::compile(&config).unwrap();

        assert!(target.matches_unit(&unit(
            "com.example.Impl",
            &[],
            &["com.example.Base", "java.lang.Object"]
        )));
        // Name matches but the restriction is not satisfied by the chain.
        assert!(!target.matches_unit(&unit("com.example.Other", &[], &["java.lang.Object"])));
        // Restriction satisfied but the name pattern fails.
        assert!(!target.matches_unit(&unit("org.x.Impl", &[], &["com.example.Base"])));
    }

    #[test]
    fn restriction_accepts_the_type_itself() {
        let config = PointcutConfig {
            sub_type_restriction: "com.example.Base".to_string(),
            ..PointcutConfig::default()
        };
        let target = TypeTarget::compile(&config).unwrap();
        assert!(target.matches_unit(&unit("com.example.Base", &[], &[])));
    }

    #[test]
    fn annotation_pattern_matches_any_annotation() {
        let config = PointcutConfig {
            type_annotation: "com.example.Traced".to_string(),
            ..PointcutConfig::default()
        };
        let target = TypeTarget::compile(&config).unwrap();
        assert!(target.matches_unit(&unit("X", &["com.example.Other", "com.example.Traced"], &[])));
        assert!(!target.matches_unit(&unit("X", &["com.example.Other"], &[])));
        assert!(!target.matches_unit(&unit("X", &[], &[])));
    }

    #[test]
    fn method_target_checks_params_return_and_modifiers() {
        let config = PointcutConfig {
            method_name: "execute".to_string(),
            method_parameter_types: vec!["java.lang.String".to_string(), "..".to_string()],
            method_return_type: "void".to_string(),
            method_modifiers: vec![MethodModifier::Public, MethodModifier::NotStatic],
            ..PointcutConfig::default()
        };
        let target = MethodTarget::compile(&config).unwrap();

        assert!(target.matches_method(&method("execute", &["java.lang.String", "int"], "void")));
        assert!(!target.matches_method(&method("execute", &["int"], "void")));
        assert!(!target.matches_method(&method("execute", &["java.lang.String"], "int")));

        let mut static_method = method("execute", &["java.lang.String"], "void");
        static_method.modifiers.is_static = true;
        assert!(!target.matches_method(&static_method));
    }

    #[test]
    fn constructor_detection_honors_alternation() {
        let config = PointcutConfig {
            method_name: "<init>|reset".to_string(),
            ..PointcutConfig::default()
        };
        let target = MethodTarget::compile(&config).unwrap();
        assert!(target.can_match_constructor());

        let plain = PointcutConfig {
            method_name: "execute".to_string(),
            ..PointcutConfig::default()
        };
        assert!(!MethodTarget::compile(&plain).unwrap().can_match_constructor());
    }
}
