//! Bindable parameter kinds and the closed per-phase legality table.

use super::Phase;
use std::fmt;

/// The closed set of values a phase callback can bind, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// The receiver instance.
    Receiver,
    /// A single positional argument.
    Argument(usize),
    /// All arguments as one array.
    AllArguments,
    /// The woven method's name.
    MethodName,
    /// The typed return value. Only legal in on-return, first position.
    Return,
    /// The type-erased optional return value. Only legal in on-return,
    /// first position.
    OptionalReturn,
    /// The thrown value. Only legal in on-throw, first position.
    Thrown,
    /// The cross-phase traveler, with its expected type name.
    Traveler(String),
    /// Per-type metadata.
    TypeMeta,
    /// Per-method metadata.
    MethodMeta,
    /// The invocation context handle.
    Context,
    /// Context handle whose receiver may be absent.
    OptionalContext,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Receiver => write!(f, "receiver"),
            BindingKind::Argument(n) => write!(f, "argument[{n}]"),
            BindingKind::AllArguments => write!(f, "all-arguments"),
            BindingKind::MethodName => write!(f, "method-name"),
            BindingKind::Return => write!(f, "return"),
            BindingKind::OptionalReturn => write!(f, "optional-return"),
            BindingKind::Thrown => write!(f, "thrown"),
            BindingKind::Traveler(ty) => write!(f, "traveler<{ty}>"),
            BindingKind::TypeMeta => write!(f, "type-meta"),
            BindingKind::MethodMeta => write!(f, "method-meta"),
            BindingKind::Context => write!(f, "context"),
            BindingKind::OptionalContext => write!(f, "optional-context"),
        }
    }
}

impl BindingKind {
    /// The closed legality table: which kinds may appear in which phase.
    pub fn legal_in(&self, phase: Phase) -> bool {
        match self {
            BindingKind::Return | BindingKind::OptionalReturn => phase == Phase::OnReturn,
            BindingKind::Thrown => phase == Phase::OnThrow,
            BindingKind::Traveler(_) => matches!(
                phase,
                Phase::OnReturn | Phase::OnThrow | Phase::After
            ),
            // Receiver legality on constructor-targeting rules is tightened
            // further by the builder.
            BindingKind::Receiver
            | BindingKind::Argument(_)
            | BindingKind::AllArguments
            | BindingKind::MethodName
            | BindingKind::TypeMeta
            | BindingKind::MethodMeta
            | BindingKind::Context
            | BindingKind::OptionalContext => true,
        }
    }

    /// Kinds that must occupy the first parameter slot of their phase.
    pub fn must_be_first(&self) -> bool {
        matches!(
            self,
            BindingKind::Return | BindingKind::OptionalReturn | BindingKind::Thrown
        )
    }

    pub fn is_context(&self) -> bool {
        matches!(self, BindingKind::Context | BindingKind::OptionalContext)
    }
}
