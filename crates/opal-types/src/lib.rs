//! Type representations for Opal.
//!
//! This crate defines the semantic types used by the type checker and
//! inference engine: nominal primitives, single-parameter function types,
//! optionals, inference variables, and the `Any` top used as a join
//! sentinel. Types are structural values; two types are equal when their
//! shapes are equal, and a type variable is equal only to itself.

use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a type variable during inference.
///
/// Variables are totally ordered by id; the bindings table relies on this
/// ordering to pick equivalence-class representatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVarId(pub u32);

impl fmt::Display for TypeVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A semantic type in Opal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    /// Nominal primitive, compared by name (e.g. `Int`).
    Prim(String),
    /// Single-parameter function type `(param) -> result`.
    Function { param: Box<Type>, result: Box<Type> },
    /// Optional wrapping `T?`.
    Optional(Box<Type>),
    /// Inference variable.
    Var(TypeVarId),
    /// Universal supertype. Only ever produced as a `join` result sentinel;
    /// never bound to a variable and never written by users.
    Any,
}

impl Type {
    pub fn prim(name: impl Into<String>) -> Type {
        Type::Prim(name.into())
    }

    /// The `Int` primitive, the type of integer literals.
    pub fn int() -> Type {
        Type::prim("Int")
    }

    pub fn function(param: Type, result: Type) -> Type {
        Type::Function {
            param: Box::new(param),
            result: Box::new(result),
        }
    }

    pub fn optional(wrapped: Type) -> Type {
        Type::Optional(Box::new(wrapped))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Type::Var(_))
    }

    /// The variable id when this type is a bare inference variable.
    pub fn as_variable(&self) -> Option<TypeVarId> {
        match self {
            Type::Var(v) => Some(*v),
            _ => None,
        }
    }

    /// The wrapped type when this type is an optional.
    pub fn unwrap_optional(&self) -> Option<&Type> {
        match self {
            Type::Optional(inner) => Some(inner),
            _ => None,
        }
    }

    /// The chain `[T0 = self, T1, …, Tn]` where each step unwraps one
    /// optional layer and `Tn` is the first non-optional type.
    ///
    /// The chain length is the optional depth plus one: `Int` yields
    /// `[Int]`, `Int??` yields `[Int??, Int?, Int]`.
    pub fn optional_chain(&self) -> Vec<Type> {
        let mut chain = vec![self.clone()];
        let mut current = self;
        while let Type::Optional(inner) = current {
            chain.push((**inner).clone());
            current = inner;
        }
        chain
    }

    /// How many optional layers wrap this type.
    pub fn optional_depth(&self) -> usize {
        self.optional_chain().len() - 1
    }

    /// Whether this type mentions any inference variable.
    pub fn has_variables(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::Prim(_) | Type::Any => false,
            Type::Function { param, result } => param.has_variables() || result.has_variables(),
            Type::Optional(inner) => inner.has_variables(),
        }
    }
}

/// Collect every type variable mentioned in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    let mut vars = BTreeSet::new();
    collect_free_type_vars(ty, &mut vars);
    vars
}

fn collect_free_type_vars(ty: &Type, vars: &mut BTreeSet<TypeVarId>) {
    match ty {
        Type::Var(v) => {
            vars.insert(*v);
        }
        Type::Prim(_) | Type::Any => {}
        Type::Function { param, result } => {
            collect_free_type_vars(param, vars);
            collect_free_type_vars(result, vars);
        }
        Type::Optional(inner) => collect_free_type_vars(inner, vars),
    }
}

// ---------------------------------------------------------------------------
// Join: least upper bound in the conversion lattice
// ---------------------------------------------------------------------------

/// The least common supertype of two types under implicit conversion.
///
/// The lattice is shallow: a type joins with itself, a type joins with its
/// optional to the optional, and optionals join pointwise. Everything else
/// has no useful upper bound and joins to [`Type::Any`].
pub fn join(left: &Type, right: &Type) -> Type {
    if left == right {
        return left.clone();
    }
    match (left, right) {
        (Type::Optional(l), Type::Optional(r)) => Type::optional(join(l, r)),
        (Type::Optional(l), r) if l.as_ref() == r => left.clone(),
        (l, Type::Optional(r)) if r.as_ref() == l => right.clone(),
        _ => Type::Any,
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(name) => write!(f, "{name}"),
            Type::Function { param, result } => write!(f, "({param}) -> {result}"),
            Type::Optional(inner) => {
                // Function types need parens so `((Int) -> Int)?` stays
                // distinguishable from `(Int) -> Int?`.
                if matches!(inner.as_ref(), Type::Function { .. }) {
                    write!(f, "({inner})?")
                } else {
                    write!(f, "{inner}?")
                }
            }
            Type::Var(v) => write!(f, "{v}"),
            Type::Any => write!(f, "Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> Type {
        Type::int()
    }

    #[test]
    fn display_forms() {
        assert_eq!(int().to_string(), "Int");
        assert_eq!(Type::optional(int()).to_string(), "Int?");
        assert_eq!(Type::function(int(), int()).to_string(), "(Int) -> Int");
        assert_eq!(
            Type::function(int(), Type::optional(int())).to_string(),
            "(Int) -> Int?"
        );
        assert_eq!(
            Type::optional(Type::function(int(), int())).to_string(),
            "((Int) -> Int)?"
        );
        assert_eq!(Type::Var(TypeVarId(3)).to_string(), "$T3");
    }

    #[test]
    fn optional_chain_lists_every_layer() {
        let ty = Type::optional(Type::optional(int()));
        let chain = ty.optional_chain();
        assert_eq!(
            chain,
            vec![
                Type::optional(Type::optional(int())),
                Type::optional(int()),
                int()
            ]
        );
        assert_eq!(ty.optional_depth(), 2);
        assert_eq!(int().optional_depth(), 0);
    }

    #[test]
    fn join_reflexive() {
        assert_eq!(join(&int(), &int()), int());
        let fun = Type::function(int(), int());
        assert_eq!(join(&fun, &fun), fun);
    }

    #[test]
    fn join_lifts_into_optional() {
        assert_eq!(join(&int(), &Type::optional(int())), Type::optional(int()));
        assert_eq!(join(&Type::optional(int()), &int()), Type::optional(int()));
    }

    #[test]
    fn join_optionals_pointwise() {
        assert_eq!(
            join(&Type::optional(int()), &Type::optional(int())),
            Type::optional(int())
        );
        assert_eq!(
            join(&Type::optional(int()), &Type::optional(Type::prim("Bool"))),
            Type::optional(Type::Any)
        );
    }

    #[test]
    fn join_unrelated_is_any() {
        assert_eq!(join(&int(), &Type::prim("Bool")), Type::Any);
        assert_eq!(join(&int(), &Type::function(int(), int())), Type::Any);
    }

    #[test]
    fn free_vars_are_collected_structurally() {
        let ty = Type::function(
            Type::Var(TypeVarId(1)),
            Type::optional(Type::Var(TypeVarId(4))),
        );
        let vars = free_type_vars(&ty);
        assert_eq!(
            vars.into_iter().collect::<Vec<_>>(),
            vec![TypeVarId(1), TypeVarId(4)]
        );
        assert!(ty.has_variables());
        assert!(!int().has_variables());
    }
}
