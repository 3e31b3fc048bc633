//! The type-variable bindings table.
//!
//! A union-find-like substitution map over type variables. Every variable is
//! in exactly one of three states: `Free` (unbound), `Fixed` (bound to a
//! concrete type), or `Transfer` (redirected to another variable of the same
//! equivalence class). A variable absent from the map is `Free`.
//!
//! Structural invariants:
//! - The representative of an equivalence class is its smallest-id member.
//! - `Transfer` links are at most one hop deep: merging re-points every
//!   transitive transferrer at the new representative.
//! - `Fixed` binds only representatives, and its target is never itself a
//!   bare type variable (though it may contain variables).

use std::collections::BTreeMap;

use opal_types::{free_type_vars, Type, TypeVarId};

/// The binding state of one type variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Unbound.
    Free,
    /// Bound to a concrete type.
    Fixed(Type),
    /// Redirected to the representative of its equivalence class.
    Transfer(TypeVarId),
}

/// Substitution map from type variables to their bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeVariableBindings {
    map: BTreeMap<TypeVarId, Binding>,
}

impl TypeVariableBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The binding of `var`; absent variables are `Free`.
    pub fn binding(&self, var: TypeVarId) -> Binding {
        self.map.get(&var).cloned().unwrap_or(Binding::Free)
    }

    /// The representative of `var`'s equivalence class.
    ///
    /// `Transfer` links are one hop deep, so a single follow suffices.
    pub fn representative(&self, var: TypeVarId) -> TypeVarId {
        match self.map.get(&var) {
            Some(Binding::Transfer(rep)) => *rep,
            _ => var,
        }
    }

    /// The concrete type bound to `var`'s equivalence class, if any.
    pub fn fixed_type(&self, var: TypeVarId) -> Option<Type> {
        match self.map.get(&self.representative(var)) {
            Some(Binding::Fixed(ty)) => Some(ty.clone()),
            _ => None,
        }
    }

    /// Whether `var` is the representative of its class.
    pub fn is_representative(&self, var: TypeVarId) -> bool {
        self.representative(var) == var
    }

    /// Unify the equivalence classes of two representatives.
    ///
    /// The smaller id becomes the representative of the merged class; the
    /// other variable and every variable that transferred to it are
    /// re-pointed at the winner, keeping `Transfer` one hop deep.
    pub fn merge(&mut self, a: TypeVarId, b: TypeVarId) {
        debug_assert!(self.is_representative(a), "merge requires representatives");
        debug_assert!(self.is_representative(b), "merge requires representatives");
        debug_assert!(
            !matches!(self.binding(a), Binding::Fixed(_)),
            "cannot merge a fixed variable"
        );
        debug_assert!(
            !matches!(self.binding(b), Binding::Fixed(_)),
            "cannot merge a fixed variable"
        );
        if a == b {
            return;
        }
        let (rep, other) = if a < b { (a, b) } else { (b, a) };
        for binding in self.map.values_mut() {
            if *binding == Binding::Transfer(other) {
                *binding = Binding::Transfer(rep);
            }
        }
        self.map.insert(other, Binding::Transfer(rep));
    }

    /// Bind a free representative to a concrete type.
    pub fn assign(&mut self, var: TypeVarId, ty: Type) {
        debug_assert!(self.is_representative(var), "assign requires a representative");
        debug_assert!(
            matches!(self.binding(var), Binding::Free),
            "assign requires a free variable"
        );
        debug_assert!(!ty.is_variable(), "cannot fix a variable to a bare variable");
        debug_assert!(
            !free_type_vars(&ty).contains(&var),
            "occurs check violated in assign"
        );
        self.map.insert(var, Binding::Fixed(ty));
    }

    /// Every member of `var`'s equivalence class, representative included.
    pub fn class_members(&self, var: TypeVarId) -> Vec<TypeVarId> {
        let rep = self.representative(var);
        let mut members = vec![rep];
        for (member, binding) in &self.map {
            if *binding == Binding::Transfer(rep) {
                members.push(*member);
            }
        }
        members
    }

    /// Substitute every variable reachable inside `ty`.
    ///
    /// Fixed variables are replaced by their (recursively simplified) types;
    /// free variables are replaced by their representatives and left in
    /// place.
    pub fn simplify(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => {
                let rep = self.representative(*v);
                match self.map.get(&rep) {
                    Some(Binding::Fixed(fixed)) => self.simplify(fixed),
                    _ => Type::Var(rep),
                }
            }
            Type::Prim(_) | Type::Any => ty.clone(),
            Type::Function { param, result } => {
                Type::function(self.simplify(param), self.simplify(result))
            }
            Type::Optional(inner) => Type::optional(self.simplify(inner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: u32) -> TypeVarId {
        TypeVarId(id)
    }

    #[test]
    fn merge_picks_smallest_id_representative() {
        let mut bindings = TypeVariableBindings::new();
        bindings.merge(v(3), v(1));
        assert_eq!(bindings.representative(v(3)), v(1));
        assert_eq!(bindings.representative(v(1)), v(1));
    }

    #[test]
    fn merge_repoints_existing_transferrers() {
        let mut bindings = TypeVariableBindings::new();
        bindings.merge(v(5), v(2));
        // v5 -> v2; merging v2's class with v1 must leave v5 one hop from v1.
        bindings.merge(v(2), v(1));
        assert_eq!(bindings.binding(v(5)), Binding::Transfer(v(1)));
        assert_eq!(bindings.binding(v(2)), Binding::Transfer(v(1)));
        assert_eq!(bindings.class_members(v(5)), vec![v(1), v(2), v(5)]);
    }

    #[test]
    fn assign_fixes_the_whole_class() {
        let mut bindings = TypeVariableBindings::new();
        bindings.merge(v(4), v(2));
        bindings.assign(v(2), Type::int());
        assert_eq!(bindings.fixed_type(v(4)), Some(Type::int()));
        assert_eq!(bindings.fixed_type(v(2)), Some(Type::int()));
    }

    #[test]
    fn simplify_chases_fixed_types_recursively() {
        let mut bindings = TypeVariableBindings::new();
        bindings.assign(v(0), Type::function(Type::Var(v(1)), Type::int()));
        bindings.assign(v(1), Type::optional(Type::int()));

        let simplified = bindings.simplify(&Type::Var(v(0)));
        assert_eq!(
            simplified,
            Type::function(Type::optional(Type::int()), Type::int())
        );
    }

    #[test]
    fn simplify_normalizes_free_variables_to_representatives() {
        let mut bindings = TypeVariableBindings::new();
        bindings.merge(v(7), v(3));
        assert_eq!(bindings.simplify(&Type::Var(v(7))), Type::Var(v(3)));
    }
}
