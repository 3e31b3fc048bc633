//! Property tests for the bindings table and constraint matching.
//!
//! These tests stress invariants that must hold for ANY input types, not
//! just hand-picked examples. Key properties:
//!
//! 1. After merging, both variables share the smaller-id representative
//! 2. Assigning a representative fixes every member of its class
//! 3. Simplification eliminates every assigned variable, and is idempotent
//! 4. Matching a ground type against itself always succeeds
//! 5. The occurs check rejects binding a variable into itself
//! 6. Checkpoint/restore leaves the system byte-identical

use proptest::prelude::*;

use opal_types::{free_type_vars, Type, TypeVarId};

use crate::bindings::TypeVariableBindings;
use crate::{Constraint, ConstraintSystem, MatchKind, MatchOptions, SolveResult};

// ---------------------------------------------------------------------------
// Strategies for generating types
// ---------------------------------------------------------------------------

const PRIM_POOL: &[&str] = &["Int", "Bool", "String"];

fn arb_prim() -> impl Strategy<Value = Type> {
    prop::sample::select(PRIM_POOL).prop_map(Type::prim)
}

/// Generate ground types (no type variables).
fn arb_ground_type() -> impl Strategy<Value = Type> {
    arb_prim().prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(p, r)| Type::function(p, r)),
            inner.prop_map(Type::optional),
        ]
    })
}

/// Generate types whose variables are drawn from `0..max_vars`.
fn arb_shape_type(max_vars: u32) -> impl Strategy<Value = Type> {
    let leaf = prop_oneof![
        arb_prim(),
        (0..max_vars).prop_map(|id| Type::Var(TypeVarId(id))),
    ];
    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(p, r)| Type::function(p, r)),
            inner.prop_map(Type::optional),
        ]
    })
}

// ---------------------------------------------------------------------------
// Bindings table invariants
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn merge_picks_smaller_id_as_representative(a in 0u32..32, b in 0u32..32) {
        prop_assume!(a != b);
        let mut bindings = TypeVariableBindings::new();
        bindings.merge(TypeVarId(a), TypeVarId(b));

        let expected = TypeVarId(a.min(b));
        prop_assert_eq!(bindings.representative(TypeVarId(a)), expected);
        prop_assert_eq!(bindings.representative(TypeVarId(b)), expected);
    }

    #[test]
    fn merge_sequences_keep_transfers_one_hop_deep(
        pairs in prop::collection::vec((0u32..16, 0u32..16), 1..12)
    ) {
        let mut bindings = TypeVariableBindings::new();
        for (a, b) in pairs {
            let a = bindings.representative(TypeVarId(a));
            let b = bindings.representative(TypeVarId(b));
            if a != b {
                bindings.merge(a, b);
            }
        }
        for id in 0..16 {
            let var = TypeVarId(id);
            let rep = bindings.representative(var);
            // The representative resolves to itself and is the smallest
            // member of its class.
            prop_assert_eq!(bindings.representative(rep), rep);
            prop_assert!(rep <= var);
        }
    }

    #[test]
    fn assign_fixes_every_class_member(
        members in prop::collection::btree_set(0u32..16, 2..8),
        ty in arb_ground_type(),
    ) {
        let mut bindings = TypeVariableBindings::new();
        let members: Vec<TypeVarId> = members.into_iter().map(TypeVarId).collect();
        for member in &members[1..] {
            let a = bindings.representative(members[0]);
            let b = bindings.representative(*member);
            if a != b {
                bindings.merge(a, b);
            }
        }
        bindings.assign(bindings.representative(members[0]), ty.clone());

        for member in &members {
            prop_assert_eq!(bindings.fixed_type(*member), Some(ty.clone()));
        }
    }

    #[test]
    fn simplify_eliminates_assigned_variables(
        shape in arb_shape_type(4),
        grounds in prop::collection::vec(arb_ground_type(), 4),
    ) {
        let mut bindings = TypeVariableBindings::new();
        for (id, ground) in grounds.iter().enumerate() {
            bindings.assign(TypeVarId(id as u32), ground.clone());
        }
        let simplified = bindings.simplify(&shape);
        prop_assert!(!simplified.has_variables());
    }

    #[test]
    fn simplify_is_idempotent(
        shape in arb_shape_type(8),
        grounds in prop::collection::vec(arb_ground_type(), 4),
    ) {
        // Variables 4..8 stay free; simplification must still stabilize.
        let mut bindings = TypeVariableBindings::new();
        for (id, ground) in grounds.iter().enumerate() {
            bindings.assign(TypeVarId(id as u32), ground.clone());
        }
        let once = bindings.simplify(&shape);
        prop_assert_eq!(bindings.simplify(&once), once.clone());
    }
}

// ---------------------------------------------------------------------------
// Matching invariants
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn matching_a_ground_type_against_itself_succeeds(ty in arb_ground_type()) {
        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(MatchKind::Bind, &ty, &ty, MatchOptions::default());
        prop_assert_eq!(result, SolveResult::Solved);
        prop_assert!(cts.simplify());
    }

    #[test]
    fn every_ground_type_converts_into_its_optional(ty in arb_ground_type()) {
        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(
            MatchKind::Conversion,
            &ty,
            &Type::optional(ty.clone()),
            MatchOptions::default(),
        );
        prop_assert_eq!(result, SolveResult::Solved);
        prop_assert!(cts.simplify());
    }

    #[test]
    fn occurs_check_rejects_self_referential_bindings(
        shape in arb_shape_type(1),
        var in 0u32..1,
    ) {
        let var = TypeVarId(var);
        prop_assume!(free_type_vars(&shape).contains(&var));
        prop_assume!(!shape.is_variable());

        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(
            MatchKind::Bind,
            &Type::Var(var),
            &shape,
            MatchOptions::default(),
        );
        prop_assert_eq!(result, SolveResult::Failure);
    }
}

// ---------------------------------------------------------------------------
// Checkpoint/restore
// ---------------------------------------------------------------------------

/// One arbitrary mutation of a constraint system.
#[derive(Debug, Clone)]
enum Mutation {
    Fresh,
    Bind(Type, Type),
    Convert(Type, Type),
    Simplify,
}

fn arb_mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        Just(Mutation::Fresh),
        (arb_shape_type(4), arb_shape_type(4)).prop_map(|(l, r)| Mutation::Bind(l, r)),
        (arb_shape_type(4), arb_shape_type(4)).prop_map(|(l, r)| Mutation::Convert(l, r)),
        Just(Mutation::Simplify),
    ]
}

fn run_mutation(cts: &mut ConstraintSystem, mutation: Mutation) {
    match mutation {
        Mutation::Fresh => {
            cts.fresh_type_var();
        }
        Mutation::Bind(l, r) => {
            cts.add_constraint(Constraint::bind(l, r));
        }
        Mutation::Convert(l, r) => {
            cts.add_constraint(Constraint::conversion(l, r));
        }
        Mutation::Simplify => {
            cts.simplify();
        }
    }
}

proptest! {
    #[test]
    fn restore_returns_the_system_to_its_snapshot(
        setup in prop::collection::vec(arb_mutation(), 0..6),
        mutations in prop::collection::vec(arb_mutation(), 1..10),
    ) {
        let mut cts = ConstraintSystem::new();
        for mutation in setup {
            run_mutation(&mut cts, mutation);
        }

        let before = cts.snapshot();
        let saved = cts.snapshot();
        for mutation in mutations {
            run_mutation(&mut cts, mutation);
        }
        cts.restore(saved);

        prop_assert_eq!(cts.snapshot(), before);
    }
}
