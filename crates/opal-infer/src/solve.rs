//! The backtracking solver.
//!
//! Three nested steps implement a depth-first search over the system's
//! choice points. A component step simplifies and then either picks a
//! disjunction to branch on, guesses a binding for the most constrained
//! free variable, or snapshots a solution. Every alternative is attempted
//! under a checkpoint that is restored on all exit paths, so branches never
//! leak state into one another.

use std::collections::BTreeMap;

use opal_ast::{DeclId, ExprId};
use opal_types::{join, Type, TypeVarId};

use crate::bindings::TypeVariableBindings;
use crate::trace::SolveAction;
use crate::{
    Constraint, ConstraintSystem, ConversionRelation, EntryId, MatchOptions, OverloadSelection,
    SolveResult,
};

// ---------------------------------------------------------------------------
// Potential bindings
// ---------------------------------------------------------------------------

/// How a candidate type relates to the variable it may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PotentialBindingKind {
    /// The variable is bound exactly to this type.
    Exact,
    /// The variable converts into this type.
    Subtype,
    /// This type converts into the variable.
    Supertype,
}

/// One candidate concrete type for a free variable.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialBinding {
    pub kind: PotentialBindingKind,
    pub ty: Type,
}

/// The candidate types inferred for one free representative variable.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialBindings {
    pub var: TypeVarId,
    pub bindings: Vec<PotentialBinding>,
}

impl ConstraintSystem {
    /// Scan the store for candidate bindings of `var`.
    ///
    /// Bind constraints give exact candidates, conversions out of the
    /// variable give subtype candidates, conversions into the variable give
    /// supertype candidates. Coexisting supertype candidates collapse to
    /// their join when the join is useful (defined, not `Any`, not `Any?`).
    fn potential_bindings_for(&self, var: TypeVarId) -> PotentialBindings {
        let mut bindings: Vec<PotentialBinding> = Vec::new();
        let target = Type::Var(var);

        for entry in self.entries() {
            let (left, right, exact) = match &entry.constraint {
                Constraint::Bind {
                    left,
                    right,
                    conversion: None,
                } => (left, right, true),
                Constraint::Conversion {
                    left,
                    right,
                    conversion: None,
                } => (left, right, false),
                _ => continue,
            };
            let left = self.bindings.simplify(left);
            let right = self.bindings.simplify(right);

            if left == target && !right.has_variables() {
                let kind = if exact {
                    PotentialBindingKind::Exact
                } else {
                    PotentialBindingKind::Subtype
                };
                push_candidate(&mut bindings, kind, right);
            } else if right == target && !left.has_variables() {
                let kind = if exact {
                    PotentialBindingKind::Exact
                } else {
                    PotentialBindingKind::Supertype
                };
                push_candidate(&mut bindings, kind, left);
            }
        }

        bindings.sort_by_key(|b| b.kind);
        PotentialBindings { var, bindings }
    }

    /// The most narrowly determined candidate set across all free
    /// representatives: fewest candidates first, an exact candidate breaking
    /// ties, smaller variable ids last.
    pub(crate) fn best_potential_bindings(&self) -> Option<PotentialBindings> {
        self.known_type_vars()
            .filter(|v| self.bindings.is_representative(*v))
            .filter(|v| self.bindings.fixed_type(*v).is_none())
            .map(|v| self.potential_bindings_for(v))
            .filter(|p| !p.bindings.is_empty())
            .min_by_key(|p| {
                let has_exact = p
                    .bindings
                    .iter()
                    .any(|b| b.kind == PotentialBindingKind::Exact);
                (p.bindings.len(), !has_exact, p.var)
            })
    }

    /// Whether any created variable is still without a fixed type.
    pub(crate) fn has_free_type_vars(&self) -> bool {
        self.known_type_vars()
            .any(|v| self.bindings.fixed_type(v).is_none())
    }

    /// Freeze the current state into an immutable solution, with every
    /// recorded type fully substituted.
    pub(crate) fn solution_snapshot(&self) -> Solution {
        Solution {
            bindings: self.bindings.clone(),
            expr_types: self
                .expr_types
                .iter()
                .map(|(id, ty)| (*id, self.bindings.simplify(ty)))
                .collect(),
            decl_types: self
                .decl_types
                .iter()
                .map(|(id, ty)| (*id, self.bindings.simplify(ty)))
                .collect(),
            overload_selections: self
                .overload_selections
                .iter()
                .map(|(id, sel)| {
                    (
                        *id,
                        OverloadSelection {
                            choice: sel.choice,
                            opened_ty: self.bindings.simplify(&sel.opened_ty),
                        },
                    )
                })
                .collect(),
            relations: self
                .relations
                .iter()
                .map(|r| ConversionRelation {
                    conversion: r.conversion,
                    left: self.bindings.simplify(&r.left),
                    right: self.bindings.simplify(&r.right),
                })
                .collect(),
        }
    }
}

fn push_candidate(bindings: &mut Vec<PotentialBinding>, kind: PotentialBindingKind, ty: Type) {
    if ty == Type::Any {
        return;
    }
    // The same concrete type is the same guess whatever relation produced
    // it; keep the first occurrence only.
    if bindings.iter().any(|b| b.ty == ty) {
        return;
    }
    if kind == PotentialBindingKind::Supertype {
        if let Some(existing) = bindings
            .iter_mut()
            .find(|b| b.kind == PotentialBindingKind::Supertype)
        {
            let joined = join(&existing.ty, &ty);
            let useless =
                joined == Type::Any || joined == Type::optional(Type::Any);
            if !useless {
                existing.ty = joined;
                return;
            }
        }
    }
    bindings.push(PotentialBinding { kind, ty });
}

// ---------------------------------------------------------------------------
// Solutions
// ---------------------------------------------------------------------------

/// An immutable snapshot of a satisfying assignment: the full bindings
/// table, the node type maps, the chosen overloads, and every conversion
/// relation the solve recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    bindings: TypeVariableBindings,
    expr_types: BTreeMap<ExprId, Type>,
    decl_types: BTreeMap<DeclId, Type>,
    pub overload_selections: BTreeMap<ExprId, OverloadSelection>,
    pub relations: Vec<ConversionRelation>,
}

impl Solution {
    /// The solved type of an expression node, if it was visited.
    pub fn expr_ty(&self, expr: ExprId) -> Option<&Type> {
        self.expr_types.get(&expr)
    }

    /// The solved type of a declaration, if it participated.
    pub fn decl_ty(&self, decl: DeclId) -> Option<&Type> {
        self.decl_types.get(&decl)
    }

    /// The overload selected at a reference location, if any.
    pub fn selection_at(&self, expr: ExprId) -> Option<&OverloadSelection> {
        self.overload_selections.get(&expr)
    }

    /// Fully substitute a type against the solution's bindings.
    pub fn fixed_type(&self, ty: &Type) -> Type {
        self.bindings.simplify(ty)
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Depth-first search over the system's choice points.
///
/// Each step checkpoints, attempts one alternative, and restores, so that
/// every alternative starts from identical state. Solutions accumulate in
/// order of discovery; the checker consumes the first and does not rank.
pub struct Solver<'cs> {
    system: &'cs mut ConstraintSystem,
    solutions: Vec<Solution>,
}

impl<'cs> Solver<'cs> {
    /// Search for every solution reachable from the system's current state.
    pub fn solve(system: &'cs mut ConstraintSystem) -> Vec<Solution> {
        let mut solver = Solver {
            system,
            solutions: Vec::new(),
        };
        solver.component_step();
        solver.solutions
    }

    /// Whether a candidate may be attempted. Never restrictive today; kept
    /// as the single place a viability policy would slot into.
    fn is_viable_binding(&self, _candidate: &PotentialBinding) -> bool {
        true
    }

    /// Simplify, then branch on a disjunction, guess a variable binding, or
    /// snapshot a solution. Returns whether any branch below produced one.
    fn component_step(&mut self) -> bool {
        if !self.system.simplify() {
            return false;
        }

        let potential = self.system.best_potential_bindings();
        if let Some(disjunction) = self.system.find_disjunction() {
            return self.disjunction_step(disjunction);
        }
        if let Some(potential) = potential {
            return self.type_variable_step(potential);
        }
        if self.system.has_free_type_vars() {
            // Nothing left to branch on: the system is underconstrained.
            return false;
        }

        let solution = self.system.solution_snapshot();
        self.system
            .push_step(SolveAction::Solution, format!("solution {}", self.solutions.len()));
        self.solutions.push(solution);
        true
    }

    /// Try every candidate binding for the chosen variable.
    fn type_variable_step(&mut self, potential: PotentialBindings) -> bool {
        let PotentialBindings { var, bindings } = potential;
        let mut any_solved = false;
        for candidate in bindings {
            if !self.is_viable_binding(&candidate) {
                continue;
            }
            let state = self.system.snapshot();
            self.system.push_step(
                SolveAction::Checkpoint,
                format!("try {var} := {}", candidate.ty),
            );
            self.system
                .add_constraint(Constraint::bind(Type::Var(var), candidate.ty.clone()));
            if self.system.simplify() {
                any_solved |= self.component_step();
            }
            self.system.restore(state);
            self.system.push_step(SolveAction::Restore, format!("after {var}"));
        }
        any_solved
    }

    /// Try every alternative of a disjunction.
    ///
    /// The disjunction entry leaves the store while its branches run and is
    /// re-inserted on exit. A solved alternative contributes nothing extra;
    /// an ambiguous one re-enters the store as a plain entry; a failed one
    /// poisons only its own branch.
    fn disjunction_step(&mut self, entry_id: EntryId) -> bool {
        let Some(entry) = self.system.take_entry(entry_id) else {
            return false;
        };
        let Constraint::Disjunction(choices) = entry.constraint.clone() else {
            unreachable!("disjunction step requires a disjunction entry");
        };

        let mut any_solved = false;
        for choice in &choices {
            let state = self.system.snapshot();
            self.system
                .push_step(SolveAction::Disjunction, format!("try {choice}"));
            match self.system.simplify_constraint(choice, MatchOptions::default()) {
                SolveResult::Solved => {}
                SolveResult::Ambiguous => {
                    self.system.add_inactive(choice.clone());
                }
                SolveResult::Failure => {
                    self.system.fail(choice.clone());
                }
            }
            if self.system.simplify() {
                any_solved |= self.component_step();
            }
            self.system.restore(state);
            self.system
                .push_step(SolveAction::Restore, format!("after {choice}"));
        }

        self.system.insert_entry(entry);
        any_solved
    }
}
