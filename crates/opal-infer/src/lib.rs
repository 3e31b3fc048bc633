//! Constraint-based type inference for Opal.
//!
//! This crate implements:
//! - Constraint generation over name-resolved expression trees
//! - Constraint simplification with implicit-conversion matching
//! - A backtracking solver over overload and conversion choice points
//! - Solution application, rewriting trees to insert conversion nodes
//!
//! One [`ConstraintSystem`] lives per type-checked expression. Constraint
//! generation fills it with constraints and tentative node types, the
//! [`solve::Solver`] searches for assignments of concrete types to every
//! inference variable, and the checker applies the first solution back onto
//! the tree. Matching and simplification communicate through the internal
//! three-valued [`SolveResult`]; only pre-check failures and the absence of
//! any solution surface as diagnostics.

pub mod bindings;
pub mod solve;
pub mod trace;
pub mod typeck;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use opal_ast::{DeclId, ExprId};
use opal_types::{free_type_vars, Type, TypeVarId};

use bindings::TypeVariableBindings;

pub use opal_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
pub use solve::{Solution, Solver};
pub use typeck::{TypeCheckCallbacks, TypeChecker};

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// An implicit conversion the solver may introduce between two types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Structural equality, recursing through optionals.
    DeepEquality,
    /// Wrap a value in one or more optional layers.
    ValueToOptional,
    /// Convert between optionals of convertible wrapped types.
    OptionalToOptional,
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::DeepEquality => write!(f, "deep equality"),
            Conversion::ValueToOptional => write!(f, "value to optional"),
            Conversion::OptionalToOptional => write!(f, "optional to optional"),
        }
    }
}

/// A proof that a specific implicit conversion was used between two types.
///
/// Recorded whenever a conversion-tagged constraint simplifies successfully;
/// the apply phase consults these to decide which wrapper nodes to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRelation {
    pub conversion: Conversion,
    pub left: Type,
    pub right: Type,
}

// ---------------------------------------------------------------------------
// Overload choices
// ---------------------------------------------------------------------------

/// One candidate declaration for an overloaded reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverloadChoice {
    pub decl: DeclId,
}

/// A chosen overload together with the type it was introduced at.
#[derive(Debug, Clone, PartialEq)]
pub struct OverloadSelection {
    pub choice: OverloadChoice,
    pub opened_ty: Type,
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Which flavor of relation a type-to-type match enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Structural equality up to variable binding.
    Bind,
    /// Left is implicitly convertible to right.
    Conversion,
}

/// A constraint in the system.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Left and right must be structurally equal. A pre-chosen conversion
    /// pins the match to one conversion path (disjunction branches).
    Bind {
        left: Type,
        right: Type,
        conversion: Option<Conversion>,
    },
    /// Left must be implicitly convertible to right.
    Conversion {
        left: Type,
        right: Type,
        conversion: Option<Conversion>,
    },
    /// The callee type can be applied with the given function signature.
    /// Deferred until the callee type is known concrete.
    ApplicableFunction { signature: Type, callee: Type },
    /// Bind `var` to the interface type of one overload candidate, and
    /// record the selection at `location`.
    BindOverload {
        var: TypeVarId,
        choice: OverloadChoice,
        opened_ty: Type,
        location: ExprId,
    },
    /// Exactly one of the alternatives must hold.
    Disjunction(Vec<Constraint>),
}

impl Constraint {
    pub fn bind(left: Type, right: Type) -> Constraint {
        Constraint::Bind {
            left,
            right,
            conversion: None,
        }
    }

    pub fn conversion(left: Type, right: Type) -> Constraint {
        Constraint::Conversion {
            left,
            right,
            conversion: None,
        }
    }

    /// A Bind or Conversion constraint pinned to one conversion path.
    pub fn with_conversion(
        kind: MatchKind,
        left: Type,
        right: Type,
        conversion: Conversion,
    ) -> Constraint {
        match kind {
            MatchKind::Bind => Constraint::Bind {
                left,
                right,
                conversion: Some(conversion),
            },
            MatchKind::Conversion => Constraint::Conversion {
                left,
                right,
                conversion: Some(conversion),
            },
        }
    }

    /// Every type variable this constraint mentions, as written.
    pub fn mentioned_vars(&self) -> BTreeSet<TypeVarId> {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars(&self, vars: &mut BTreeSet<TypeVarId>) {
        match self {
            Constraint::Bind { left, right, .. } | Constraint::Conversion { left, right, .. } => {
                vars.extend(free_type_vars(left));
                vars.extend(free_type_vars(right));
            }
            Constraint::ApplicableFunction { signature, callee } => {
                vars.extend(free_type_vars(signature));
                vars.extend(free_type_vars(callee));
            }
            Constraint::BindOverload { var, opened_ty, .. } => {
                vars.insert(*var);
                vars.extend(free_type_vars(opened_ty));
            }
            Constraint::Disjunction(choices) => {
                for choice in choices {
                    choice.collect_vars(vars);
                }
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Bind {
                left,
                right,
                conversion: None,
            } => write!(f, "{left} == {right}"),
            Constraint::Bind {
                left,
                right,
                conversion: Some(conv),
            } => write!(f, "{left} == {right} via {conv}"),
            Constraint::Conversion {
                left,
                right,
                conversion: None,
            } => write!(f, "{left} ~> {right}"),
            Constraint::Conversion {
                left,
                right,
                conversion: Some(conv),
            } => write!(f, "{left} ~> {right} via {conv}"),
            Constraint::ApplicableFunction { signature, callee } => {
                write!(f, "{signature} applicable to {callee}")
            }
            Constraint::BindOverload { var, opened_ty, .. } => {
                write!(f, "{var} == overload {opened_ty}")
            }
            Constraint::Disjunction(choices) => {
                write!(f, "one of [")?;
                for (i, choice) in choices.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{choice}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Constraint entries
// ---------------------------------------------------------------------------

/// Identity of a constraint entry, stable across store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u32);

/// A stored constraint with its worklist bit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEntry {
    pub id: EntryId,
    pub constraint: Constraint,
    pub active: bool,
}

/// Internal outcome of matching or simplifying one constraint.
///
/// Never surfaced outside the solver: failure abandons the current search
/// branch, ambiguity leaves the constraint in the store for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveResult {
    Solved,
    Ambiguous,
    Failure,
}

/// Options threaded through type matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// When a match is ambiguous, re-introduce it as a stored constraint and
    /// report success instead of surfacing the ambiguity. Set for every
    /// sub-match performed while decomposing a compound type, where an
    /// ambiguous outcome would otherwise be unrepresentable.
    pub generate_constraints_when_ambiguous: bool,
}

impl MatchOptions {
    /// Options for sub-matches of a structural decomposition.
    pub fn decomposition() -> Self {
        Self {
            generate_constraints_when_ambiguous: true,
        }
    }
}

// ---------------------------------------------------------------------------
// The constraint system
// ---------------------------------------------------------------------------

/// The mutable bag of constraints, bindings, node types, and overload
/// selections for one expression's type-check.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSystem {
    pub(crate) bindings: TypeVariableBindings,
    entries: Vec<ConstraintEntry>,
    next_entry: u32,
    next_type_var: u32,
    pub(crate) expr_types: BTreeMap<ExprId, Type>,
    pub(crate) decl_types: BTreeMap<DeclId, Type>,
    pub(crate) overload_selections: BTreeMap<ExprId, OverloadSelection>,
    pub(crate) relations: Vec<ConversionRelation>,
    failed: Option<Constraint>,
    tracing: bool,
    steps: Vec<trace::SolveStep>,
}

/// A complete solver checkpoint: full-value copies of every piece of state
/// an attempt may mutate, so restoring cannot leak effects across search
/// branches.
#[derive(Debug, Clone, PartialEq)]
pub struct StepState {
    bindings: TypeVariableBindings,
    entries: Vec<ConstraintEntry>,
    next_entry: u32,
    next_type_var: u32,
    expr_types: BTreeMap<ExprId, Type>,
    decl_types: BTreeMap<DeclId, Type>,
    overload_selections: BTreeMap<ExprId, OverloadSelection>,
    relations: Vec<ConversionRelation>,
    failed: Option<Constraint>,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Fresh variables and node types --

    pub fn fresh_type_var(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next_type_var);
        self.next_type_var += 1;
        id
    }

    /// Ids of every type variable this system has created.
    pub fn known_type_vars(&self) -> impl Iterator<Item = TypeVarId> {
        (0..self.next_type_var).map(TypeVarId)
    }

    pub fn set_expr_ty(&mut self, expr: ExprId, ty: Type) {
        self.expr_types.insert(expr, ty);
    }

    pub fn expr_ty(&self, expr: ExprId) -> Option<&Type> {
        self.expr_types.get(&expr)
    }

    pub fn set_decl_ty(&mut self, decl: DeclId, ty: Type) {
        self.decl_types.insert(decl, ty);
    }

    pub fn decl_ty(&self, decl: DeclId) -> Option<&Type> {
        self.decl_types.get(&decl)
    }

    // -- Store management --

    /// Add a constraint as an active worklist entry.
    pub fn add_constraint(&mut self, constraint: Constraint) -> EntryId {
        self.push_entry(constraint, true)
    }

    /// Add a constraint without activating it. Used when a match was
    /// ambiguous and the constraint waits for a binding change, and for
    /// disjunctions, which only the solver can act on.
    pub fn add_inactive(&mut self, constraint: Constraint) -> EntryId {
        self.push_entry(constraint, false)
    }

    fn push_entry(&mut self, constraint: Constraint, active: bool) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.entries.push(ConstraintEntry {
            id,
            constraint,
            active,
        });
        id
    }

    /// Add an exactly-one-must-hold choice point.
    ///
    /// A single alternative is added directly; an empty alternative list can
    /// never hold and fails the system.
    pub fn add_disjunction(&mut self, mut choices: Vec<Constraint>) {
        match choices.len() {
            0 => self.fail(Constraint::Disjunction(choices)),
            1 => {
                let only = choices.pop().expect("length checked");
                self.add_constraint(only);
            }
            _ => {
                self.add_inactive(Constraint::Disjunction(choices));
            }
        }
    }

    /// Bind `bound_ty` to the interface type of a chosen declaration and
    /// record the selection at `location`.
    pub fn resolve_overload(
        &mut self,
        bound_ty: Type,
        choice: OverloadChoice,
        opened_ty: Type,
        location: ExprId,
    ) {
        self.add_constraint(Constraint::bind(bound_ty, opened_ty.clone()));
        self.overload_selections
            .insert(location, OverloadSelection { choice, opened_ty });
    }

    pub fn entries(&self) -> &[ConstraintEntry] {
        &self.entries
    }

    fn entry_index(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Remove an entry, returning it for later re-insertion.
    pub fn take_entry(&mut self, id: EntryId) -> Option<ConstraintEntry> {
        self.entry_index(id).map(|idx| self.entries.remove(idx))
    }

    /// Re-insert an entry previously removed with [`Self::take_entry`].
    pub fn insert_entry(&mut self, entry: ConstraintEntry) {
        self.entries.push(entry);
    }

    fn remove_entry(&mut self, id: EntryId) {
        self.take_entry(id);
    }

    /// The first active entry, if any.
    fn first_active(&self) -> Option<EntryId> {
        self.entries.iter().find(|e| e.active).map(|e| e.id)
    }

    /// The first disjunction entry, if any.
    pub fn find_disjunction(&self) -> Option<EntryId> {
        self.entries
            .iter()
            .find(|e| matches!(e.constraint, Constraint::Disjunction(_)))
            .map(|e| e.id)
    }

    pub fn constraint(&self, id: EntryId) -> Option<&Constraint> {
        self.entry_index(id).map(|idx| &self.entries[idx].constraint)
    }

    // -- Failure --

    pub fn fail(&mut self, constraint: Constraint) {
        self.push_step(trace::SolveAction::Failure, format!("{constraint}"));
        self.failed = Some(constraint);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn failed_constraint(&self) -> Option<&Constraint> {
        self.failed.as_ref()
    }

    // -- Bindings mutation with constraint re-activation --
    //
    // Whenever a variable's binding changes, every stored constraint that
    // mentions any member of its equivalence class becomes active again:
    // a match that was ambiguous before may now make progress.

    pub(crate) fn merge_vars(&mut self, a: TypeVarId, b: TypeVarId) {
        self.push_step(trace::SolveAction::Merge, format!("{a} with {b}"));
        self.bindings.merge(a, b);
        self.reactivate_class(a);
    }

    pub(crate) fn assign_var(&mut self, var: TypeVarId, ty: Type) {
        self.push_step(trace::SolveAction::Assign, format!("{var} := {ty}"));
        self.bindings.assign(var, ty);
        self.reactivate_class(var);
    }

    fn reactivate_class(&mut self, var: TypeVarId) {
        let members: BTreeSet<TypeVarId> = self.bindings.class_members(var).into_iter().collect();
        for entry in &mut self.entries {
            if !entry.active
                && !entry
                    .constraint
                    .mentioned_vars()
                    .is_disjoint(&members)
            {
                entry.active = true;
            }
        }
    }

    // -- Checkpoint / restore --

    /// Snapshot the complete solver-visible state.
    pub fn snapshot(&self) -> StepState {
        StepState {
            bindings: self.bindings.clone(),
            entries: self.entries.clone(),
            next_entry: self.next_entry,
            next_type_var: self.next_type_var,
            expr_types: self.expr_types.clone(),
            decl_types: self.decl_types.clone(),
            overload_selections: self.overload_selections.clone(),
            relations: self.relations.clone(),
            failed: self.failed.clone(),
        }
    }

    /// Restore a snapshot taken with [`Self::snapshot`]. The solve trace is
    /// deliberately kept: it records the whole search, not one branch.
    pub fn restore(&mut self, state: StepState) {
        let StepState {
            bindings,
            entries,
            next_entry,
            next_type_var,
            expr_types,
            decl_types,
            overload_selections,
            relations,
            failed,
        } = state;
        self.bindings = bindings;
        self.entries = entries;
        self.next_entry = next_entry;
        self.next_type_var = next_type_var;
        self.expr_types = expr_types;
        self.decl_types = decl_types;
        self.overload_selections = overload_selections;
        self.relations = relations;
        self.failed = failed;
    }

    // -- Tracing --

    /// Enable step-by-step solve tracing for observability tools.
    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn solve_trace(&self) -> &[trace::SolveStep] {
        &self.steps
    }

    pub(crate) fn push_step(&mut self, action: trace::SolveAction, detail: String) {
        if !self.tracing {
            return;
        }
        let step = self.steps.len();
        self.steps.push(trace::SolveStep {
            step,
            action,
            detail,
        });
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Match two types under a bind or conversion relation.
    ///
    /// Both sides are simplified against the current bindings first. A bare
    /// representative variable on either side either merges (variable to
    /// variable), binds (variable to concrete under `Bind`), or leaves the
    /// match ambiguous (under `Conversion`, where the viable conversions
    /// depend on the eventual concrete type).
    pub(crate) fn match_types(
        &mut self,
        kind: MatchKind,
        left: &Type,
        right: &Type,
        options: MatchOptions,
    ) -> SolveResult {
        let left = self.bindings.simplify(left);
        let right = self.bindings.simplify(right);

        let left_var = left.as_variable();
        let right_var = right.as_variable();
        if left_var.is_some() || right_var.is_some() {
            if let (Some(l), Some(r)) = (left_var, right_var) {
                if l == r {
                    return SolveResult::Solved;
                }
            }
            return match kind {
                MatchKind::Bind => match (left_var, right_var) {
                    (Some(l), Some(r)) => {
                        self.merge_vars(l, r);
                        SolveResult::Solved
                    }
                    (Some(v), None) => self.match_types_bind(v, &right),
                    (None, Some(v)) => self.match_types_bind(v, &left),
                    (None, None) => unreachable!("variable case requires a variable"),
                },
                MatchKind::Conversion => {
                    if options.generate_constraints_when_ambiguous {
                        self.add_inactive(Constraint::conversion(left, right));
                        SolveResult::Solved
                    } else {
                        SolveResult::Ambiguous
                    }
                }
            };
        }

        self.match_fixed_types(kind, &left, &right)
    }

    /// Bind a free representative variable to a concrete type, occurs check
    /// first: a variable must never be fixed to a type mentioning itself.
    fn match_types_bind(&mut self, var: TypeVarId, ty: &Type) -> SolveResult {
        if free_type_vars(ty).contains(&var) {
            return SolveResult::Failure;
        }
        self.assign_var(var, ty.clone());
        SolveResult::Solved
    }

    /// Match two types with no variable at the top level.
    ///
    /// Collects the candidate conversions the shapes admit. No candidate is
    /// a failure; a single candidate is simplified immediately; several
    /// become a disjunction for the solver to explore.
    fn match_fixed_types(&mut self, kind: MatchKind, left: &Type, right: &Type) -> SolveResult {
        if let (Type::Function { .. }, Type::Function { .. }) = (left, right) {
            return self.match_function_types(kind, left, right);
        }

        let mut candidates = Vec::new();
        let same_primitive = matches!((left, right), (Type::Prim(l), Type::Prim(r)) if l == r);
        let both_optional =
            matches!((left, right), (Type::Optional(_), Type::Optional(_)));
        if same_primitive || both_optional {
            candidates.push(Conversion::DeepEquality);
        }
        if kind == MatchKind::Conversion {
            if both_optional {
                candidates.push(Conversion::OptionalToOptional);
            }
            if left.optional_depth() < right.optional_depth() {
                candidates.push(Conversion::ValueToOptional);
            }
        }

        match candidates.len() {
            0 => SolveResult::Failure,
            1 => self.simplify_with_conversion(kind, left, right, candidates[0]),
            _ => {
                let choices = candidates
                    .into_iter()
                    .map(|conversion| {
                        // A deep-equality branch pins the types together
                        // exactly; the other branches keep the original kind.
                        let branch_kind = if conversion == Conversion::DeepEquality {
                            MatchKind::Bind
                        } else {
                            kind
                        };
                        Constraint::with_conversion(
                            branch_kind,
                            left.clone(),
                            right.clone(),
                            conversion,
                        )
                    })
                    .collect();
                self.add_disjunction(choices);
                SolveResult::Solved
            }
        }
    }

    /// Match two function types: contravariant in the parameter under
    /// conversion, covariant in the result.
    fn match_function_types(&mut self, kind: MatchKind, left: &Type, right: &Type) -> SolveResult {
        let (Type::Function {
            param: left_param,
            result: left_result,
        }, Type::Function {
            param: right_param,
            result: right_result,
        }) = (left, right)
        else {
            unreachable!("function matching requires function types");
        };

        let param = self.match_types(
            kind,
            right_param,
            left_param,
            MatchOptions::decomposition(),
        );
        if param == SolveResult::Failure {
            return SolveResult::Failure;
        }
        let result = self.match_types(
            kind,
            left_result,
            right_result,
            MatchOptions::decomposition(),
        );
        match (param, result) {
            (SolveResult::Solved, SolveResult::Solved) => SolveResult::Solved,
            (_, SolveResult::Failure) => SolveResult::Failure,
            // Decomposition options make ambiguity unrepresentable here.
            _ => unreachable!("ambiguous sub-match during function decomposition"),
        }
    }

    /// Structural equality: primitives by name, optionals by binding their
    /// wrapped types, everything else fails.
    fn match_deep_equality_types(&mut self, left: &Type, right: &Type) -> SolveResult {
        match (left, right) {
            (Type::Prim(l), Type::Prim(r)) => {
                if l == r {
                    SolveResult::Solved
                } else {
                    SolveResult::Failure
                }
            }
            (Type::Optional(l), Type::Optional(r)) => {
                self.match_types(MatchKind::Bind, l, r, MatchOptions::decomposition())
            }
            _ => SolveResult::Failure,
        }
    }

    // -----------------------------------------------------------------------
    // Simplification
    // -----------------------------------------------------------------------

    /// Reduce one constraint to solved, ambiguous, or failure, decomposing
    /// compound constraints into smaller stored ones where possible.
    pub(crate) fn simplify_constraint(
        &mut self,
        constraint: &Constraint,
        options: MatchOptions,
    ) -> SolveResult {
        match constraint {
            Constraint::Bind {
                left,
                right,
                conversion: None,
            } => self.match_types(MatchKind::Bind, left, right, options),
            Constraint::Conversion {
                left,
                right,
                conversion: None,
            } => self.match_types(MatchKind::Conversion, left, right, options),
            Constraint::Bind {
                left,
                right,
                conversion: Some(conversion),
            } => self.simplify_with_conversion(MatchKind::Bind, left, right, *conversion),
            Constraint::Conversion {
                left,
                right,
                conversion: Some(conversion),
            } => self.simplify_with_conversion(MatchKind::Conversion, left, right, *conversion),
            Constraint::ApplicableFunction { signature, callee } => {
                self.simplify_applicable_function(signature, callee, options)
            }
            Constraint::BindOverload {
                var,
                choice,
                opened_ty,
                location,
            } => {
                self.resolve_overload(Type::Var(*var), *choice, opened_ty.clone(), *location);
                SolveResult::Solved
            }
            // Choice points cannot be simplified in place; picking a branch
            // is the solver's job.
            Constraint::Disjunction(_) => SolveResult::Ambiguous,
        }
    }

    /// An applicability constraint stays deferred until the callee type is
    /// concrete, then decomposes: the parameter accepts a conversion, the
    /// result is bound exactly.
    fn simplify_applicable_function(
        &mut self,
        signature: &Type,
        callee: &Type,
        options: MatchOptions,
    ) -> SolveResult {
        let callee = self.bindings.simplify(callee);
        if callee.is_variable() {
            if options.generate_constraints_when_ambiguous {
                self.add_inactive(Constraint::ApplicableFunction {
                    signature: signature.clone(),
                    callee,
                });
                return SolveResult::Solved;
            }
            return SolveResult::Ambiguous;
        }
        let (Type::Function {
            param: sig_param,
            result: sig_result,
        }, Type::Function {
            param: callee_param,
            result: callee_result,
        }) = (signature, &callee)
        else {
            return SolveResult::Failure;
        };

        let param = self.match_types(
            MatchKind::Conversion,
            sig_param,
            callee_param,
            MatchOptions::decomposition(),
        );
        if param == SolveResult::Failure {
            return SolveResult::Failure;
        }
        let result = self.match_types(
            MatchKind::Bind,
            sig_result,
            callee_result,
            MatchOptions::decomposition(),
        );
        if result == SolveResult::Failure {
            return SolveResult::Failure;
        }
        SolveResult::Solved
    }

    /// Simplify a constraint pinned to one conversion path, recording the
    /// conversion relation on success.
    fn simplify_with_conversion(
        &mut self,
        kind: MatchKind,
        left: &Type,
        right: &Type,
        conversion: Conversion,
    ) -> SolveResult {
        let left = self.bindings.simplify(left);
        let right = self.bindings.simplify(right);

        let result = match conversion {
            Conversion::DeepEquality => self.match_deep_equality_types(&left, &right),
            Conversion::ValueToOptional => match right.unwrap_optional() {
                Some(right_wrapped) => {
                    let right_wrapped = right_wrapped.clone();
                    let unwrapped_left =
                        left.unwrap_optional().cloned().unwrap_or_else(|| left.clone());
                    self.match_types(
                        kind,
                        &unwrapped_left,
                        &right_wrapped,
                        MatchOptions::decomposition(),
                    )
                }
                None => SolveResult::Failure,
            },
            Conversion::OptionalToOptional => {
                match (left.unwrap_optional(), right.unwrap_optional()) {
                    (Some(left_wrapped), Some(right_wrapped)) => {
                        let (left_wrapped, right_wrapped) =
                            (left_wrapped.clone(), right_wrapped.clone());
                        self.match_types(
                            kind,
                            &left_wrapped,
                            &right_wrapped,
                            MatchOptions::decomposition(),
                        )
                    }
                    _ => SolveResult::Failure,
                }
            }
        };

        if result == SolveResult::Solved {
            self.relations.push(ConversionRelation {
                conversion,
                left,
                right,
            });
        }
        result
    }

    /// Drive the worklist until no entry is active or the system fails.
    ///
    /// Returns false iff the system is now failed. Solved entries leave the
    /// store; ambiguous entries stay, inactive, until a binding change
    /// re-activates them; a failed entry becomes the failure witness.
    pub fn simplify(&mut self) -> bool {
        while !self.is_failed() {
            let Some(id) = self.first_active() else {
                break;
            };
            let idx = self.entry_index(id).expect("active entry exists");
            self.entries[idx].active = false;
            let constraint = self.entries[idx].constraint.clone();

            let result = self.simplify_constraint(&constraint, MatchOptions::default());
            self.push_step(
                trace::SolveAction::Simplify,
                format!("{constraint} => {result:?}"),
            );
            match result {
                SolveResult::Solved => self.remove_entry(id),
                SolveResult::Ambiguous => {}
                SolveResult::Failure => {
                    self.remove_entry(id);
                    self.fail(constraint);
                }
            }
        }
        !self.is_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> Type {
        Type::int()
    }

    fn opt(ty: Type) -> Type {
        Type::optional(ty)
    }

    fn fun(param: Type, result: Type) -> Type {
        Type::function(param, result)
    }

    #[test]
    fn bind_assigns_variable_to_concrete_type() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(Type::Var(v), int()));
        assert!(cts.simplify());
        assert_eq!(cts.bindings.fixed_type(v), Some(int()));
    }

    #[test]
    fn bind_merges_two_variables() {
        let mut cts = ConstraintSystem::new();
        let a = cts.fresh_type_var();
        let b = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(Type::Var(b), Type::Var(a)));
        assert!(cts.simplify());
        assert_eq!(cts.bindings.representative(b), a);
    }

    #[test]
    fn occurs_check_prevents_infinite_type() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(
            Type::Var(v),
            fun(Type::Var(v), int()),
        ));
        assert!(!cts.simplify());
        assert!(cts.is_failed());
    }

    #[test]
    fn mismatched_primitives_fail() {
        let mut cts = ConstraintSystem::new();
        cts.add_constraint(Constraint::bind(int(), Type::prim("Bool")));
        assert!(!cts.simplify());
    }

    #[test]
    fn conversion_with_free_variable_stays_ambiguous() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::conversion(int(), Type::Var(v)));
        assert!(cts.simplify());
        // The entry survives, inactive, waiting for a binding change.
        assert_eq!(cts.entries().len(), 1);
        assert!(!cts.entries()[0].active);
    }

    #[test]
    fn binding_change_reactivates_mentioning_constraints() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::conversion(int(), Type::Var(v)));
        assert!(cts.simplify());

        cts.add_constraint(Constraint::bind(Type::Var(v), opt(int())));
        assert!(cts.simplify());
        // Int ~> Int? resolves as value-to-optional once v is fixed.
        assert!(cts.entries().is_empty());
        assert!(cts
            .relations
            .iter()
            .any(|r| r.conversion == Conversion::ValueToOptional
                && r.left == int()
                && r.right == opt(int())));
    }

    #[test]
    fn function_conversion_is_contravariant_in_parameter() {
        // (Int?) -> Int converts to (Int) -> Int?: the parameter narrows
        // against conversion direction, the result widens with it.
        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(
            MatchKind::Conversion,
            &fun(opt(int()), int()),
            &fun(int(), opt(int())),
            MatchOptions::default(),
        );
        assert_eq!(result, SolveResult::Solved);
        assert!(cts.simplify());
        let value_to_optional: Vec<_> = cts
            .relations
            .iter()
            .filter(|r| r.conversion == Conversion::ValueToOptional)
            .collect();
        // One lift for the parameter (Int into Int?), one for the result.
        assert_eq!(value_to_optional.len(), 2);
    }

    #[test]
    fn function_conversion_rejects_covariant_parameter() {
        // (Int) -> Int does not convert to (Int?) -> Int: a caller could
        // pass nil to a function that never accepted it.
        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(
            MatchKind::Conversion,
            &fun(int(), int()),
            &fun(opt(int()), int()),
            MatchOptions::default(),
        );
        assert_eq!(result, SolveResult::Failure);
    }

    #[test]
    fn optional_pair_produces_disjunction() {
        let mut cts = ConstraintSystem::new();
        let result = cts.match_types(
            MatchKind::Conversion,
            &opt(int()),
            &opt(int()),
            MatchOptions::default(),
        );
        assert_eq!(result, SolveResult::Solved);
        let disjunction = cts.find_disjunction().expect("choice point stored");
        let Some(Constraint::Disjunction(choices)) = cts.constraint(disjunction) else {
            panic!("expected a disjunction entry");
        };
        assert_eq!(choices.len(), 2);
    }

    #[test]
    fn empty_disjunction_fails_the_system() {
        let mut cts = ConstraintSystem::new();
        cts.add_disjunction(Vec::new());
        assert!(cts.is_failed());
    }

    #[test]
    fn single_alternative_disjunction_is_added_directly() {
        let mut cts = ConstraintSystem::new();
        cts.add_disjunction(vec![Constraint::bind(int(), int())]);
        assert!(cts.find_disjunction().is_none());
        assert!(cts.simplify());
    }

    #[test]
    fn snapshot_restore_round_trips_exactly() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::conversion(int(), Type::Var(v)));
        assert!(cts.simplify());

        let before = cts.snapshot();
        let saved = cts.snapshot();

        cts.add_constraint(Constraint::bind(Type::Var(v), opt(int())));
        let w = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(Type::Var(w), int()));
        assert!(cts.simplify());
        assert_ne!(cts.snapshot(), before);

        cts.restore(saved);
        assert_eq!(cts.snapshot(), before);
    }

    #[test]
    fn tracing_records_solve_steps() {
        let mut cts = ConstraintSystem::new();
        cts.enable_tracing();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(Type::Var(v), int()));
        assert!(cts.simplify());
        assert!(!cts.solve_trace().is_empty());
    }

    #[test]
    fn tracing_is_off_by_default() {
        let mut cts = ConstraintSystem::new();
        let v = cts.fresh_type_var();
        cts.add_constraint(Constraint::bind(Type::Var(v), int()));
        assert!(cts.simplify());
        assert!(cts.solve_trace().is_empty());
    }
}

#[cfg(test)]
mod prop_tests;
