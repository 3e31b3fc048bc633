//! The type checker façade: pre-check, constraint generation, solution
//! application, and the per-statement driver.
//!
//! [`TypeChecker::type_check`] walks a source file's statements in order.
//! Function declarations contribute only their interface types (bodies are
//! external to this core); variable declarations type-check their
//! initializer against the declared or inferred type; bare expressions
//! type-check directly. Each expression check runs the full pipeline:
//! pre-check resolves name references, a fresh [`ConstraintSystem`] collects
//! constraints from a post-order visit, the [`Solver`] searches for
//! solutions, and the first solution is applied back onto the tree,
//! inserting implicit-conversion wrapper nodes where the solve used one.

use opal_ast::{CtxId, DeclId, DeclKind, ExprId, ExprKind, SourceFile, Span, Stmt};
use opal_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
use opal_types::Type;

use crate::solve::{Solution, Solver};
use crate::{Constraint, ConstraintSystem, Conversion, OverloadChoice};

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Hook invoked after constraint generation, before solving.
pub type GenerateHook<'a> =
    Box<dyn FnMut(&mut SourceFile, &mut ConstraintSystem, ExprId) -> Result<(), DiagnosticError> + 'a>;

/// Hook invoked with a selected or applied solution; may rewrite the
/// expression and must return the (possibly new) root.
pub type SolutionHook<'a> = Box<
    dyn FnMut(
            &mut SourceFile,
            &mut ConstraintSystem,
            &Solution,
            ExprId,
        ) -> Result<ExprId, DiagnosticError>
        + 'a,
>;

/// Optional hooks around one expression type-check.
///
/// The variable-declaration driver uses these to wire the initializer's
/// type to the declared type and to coerce the applied initializer.
#[derive(Default)]
pub struct TypeCheckCallbacks<'a> {
    pub did_generate_constraints: Option<GenerateHook<'a>>,
    pub did_found_solution: Option<SolutionHook<'a>>,
    pub did_apply_solution: Option<SolutionHook<'a>>,
}

// ---------------------------------------------------------------------------
// The checker
// ---------------------------------------------------------------------------

/// Per-source-file type checker. Mutates the tree in place.
pub struct TypeChecker<'a> {
    source: &'a mut SourceFile,
}

impl<'a> TypeChecker<'a> {
    pub fn new(source: &'a mut SourceFile) -> Self {
        Self { source }
    }

    /// Type-check every statement in order.
    pub fn type_check(&mut self) -> Result<(), DiagnosticError> {
        for stmt in self.source.statements.clone() {
            match stmt {
                Stmt::Decl(decl) => self.type_check_decl(decl)?,
                Stmt::Expr(expr) => {
                    let ctx = self.source.root_context();
                    self.type_check_expr(expr, ctx, TypeCheckCallbacks::default())?;
                }
            }
        }
        Ok(())
    }

    fn type_check_decl(&mut self, decl: DeclId) -> Result<(), DiagnosticError> {
        match self.source.decl(decl).kind.clone() {
            // Signatures only; the body lives outside this core.
            DeclKind::Func { .. } => Ok(()),
            DeclKind::Var {
                annotation,
                initializer: None,
                ..
            } => {
                self.source.decl_mut(decl).ty = annotation;
                Ok(())
            }
            DeclKind::Var {
                initializer: Some(init),
                ..
            } => self.type_check_var_decl(decl, init),
        }
    }

    /// Type-check a variable declaration's initializer against the declared
    /// type (or a fresh variable when the declaration is unannotated).
    fn type_check_var_decl(&mut self, decl: DeclId, init: ExprId) -> Result<(), DiagnosticError> {
        let callbacks = TypeCheckCallbacks {
            did_generate_constraints: Some(Box::new(move |source, cts, expr| {
                let annotation = match &source.decl(decl).kind {
                    DeclKind::Var { annotation, .. } => annotation.clone(),
                    DeclKind::Func { .. } => None,
                };
                let declared = annotation.unwrap_or_else(|| Type::Var(cts.fresh_type_var()));
                cts.set_decl_ty(decl, declared.clone());
                let init_ty = cts
                    .expr_ty(expr)
                    .cloned()
                    .expect("initializer was visited during generation");
                cts.add_constraint(Constraint::conversion(init_ty, declared));
                Ok(())
            })),
            did_found_solution: None,
            did_apply_solution: Some(Box::new(move |source, _cts, solution, expr| {
                let declared = solution
                    .decl_ty(decl)
                    .cloned()
                    .expect("declaration was typed by the solution");
                let coerced = coerce(source, solution, expr, &declared)?;
                let slot = source.decl_mut(decl);
                slot.ty = Some(declared);
                if let DeclKind::Var { initializer, .. } = &mut slot.kind {
                    *initializer = Some(coerced);
                }
                Ok(coerced)
            })),
        };
        self.type_check_expr(init, self.source.root_context(), callbacks)?;
        Ok(())
    }

    /// Run the full pipeline on one expression: pre-check, generate, solve,
    /// apply. Returns the root of the applied tree.
    pub fn type_check_expr(
        &mut self,
        expr: ExprId,
        ctx: CtxId,
        mut callbacks: TypeCheckCallbacks<'_>,
    ) -> Result<ExprId, DiagnosticError> {
        self.pre_check_expr(expr, ctx)?;

        let mut cts = ConstraintSystem::new();
        generate_constraints(self.source, &mut cts, expr)?;
        if let Some(hook) = callbacks.did_generate_constraints.as_mut() {
            hook(self.source, &mut cts, expr)?;
        }

        let solutions = Solver::solve(&mut cts);
        let Some(solution) = solutions.into_iter().next() else {
            let span = self.source.expr(expr).span;
            return Err(error_at(Category::NoSolution, "no solution", span));
        };

        let mut root = expr;
        if let Some(hook) = callbacks.did_found_solution.as_mut() {
            root = hook(self.source, &mut cts, &solution, root)?;
        }
        let mut root = self.apply_solution(&solution, root)?;
        if let Some(hook) = callbacks.did_apply_solution.as_mut() {
            root = hook(self.source, &mut cts, &solution, root)?;
        }
        Ok(root)
    }

    // -----------------------------------------------------------------------
    // Pre-check: name resolution
    // -----------------------------------------------------------------------

    /// Replace every unresolved reference with a resolved or overloaded one.
    fn pre_check_expr(&mut self, expr: ExprId, ctx: CtxId) -> Result<(), DiagnosticError> {
        match self.source.expr(expr).kind.clone() {
            ExprKind::UnresolvedDeclRef(name) => {
                let targets = self.source.resolve(ctx, &name);
                let span = self.source.expr(expr).span;
                let resolved = match targets.len() {
                    0 => {
                        return Err(error_at(
                            Category::UnresolvedName,
                            format!("failed to resolve: {name}"),
                            span,
                        ));
                    }
                    1 => ExprKind::DeclRef(targets[0]),
                    _ => ExprKind::OverloadedDeclRef(targets),
                };
                self.source.expr_mut(expr).kind = resolved;
            }
            ExprKind::Call { callee, argument } => {
                self.pre_check_expr(callee, ctx)?;
                self.pre_check_expr(argument, ctx)?;
            }
            ExprKind::Closure {
                ctx: closure_ctx,
                body,
                ..
            } => {
                for sub in body {
                    self.pre_check_expr(sub, closure_ctx)?;
                }
            }
            ExprKind::InjectIntoOptional(sub)
            | ExprKind::BindOptional(sub)
            | ExprKind::OptionalEvaluation(sub) => {
                self.pre_check_expr(sub, ctx)?;
            }
            ExprKind::IntegerLiteral(_)
            | ExprKind::DeclRef(_)
            | ExprKind::OverloadedDeclRef(_) => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Solution application
    // -----------------------------------------------------------------------

    /// Post-order walk assigning solved types and inserting implicit
    /// conversions: call arguments coerce to the callee's parameter type,
    /// and a closure with a declared return type coerces its tail
    /// expression.
    pub(crate) fn apply_solution(
        &mut self,
        solution: &Solution,
        expr: ExprId,
    ) -> Result<ExprId, DiagnosticError> {
        match self.source.expr(expr).kind.clone() {
            ExprKind::IntegerLiteral(_)
            | ExprKind::DeclRef(_)
            | ExprKind::OverloadedDeclRef(_) => {
                self.set_expr_ty(expr, solution);
            }
            ExprKind::UnresolvedDeclRef(name) => {
                let span = self.source.expr(expr).span;
                return Err(error_at(
                    Category::InvalidNodeDuringApply,
                    format!("unresolved reference `{name}` survived into apply"),
                    span,
                ));
            }
            ExprKind::Call { callee, argument } => {
                self.apply_solution(solution, callee)?;
                self.apply_solution(solution, argument)?;
                self.set_expr_ty(expr, solution);
                if let Some(Type::Function { param, .. }) = self.source.expr(callee).ty.clone() {
                    let coerced = coerce(self.source, solution, argument, param.as_ref())?;
                    if let ExprKind::Call {
                        argument: arg_slot, ..
                    } = &mut self.source.expr_mut(expr).kind
                    {
                        *arg_slot = coerced;
                    }
                }
            }
            ExprKind::Closure {
                param,
                return_ty,
                body,
                ..
            } => {
                for sub in &body {
                    self.apply_solution(solution, *sub)?;
                }
                self.set_expr_ty(expr, solution);
                if let Some(ty) = solution.decl_ty(param) {
                    self.source.decl_mut(param).ty = Some(ty.clone());
                }
                if let (Some(ret), Some(last)) = (&return_ty, body.last().copied()) {
                    let coerced = coerce(self.source, solution, last, ret)?;
                    if let ExprKind::Closure { body: body_slot, .. } =
                        &mut self.source.expr_mut(expr).kind
                    {
                        *body_slot
                            .last_mut()
                            .expect("closure body checked non-empty") = coerced;
                    }
                }
            }
            // Wrappers only exist in already-applied trees; a second pass
            // descends through them and changes nothing.
            ExprKind::InjectIntoOptional(sub)
            | ExprKind::BindOptional(sub)
            | ExprKind::OptionalEvaluation(sub) => {
                self.apply_solution(solution, sub)?;
            }
        }
        Ok(expr)
    }

    fn set_expr_ty(&mut self, expr: ExprId, solution: &Solution) {
        if let Some(ty) = solution.expr_ty(expr) {
            self.source.expr_mut(expr).ty = Some(ty.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Constraint generation
// ---------------------------------------------------------------------------

/// Post-order visit of an expression tree, recording a tentative type for
/// every node and emitting the constraints that relate them.
pub(crate) fn generate_constraints(
    source: &SourceFile,
    cts: &mut ConstraintSystem,
    expr: ExprId,
) -> Result<Type, DiagnosticError> {
    let node = source.expr(expr);
    let span = node.span;
    let ty = match node.kind.clone() {
        ExprKind::IntegerLiteral(_) => Type::int(),

        ExprKind::DeclRef(target) => {
            let var = Type::Var(cts.fresh_type_var());
            let opened = opened_type(source, cts, target, span)?;
            cts.resolve_overload(var.clone(), OverloadChoice { decl: target }, opened, expr);
            var
        }

        ExprKind::OverloadedDeclRef(targets) => {
            let var = cts.fresh_type_var();
            let mut choices = Vec::with_capacity(targets.len());
            for target in targets {
                choices.push(Constraint::BindOverload {
                    var,
                    choice: OverloadChoice { decl: target },
                    opened_ty: opened_type(source, cts, target, span)?,
                    location: expr,
                });
            }
            cts.add_disjunction(choices);
            Type::Var(var)
        }

        ExprKind::Call { callee, argument } => {
            let callee_ty = generate_constraints(source, cts, callee)?;
            let arg_ty = generate_constraints(source, cts, argument)?;
            let var = Type::Var(cts.fresh_type_var());
            cts.add_constraint(Constraint::ApplicableFunction {
                signature: Type::function(arg_ty, var.clone()),
                callee: callee_ty,
            });
            var
        }

        ExprKind::Closure {
            param,
            return_ty,
            body,
            ..
        } => {
            let annotation = match &source.decl(param).kind {
                DeclKind::Var { annotation, .. } => annotation.clone(),
                DeclKind::Func { .. } => None,
            };
            let param_ty = annotation.unwrap_or_else(|| Type::Var(cts.fresh_type_var()));
            cts.set_decl_ty(param, param_ty.clone());

            let tail = match body.as_slice() {
                [only] => *only,
                _ => {
                    return Err(error_at(
                        Category::UnsupportedClosureBody,
                        "closure bodies must be a single expression",
                        span,
                    ));
                }
            };
            let body_ty = generate_constraints(source, cts, tail)?;
            let result_ty = return_ty.unwrap_or_else(|| Type::Var(cts.fresh_type_var()));
            cts.add_constraint(Constraint::conversion(body_ty, result_ty.clone()));
            Type::function(param_ty, result_ty)
        }

        ExprKind::UnresolvedDeclRef(name) => {
            return Err(error_at(
                Category::InvalidNodeDuringGeneration,
                format!("unresolved reference `{name}` survived pre-check"),
                span,
            ));
        }

        ExprKind::InjectIntoOptional(_)
        | ExprKind::BindOptional(_)
        | ExprKind::OptionalEvaluation(_) => {
            return Err(error_at(
                Category::InvalidNodeDuringGeneration,
                "conversion nodes cannot appear before a solution is applied",
                span,
            ));
        }
    };
    cts.set_expr_ty(expr, ty.clone());
    Ok(ty)
}

/// The type at which a reference to `target` is introduced: the tentative
/// type recorded for it in this system (closure parameters), else its
/// declared interface type.
fn opened_type(
    source: &SourceFile,
    cts: &ConstraintSystem,
    target: DeclId,
    span: Span,
) -> Result<Type, DiagnosticError> {
    cts.decl_ty(target)
        .cloned()
        .or_else(|| source.decl(target).interface_ty().cloned())
        .ok_or_else(|| {
            error_at(
                Category::UnresolvedName,
                format!("failed to resolve: {}", source.decl(target).name()),
                span,
            )
        })
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Rewrite `expr` to produce a value of `to_ty`, inserting conversion nodes
/// as dictated by the solution's recorded conversion relations.
pub fn coerce(
    source: &mut SourceFile,
    solution: &Solution,
    expr: ExprId,
    to_ty: &Type,
) -> Result<ExprId, DiagnosticError> {
    let from_ty = source
        .expr(expr)
        .ty
        .clone()
        .expect("coercion requires an applied expression");
    if &from_ty == to_ty {
        return Ok(expr);
    }

    if let Some(relation) = solution
        .relations
        .iter()
        .find(|r| r.left == from_ty && &r.right == to_ty)
    {
        return match relation.conversion {
            Conversion::DeepEquality => Ok(expr),
            Conversion::ValueToOptional => {
                let Some(wrapped) = to_ty.unwrap_optional().cloned() else {
                    return Err(unconsidered(&from_ty, to_ty, source.expr(expr).span));
                };
                let sub = coerce(source, solution, expr, &wrapped)?;
                Ok(wrap_conversion(
                    source,
                    ExprKind::InjectIntoOptional,
                    sub,
                    to_ty.clone(),
                ))
            }
            Conversion::OptionalToOptional => {
                coerce_optional_to_optional(source, solution, expr, to_ty)
            }
        };
    }

    if let Some(wrapped) = to_ty.unwrap_optional().cloned() {
        if from_ty.unwrap_optional().is_some() {
            return coerce_optional_to_optional(source, solution, expr, to_ty);
        }
        let sub = coerce(source, solution, expr, &wrapped)?;
        return Ok(wrap_conversion(
            source,
            ExprKind::InjectIntoOptional,
            sub,
            to_ty.clone(),
        ));
    }

    Err(unconsidered(&from_ty, to_ty, source.expr(expr).span))
}

/// Convert between two optional types.
///
/// When the target type is the source type lifted by extra optional layers,
/// the conversion is pure lifting: nested injections, outermost first.
/// Otherwise the source is unwrapped, coerced, and re-wrapped inside an
/// optional-evaluation scope, short-circuiting when the source is nil.
fn coerce_optional_to_optional(
    source: &mut SourceFile,
    solution: &Solution,
    expr: ExprId,
    to_ty: &Type,
) -> Result<ExprId, DiagnosticError> {
    let from_ty = source
        .expr(expr)
        .ty
        .clone()
        .expect("coercion requires an applied expression");
    let to_chain = to_ty.optional_chain();
    let from_depth = from_ty.optional_chain().len();
    let to_depth = to_chain.len();

    if to_depth > from_depth && to_chain[to_depth - from_depth] == from_ty {
        let mut out = expr;
        for layer in (0..to_depth - from_depth).rev() {
            out = wrap_conversion(
                source,
                ExprKind::InjectIntoOptional,
                out,
                to_chain[layer].clone(),
            );
        }
        return Ok(out);
    }

    let span = source.expr(expr).span;
    let Some(from_wrapped) = from_ty.unwrap_optional().cloned() else {
        return Err(unconsidered(&from_ty, to_ty, span));
    };
    let Some(to_wrapped) = to_ty.unwrap_optional().cloned() else {
        return Err(unconsidered(&from_ty, to_ty, span));
    };

    let bound = wrap_conversion(source, ExprKind::BindOptional, expr, from_wrapped);
    let converted = coerce(source, solution, bound, &to_wrapped)?;
    let injected = wrap_conversion(
        source,
        ExprKind::InjectIntoOptional,
        converted,
        to_ty.clone(),
    );
    Ok(wrap_conversion(
        source,
        ExprKind::OptionalEvaluation,
        injected,
        to_ty.clone(),
    ))
}

fn wrap_conversion(
    source: &mut SourceFile,
    make: fn(ExprId) -> ExprKind,
    sub: ExprId,
    ty: Type,
) -> ExprId {
    let id = source.add_expr(make(sub), Span::synthetic());
    source.expr_mut(id).ty = Some(ty);
    id
}

// ---------------------------------------------------------------------------
// Diagnostics helpers
// ---------------------------------------------------------------------------

fn error_at(category: Category, message: impl Into<String>, span: Span) -> DiagnosticError {
    let mut diag = Diagnostic::error(category, message);
    if !span.is_synthetic() {
        diag = diag.at(SourceLocation {
            file_id: span.file.0,
            start: span.start,
            end: span.end,
        });
    }
    DiagnosticError::single(diag)
}

fn unconsidered(from_ty: &Type, to_ty: &Type, span: Span) -> DiagnosticError {
    error_at(
        Category::UnconsideredCoercion,
        format!("no conversion path from `{from_ty}` to `{to_ty}`"),
        span,
    )
}
