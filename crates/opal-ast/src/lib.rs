//! AST node definitions and source spans for Opal.
//!
//! A [`SourceFile`] is an arena that owns every node: expressions,
//! declarations, and declaration contexts all live in flat vectors and refer
//! to each other through copyable ids. Parent links between contexts are
//! plain indices, so there are no ownership cycles to manage when a tree is
//! torn down.
//!
//! Expressions carry a `ty` slot that stays `None` until a type-check
//! solution is applied, and the three implicit-conversion wrappers
//! ([`ExprKind::InjectIntoOptional`], [`ExprKind::BindOptional`],
//! [`ExprKind::OptionalEvaluation`]) only ever appear in applied trees.

use std::fmt::Write as _;

use opal_types::Type;

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// A synthetic span for compiler-generated nodes (inserted conversions).
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Arena ids
// ---------------------------------------------------------------------------

/// Index of an expression in its [`SourceFile`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Index of a declaration in its [`SourceFile`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

/// Index of a declaration context in its [`SourceFile`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtxId(pub u32);

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal.
    IntegerLiteral(i64),

    /// A name reference not yet resolved against declaration contexts.
    /// Pre-check replaces every one of these; none survive into inference.
    UnresolvedDeclRef(String),

    /// Reference to a single resolved declaration.
    DeclRef(DeclId),

    /// Reference resolved to an overload set; the solver picks one target.
    OverloadedDeclRef(Vec<DeclId>),

    /// Function application: `callee(argument)`.
    Call { callee: ExprId, argument: ExprId },

    /// Closure: `{ param in body }`. The parameter is a variable declaration
    /// owned by `ctx`, the closure's own declaration context.
    Closure {
        param: DeclId,
        ctx: CtxId,
        return_ty: Option<Type>,
        body: Vec<ExprId>,
    },

    /// Implicit conversion: wrap a value into one optional layer.
    InjectIntoOptional(ExprId),

    /// Implicit conversion: unwrap an optional within an enclosing
    /// [`ExprKind::OptionalEvaluation`].
    BindOptional(ExprId),

    /// Implicit conversion: delimits the scope of contained
    /// [`ExprKind::BindOptional`] unwraps.
    OptionalEvaluation(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Assigned when a type-check solution is applied; `None` before that.
    pub ty: Option<Type>,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    /// `let name[: annotation] [= initializer]`, also closure parameters.
    Var {
        name: String,
        annotation: Option<Type>,
        initializer: Option<ExprId>,
    },

    /// A function declaration visible by name with a fixed interface type.
    /// Bodies are external to this core; only the signature participates.
    Func { name: String, interface_ty: Type },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub kind: DeclKind,
    pub span: Span,
    /// Assigned when a type-check solution is applied; `None` before that.
    pub ty: Option<Type>,
}

impl Decl {
    pub fn name(&self) -> &str {
        match &self.kind {
            DeclKind::Var { name, .. } | DeclKind::Func { name, .. } => name,
        }
    }

    /// The type at which a reference to this declaration is introduced.
    ///
    /// Functions expose their declared interface type. Variables expose
    /// their annotation when present, otherwise their applied type.
    pub fn interface_ty(&self) -> Option<&Type> {
        match &self.kind {
            DeclKind::Func { interface_ty, .. } => Some(interface_ty),
            DeclKind::Var { annotation, .. } => annotation.as_ref().or(self.ty.as_ref()),
        }
    }
}

// ---------------------------------------------------------------------------
// Declaration contexts
// ---------------------------------------------------------------------------

/// A lexical scope holding declarations, linked to its parent scope.
#[derive(Debug, Clone, Default)]
pub struct DeclContext {
    pub parent: Option<CtxId>,
    pub decls: Vec<DeclId>,
}

// ---------------------------------------------------------------------------
// Source files
// ---------------------------------------------------------------------------

/// A top-level statement: a declaration or a bare expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stmt {
    Decl(DeclId),
    Expr(ExprId),
}

/// Arena owner of a parsed program: all expressions, declarations, and
/// declaration contexts, plus the ordered top-level statements.
#[derive(Debug, Clone)]
pub struct SourceFile {
    exprs: Vec<Expr>,
    decls: Vec<Decl>,
    contexts: Vec<DeclContext>,
    pub statements: Vec<Stmt>,
}

impl SourceFile {
    /// An empty source file with its root declaration context.
    pub fn new() -> Self {
        Self {
            exprs: Vec::new(),
            decls: Vec::new(),
            contexts: vec![DeclContext::default()],
            statements: Vec::new(),
        }
    }

    /// The file-level declaration context.
    pub fn root_context(&self) -> CtxId {
        CtxId(0)
    }

    pub fn add_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr {
            kind,
            span,
            ty: None,
        });
        id
    }

    pub fn add_decl(&mut self, ctx: CtxId, kind: DeclKind, span: Span) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(Decl {
            kind,
            span,
            ty: None,
        });
        self.contexts[ctx.0 as usize].decls.push(id);
        id
    }

    pub fn add_context(&mut self, parent: CtxId) -> CtxId {
        let id = CtxId(self.contexts.len() as u32);
        self.contexts.push(DeclContext {
            parent: Some(parent),
            decls: Vec::new(),
        });
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.0 as usize]
    }

    pub fn context(&self, id: CtxId) -> &DeclContext {
        &self.contexts[id.0 as usize]
    }

    /// Resolve a name against a context chain.
    ///
    /// Walks from `ctx` outward and returns every declaration matching
    /// `name` from the nearest context that has any match, most recent
    /// declaration first; an inner declaration set shadows outer ones
    /// rather than merging with them. An empty result means the name is
    /// undeclared.
    pub fn resolve(&self, ctx: CtxId, name: &str) -> Vec<DeclId> {
        let mut current = Some(ctx);
        while let Some(id) = current {
            let context = self.context(id);
            let matches: Vec<DeclId> = context
                .decls
                .iter()
                .rev()
                .copied()
                .filter(|d| self.decl(*d).name() == name)
                .collect();
            if !matches.is_empty() {
                return matches;
            }
            current = context.parent;
        }
        Vec::new()
    }

    /// Visit `root` and every expression beneath it in post-order:
    /// children first, then the node itself.
    pub fn visit_exprs_post(&self, root: ExprId, f: &mut impl FnMut(ExprId)) {
        match &self.expr(root).kind {
            ExprKind::IntegerLiteral(_)
            | ExprKind::UnresolvedDeclRef(_)
            | ExprKind::DeclRef(_)
            | ExprKind::OverloadedDeclRef(_) => {}
            ExprKind::Call { callee, argument } => {
                self.visit_exprs_post(*callee, f);
                self.visit_exprs_post(*argument, f);
            }
            ExprKind::Closure { body, .. } => {
                for expr in body {
                    self.visit_exprs_post(*expr, f);
                }
            }
            ExprKind::InjectIntoOptional(sub)
            | ExprKind::BindOptional(sub)
            | ExprKind::OptionalEvaluation(sub) => {
                self.visit_exprs_post(*sub, f);
            }
        }
        f(root);
    }
}

impl Default for SourceFile {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Textual rendering
// ---------------------------------------------------------------------------
//
// Every node renders as `(<NodeKind> <attrs…>)` with a stable attribute
// order per kind: node-specific scalars first, then `range=` for
// non-synthetic spans, then `type="…"` once assigned, then children.
// String equality over this form is the oracle the end-to-end tests use.

fn push_span(out: &mut String, span: Span) {
    if !span.is_synthetic() {
        let _ = write!(out, " range={}..{}", span.start, span.end);
    }
}

fn push_ty(out: &mut String, ty: &Option<Type>) {
    if let Some(ty) = ty {
        let _ = write!(out, " type=\"{ty}\"");
    }
}

/// Render one expression subtree.
pub fn render_expr(source: &SourceFile, id: ExprId) -> String {
    let mut out = String::new();
    write_expr(source, id, &mut out);
    out
}

fn write_expr(source: &SourceFile, id: ExprId, out: &mut String) {
    let expr = source.expr(id);
    match &expr.kind {
        ExprKind::IntegerLiteral(value) => {
            let _ = write!(out, "(IntegerLiteral value={value}");
            push_span(out, expr.span);
            push_ty(out, &expr.ty);
            out.push(')');
        }
        ExprKind::UnresolvedDeclRef(name) => {
            let _ = write!(out, "(UnresolvedDeclRef name={name}");
            push_span(out, expr.span);
            out.push(')');
        }
        ExprKind::DeclRef(target) => {
            let _ = write!(out, "(DeclRef decl={}", source.decl(*target).name());
            push_span(out, expr.span);
            push_ty(out, &expr.ty);
            out.push(')');
        }
        ExprKind::OverloadedDeclRef(targets) => {
            let _ = write!(out, "(OverloadedDeclRef decls=[");
            for (i, target) in targets.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(source.decl(*target).name());
            }
            out.push(']');
            push_span(out, expr.span);
            push_ty(out, &expr.ty);
            out.push(')');
        }
        ExprKind::Call { callee, argument } => {
            out.push_str("(Call");
            push_span(out, expr.span);
            push_ty(out, &expr.ty);
            out.push(' ');
            write_expr(source, *callee, out);
            out.push(' ');
            write_expr(source, *argument, out);
            out.push(')');
        }
        ExprKind::Closure {
            param,
            return_ty,
            body,
            ..
        } => {
            out.push_str("(Closure");
            push_span(out, expr.span);
            if let Some(ret) = return_ty {
                let _ = write!(out, " return=\"{ret}\"");
            }
            push_ty(out, &expr.ty);
            out.push(' ');
            write_decl(source, *param, out);
            for sub in body {
                out.push(' ');
                write_expr(source, *sub, out);
            }
            out.push(')');
        }
        ExprKind::InjectIntoOptional(sub) => {
            write_wrapper(source, "InjectIntoOptional", *sub, expr, out);
        }
        ExprKind::BindOptional(sub) => {
            write_wrapper(source, "BindOptional", *sub, expr, out);
        }
        ExprKind::OptionalEvaluation(sub) => {
            write_wrapper(source, "OptionalEvaluation", *sub, expr, out);
        }
    }
}

fn write_wrapper(source: &SourceFile, kind: &str, sub: ExprId, expr: &Expr, out: &mut String) {
    let _ = write!(out, "({kind}");
    push_span(out, expr.span);
    push_ty(out, &expr.ty);
    out.push(' ');
    write_expr(source, sub, out);
    out.push(')');
}

/// Render one declaration.
pub fn render_decl(source: &SourceFile, id: DeclId) -> String {
    let mut out = String::new();
    write_decl(source, id, &mut out);
    out
}

fn write_decl(source: &SourceFile, id: DeclId, out: &mut String) {
    let decl = source.decl(id);
    match &decl.kind {
        DeclKind::Var {
            name, initializer, ..
        } => {
            let _ = write!(out, "(VariableDecl name={name}");
            push_span(out, decl.span);
            push_ty(out, &decl.ty);
            if let Some(init) = initializer {
                out.push(' ');
                write_expr(source, *init, out);
            }
            out.push(')');
        }
        DeclKind::Func { name, interface_ty } => {
            let _ = write!(out, "(FunctionDecl name={name} interface_type=\"{interface_ty}\"");
            push_span(out, decl.span);
            out.push(')');
        }
    }
}

/// Render a whole source file, one statement per line.
pub fn render_source(source: &SourceFile) -> String {
    let mut out = String::from("(SourceFile");
    for stmt in &source.statements {
        out.push_str("\n  ");
        match stmt {
            Stmt::Decl(decl) => write_decl(source, *decl, &mut out),
            Stmt::Expr(expr) => write_expr(source, *expr, &mut out),
        }
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_types::Type;

    fn s() -> Span {
        Span::synthetic()
    }

    #[test]
    fn resolve_walks_parent_chain() {
        let mut source = SourceFile::new();
        let root = source.root_context();
        let f1 = source.add_decl(
            root,
            DeclKind::Func {
                name: "f".into(),
                interface_ty: Type::function(Type::int(), Type::int()),
            },
            s(),
        );
        let f2 = source.add_decl(
            root,
            DeclKind::Func {
                name: "f".into(),
                interface_ty: Type::function(Type::int(), Type::optional(Type::int())),
            },
            s(),
        );
        let inner = source.add_context(root);

        assert_eq!(source.resolve(inner, "f"), vec![f2, f1]);
        assert_eq!(source.resolve(inner, "g"), Vec::<DeclId>::new());
    }

    #[test]
    fn inner_declarations_shadow_outer_sets() {
        let mut source = SourceFile::new();
        let root = source.root_context();
        source.add_decl(
            root,
            DeclKind::Var {
                name: "x".into(),
                annotation: Some(Type::int()),
                initializer: None,
            },
            s(),
        );
        let inner = source.add_context(root);
        let shadow = source.add_decl(
            inner,
            DeclKind::Var {
                name: "x".into(),
                annotation: None,
                initializer: None,
            },
            s(),
        );

        assert_eq!(source.resolve(inner, "x"), vec![shadow]);
    }

    #[test]
    fn post_order_visits_children_first() {
        let mut source = SourceFile::new();
        let callee = source.add_expr(ExprKind::UnresolvedDeclRef("f".into()), s());
        let argument = source.add_expr(ExprKind::IntegerLiteral(1), s());
        let call = source.add_expr(ExprKind::Call { callee, argument }, s());

        let mut order = Vec::new();
        source.visit_exprs_post(call, &mut |id| order.push(id));
        assert_eq!(order, vec![callee, argument, call]);
    }

    #[test]
    fn render_untyped_literal() {
        let mut source = SourceFile::new();
        let lit = source.add_expr(ExprKind::IntegerLiteral(42), Span::new(FileId(0), 0, 2));
        assert_eq!(render_expr(&source, lit), "(IntegerLiteral value=42 range=0..2)");
    }

    #[test]
    fn render_typed_tree() {
        let mut source = SourceFile::new();
        let lit = source.add_expr(ExprKind::IntegerLiteral(1), s());
        source.expr_mut(lit).ty = Some(Type::int());
        let inject = source.add_expr(ExprKind::InjectIntoOptional(lit), s());
        source.expr_mut(inject).ty = Some(Type::optional(Type::int()));

        assert_eq!(
            render_expr(&source, inject),
            "(InjectIntoOptional type=\"Int?\" (IntegerLiteral value=1 type=\"Int\"))"
        );
    }

    #[test]
    fn render_source_file_lists_statements() {
        let mut source = SourceFile::new();
        let root = source.root_context();
        let init = source.add_expr(ExprKind::IntegerLiteral(1), s());
        let decl = source.add_decl(
            root,
            DeclKind::Var {
                name: "x".into(),
                annotation: Some(Type::int()),
                initializer: Some(init),
            },
            s(),
        );
        source.statements.push(Stmt::Decl(decl));

        assert_eq!(
            render_source(&source),
            "(SourceFile\n  (VariableDecl name=x (IntegerLiteral value=1)))"
        );
    }
}
