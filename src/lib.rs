use std::collections::HashSet;
use swc_core::{
    common::{util::take::Take, Span, SyntaxContext, DUMMY_SP},
    ecma::{
        ast::*,
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
    plugin::{plugin_transform, proxies::TransformPluginProgramMetadata},
};

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// The hook whose presence marks an async function as a relaks component.
const HOOK_NAME: &str = "useProgress";

/// Conventional local names used when the module does not alias them.
const RELAKS_DEFAULT: &str = "Relaks";
const REACT_DEFAULT: &str = "React";

/// Module source whose default import rebinds the React namespace.
const REACT_MODULE: &str = "react";

/// Higher-order calls whose anonymous function argument gets named after the
/// variable it is assigned to.
const DEFAULT_HOCS: [&str; 4] = [
    "Relaks.use",
    "Relaks.memo",
    "React.memo",
    "React.forwardRef",
];

/// Plugin options, read from the JSON blob the host passes through.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Replaces the default HOC list entirely.
    pub hocs: Option<Vec<String>>,
    /// Appended to whichever HOC list is in effect.
    #[serde(rename = "otherHOCs")]
    pub other_hocs: Option<Vec<String>>,
}

// -----------------------------------------------------------------------------
// Transform state
// -----------------------------------------------------------------------------

pub struct RelaksTransform {
    hocs: Vec<String>,

    // Import bindings for this module
    hook: Option<String>,
    hook_import: Option<Span>,
    relaks: String,
    react: String,
    has_default_specifier: bool,

    // Functions the pass produced or that sit inside a wrapper call already;
    // keyed by span since the tree is value-based.
    memoized: HashSet<Span>,
    rewrote_any: bool,
    default_export_seq: u32,

    // Innermost enclosing variable-declarator target, if any
    current_lhs: Option<Ident>,
}

impl RelaksTransform {
    pub fn new(config: PluginConfig) -> Self {
        let mut hocs: Vec<String> = match config.hocs {
            Some(list) => list,
            None => DEFAULT_HOCS.iter().map(|name| name.to_string()).collect(),
        };
        if let Some(extra) = config.other_hocs {
            hocs.extend(extra);
        }

        Self {
            hocs,
            hook: None,
            hook_import: None,
            relaks: RELAKS_DEFAULT.to_string(),
            react: REACT_DEFAULT.to_string(),
            has_default_specifier: false,
            memoized: HashSet::new(),
            rewrote_any: false,
            default_export_seq: 0,
            current_lhs: None,
        }
    }

    // ---------- helpers ----------

    /// Rewrite HOC entries that refer to a namespace under its conventional
    /// name so they use the local alias instead.
    fn realias_hocs(&mut self, conventional: &str, local: &str) {
        let prefix = format!("{conventional}.");
        for qname in &mut self.hocs {
            if let Some(rest) = qname.strip_prefix(&prefix) {
                *qname = format!("{local}.{rest}");
            }
        }
    }

    /// True if the hook is invoked anywhere inside the subtree, including
    /// nested functions.
    fn uses_hook<N>(&self, node: &N) -> bool
    where
        N: for<'a> VisitWith<HookUsage<'a>>,
    {
        let hook = match &self.hook {
            Some(hook) => hook,
            None => return false,
        };
        let mut detector = HookUsage { hook, found: false };
        node.visit_with(&mut detector);
        detector.found
    }

    /// Wrap a function expression in `Relaks.memo(...)`, using whatever local
    /// name the namespace is bound to.
    fn memoize_call(&mut self, func: Expr) -> Expr {
        if let Some(key) = function_key(&func) {
            self.memoized.insert(key);
        }
        self.rewrote_any = true;
        let relaks = Ident::new(self.relaks.clone().into(), DUMMY_SP, SyntaxContext::empty());
        Expr::Call(CallExpr {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            callee: Callee::Expr(Box::new(Expr::Member(MemberExpr {
                span: DUMMY_SP,
                obj: Box::new(Expr::Ident(relaks)),
                prop: MemberProp::Ident(IdentName::new("memo".into(), DUMMY_SP)),
            }))),
            args: vec![ExprOrSpread {
                spread: None,
                expr: Box::new(func),
            }],
            type_args: None,
        })
    }

    fn declare_constant(&self, id: Ident, init: Expr) -> VarDecl {
        VarDecl {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            kind: VarDeclKind::Const,
            declare: false,
            decls: vec![VarDeclarator {
                span: DUMMY_SP,
                name: Pat::Ident(BindingIdent { id, type_ann: None }),
                init: Some(Box::new(init)),
                definite: false,
            }],
        }
    }

    fn generate_default_id(&mut self) -> Ident {
        let name = format!("__defMemoized{}", self.default_export_seq);
        self.default_export_seq += 1;
        Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
    }

    /// Turn an async hook-using function declaration into a constant bound to
    /// the memoized function expression. Default exports never come through
    /// here; `export default const x = ...` is not valid syntax, so they are
    /// split separately in `visit_mut_module_items`.
    fn memoize_decl(&mut self, decl: &mut Decl) {
        if self.hook.is_none() {
            return;
        }
        if let Decl::Fn(fn_decl) = decl {
            if fn_decl.function.is_async && self.uses_hook(&*fn_decl.function) {
                let ident = fn_decl.ident.clone();
                let mut function = fn_decl.function.take();
                function.is_generator = false;
                let call = self.memoize_call(Expr::Fn(FnExpr {
                    ident: Some(ident.clone()),
                    function,
                }));
                *decl = Decl::Var(Box::new(self.declare_constant(ident, call)));
            }
        }
    }

    /// `export default async function [Name](...) {...}` becomes the constant
    /// binding followed by `export default Name;`.
    fn split_default_export(&mut self, item: &mut ModuleItem) -> Option<(ModuleItem, ModuleItem)> {
        if self.hook.is_none() {
            return None;
        }
        let export = match item {
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => export,
            _ => return None,
        };
        let fn_expr = match &mut export.decl {
            DefaultDecl::Fn(fn_expr) => fn_expr,
            _ => return None,
        };
        if !fn_expr.function.is_async || !self.uses_hook(&*fn_expr.function) {
            return None;
        }

        let inner_ident = fn_expr.ident.take();
        let binding = match &inner_ident {
            Some(id) => id.clone(),
            None => self.generate_default_id(),
        };
        let mut function = fn_expr.function.take();
        function.is_generator = false;
        let call = self.memoize_call(Expr::Fn(FnExpr {
            ident: inner_ident,
            function,
        }));
        let const_decl = ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(
            self.declare_constant(binding.clone(), call),
        ))));
        let export_default =
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr {
                span: export.span,
                expr: Box::new(Expr::Ident(binding)),
            }));
        Some((const_decl, export_default))
    }

    /// Callee shapes whose first function argument counts as wrapped already:
    /// `Relaks.memo`/`Relaks.use` and `React.memo`/`React.forwardRef` under
    /// their current local names.
    fn is_wrapper_call(&self, callee: &Callee) -> bool {
        let expr = match callee {
            Callee::Expr(expr) => &**expr,
            _ => return false,
        };
        let member = match expr {
            Expr::Member(member) => member,
            _ => return false,
        };
        let obj = match &*member.obj {
            Expr::Ident(id) => id.sym.as_ref(),
            _ => return false,
        };
        let prop = match &member.prop {
            MemberProp::Ident(prop) => prop.sym.as_ref(),
            _ => return false,
        };
        (obj == self.relaks && matches!(prop, "memo" | "use"))
            || (obj == self.react && matches!(prop, "memo" | "forwardRef"))
    }

    fn is_hoc_callee(&self, callee: &Callee) -> bool {
        match qualified_name(callee) {
            Some(qname) => self.hocs.iter().any(|entry| entry == &qname),
            None => false,
        }
    }

    /// Give the anonymous function argument of a recognized HOC call the name
    /// of the variable the call is assigned to. Named function expressions
    /// are left alone.
    fn name_hoc_argument(&mut self, call: &mut CallExpr) {
        let target = match &self.current_lhs {
            Some(id) => id.clone(),
            None => return,
        };
        if !self.is_hoc_callee(&call.callee) {
            return;
        }
        let arg = match call.args.first_mut() {
            Some(arg) if arg.spread.is_none() => arg,
            _ => return,
        };
        if let Some(key) = function_key(&arg.expr) {
            if self.memoized.contains(&key) {
                return;
            }
        }
        match &mut *arg.expr {
            Expr::Fn(fn_expr) if fn_expr.ident.is_none() => {
                fn_expr.ident = Some(target);
            }
            Expr::Arrow(arrow) => {
                let named = name_arrow(target, arrow.take());
                *arg.expr = Expr::Fn(named);
            }
            _ => {}
        }
    }

    /// Remember the function argument of a pre-existing wrapper call so the
    /// expression visitor does not wrap it a second time.
    fn record_wrapped_argument(&mut self, call: &CallExpr) {
        if !self.is_wrapper_call(&call.callee) {
            return;
        }
        if let Some(arg) = call.args.first() {
            if arg.spread.is_none() {
                if let Some(key) = function_key(&arg.expr) {
                    self.memoized.insert(key);
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Free helpers
// -----------------------------------------------------------------------------

/// Dotted name of a call target: a bare identifier, or a single identifier
/// property off an identifier object (`A.b`). Computed access or any other
/// shape resolves to nothing.
fn qualified_name(callee: &Callee) -> Option<String> {
    let expr = match callee {
        Callee::Expr(expr) => &**expr,
        _ => return None,
    };
    match expr {
        Expr::Ident(id) => Some(id.sym.to_string()),
        Expr::Member(member) => {
            let obj = match &*member.obj {
                Expr::Ident(id) => id,
                _ => return None,
            };
            let prop = match &member.prop {
                MemberProp::Ident(prop) => prop,
                _ => return None,
            };
            Some(format!("{}.{}", obj.sym, prop.sym))
        }
        _ => None,
    }
}

/// Identity key for a function-valued expression.
fn function_key(expr: &Expr) -> Option<Span> {
    match expr {
        Expr::Fn(fn_expr) => Some(fn_expr.function.span),
        Expr::Arrow(arrow) => Some(arrow.span),
        _ => None,
    }
}

/// Convert an arrow into an equivalent named function expression, keeping
/// parameters, body, and the async/generator flags. A concise body becomes a
/// block returning the expression.
fn name_arrow(ident: Ident, arrow: ArrowExpr) -> FnExpr {
    let ArrowExpr {
        span,
        ctxt,
        params,
        body,
        is_async,
        is_generator,
        ..
    } = arrow;
    let body = match *body {
        BlockStmtOrExpr::BlockStmt(block) => block,
        BlockStmtOrExpr::Expr(expr) => BlockStmt {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            stmts: vec![Stmt::Return(ReturnStmt {
                span: DUMMY_SP,
                arg: Some(expr),
            })],
        },
    };
    FnExpr {
        ident: Some(ident),
        function: Box::new(Function {
            params: params
                .into_iter()
                .map(|pat| Param {
                    span: DUMMY_SP,
                    decorators: vec![],
                    pat,
                })
                .collect(),
            decorators: vec![],
            span,
            ctxt,
            body: Some(body),
            is_generator,
            is_async,
            type_params: None,
            return_type: None,
        }),
    }
}

// -----------------------------------------------------------------------------
// Hook usage detection
// -----------------------------------------------------------------------------

/// Bounded search for a call to the tracked hook, stopping at the first
/// match. It descends into nested functions on purpose: a callback invoking
/// the hook still marks the enclosing component.
struct HookUsage<'a> {
    hook: &'a str,
    found: bool,
}

impl Visit for HookUsage<'_> {
    fn visit_call_expr(&mut self, n: &CallExpr) {
        if self.found {
            return;
        }
        if let Callee::Expr(callee) = &n.callee {
            if let Expr::Ident(id) = &**callee {
                if id.sym.as_ref() == self.hook {
                    self.found = true;
                    return;
                }
            }
        }
        n.visit_children_with(self);
    }

    fn visit_expr(&mut self, n: &Expr) {
        if self.found {
            return;
        }
        n.visit_children_with(self);
    }

    fn visit_stmt(&mut self, n: &Stmt) {
        if self.found {
            return;
        }
        n.visit_children_with(self);
    }
}

// -----------------------------------------------------------------------------
// The pass
// -----------------------------------------------------------------------------

impl VisitMut for RelaksTransform {
    fn visit_mut_module(&mut self, module: &mut Module) {
        module.visit_mut_children_with(self);

        // Need a default import for the namespace if the pass introduced
        // wrapper calls and none exists
        if !self.rewrote_any || self.has_default_specifier {
            return;
        }
        let span = match self.hook_import {
            Some(span) => span,
            None => return,
        };
        for item in &mut module.body {
            if let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = item {
                if import.span == span {
                    let local =
                        Ident::new(self.relaks.clone().into(), DUMMY_SP, SyntaxContext::empty());
                    import.specifiers.insert(
                        0,
                        ImportSpecifier::Default(ImportDefaultSpecifier {
                            span: DUMMY_SP,
                            local,
                        }),
                    );
                    break;
                }
            }
        }
    }

    fn visit_mut_import_decl(&mut self, n: &mut ImportDecl) {
        for specifier in &n.specifiers {
            match specifier {
                ImportSpecifier::Named(named) => {
                    let imported = match &named.imported {
                        Some(ModuleExportName::Ident(id)) => id.sym.as_ref(),
                        Some(ModuleExportName::Str(_)) => continue,
                        None => named.local.sym.as_ref(),
                    };
                    if imported == HOOK_NAME && self.hook.is_none() {
                        self.hook = Some(named.local.sym.to_string());
                        self.hook_import = Some(n.span);

                        // look for a default import alongside the hook
                        let default = n.specifiers.iter().find_map(|s| match s {
                            ImportSpecifier::Default(def) => Some(def),
                            _ => None,
                        });
                        if let Some(def) = default {
                            self.has_default_specifier = true;
                            let local = def.local.sym.to_string();
                            if local != RELAKS_DEFAULT {
                                self.realias_hocs(RELAKS_DEFAULT, &local);
                            }
                            self.relaks = local;
                        }
                        break;
                    }
                }
                ImportSpecifier::Default(def) => {
                    if n.src.value.as_ref() == REACT_MODULE {
                        let local = def.local.sym.to_string();
                        if local != REACT_DEFAULT {
                            self.realias_hocs(REACT_DEFAULT, &local);
                        }
                        self.react = local;
                    }
                }
                ImportSpecifier::Namespace(_) => {}
            }
        }
        n.visit_mut_children_with(self);
    }

    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        let mut out = Vec::with_capacity(items.len());
        for mut item in std::mem::take(items) {
            item.visit_mut_with(self);
            if let Some((const_decl, export_default)) = self.split_default_export(&mut item) {
                out.push(const_decl);
                out.push(export_default);
            } else {
                out.push(item);
            }
        }
        *items = out;
    }

    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        if let Stmt::Decl(decl) = stmt {
            self.memoize_decl(decl);
        }
    }

    fn visit_mut_export_decl(&mut self, n: &mut ExportDecl) {
        n.visit_mut_children_with(self);
        self.memoize_decl(&mut n.decl);
    }

    fn visit_mut_var_declarator(&mut self, d: &mut VarDeclarator) {
        let prev = self.current_lhs.take();
        self.current_lhs = match &d.name {
            Pat::Ident(binding) => Some(binding.id.clone()),
            _ => None,
        };
        d.visit_mut_children_with(self);
        self.current_lhs = prev;
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        // Naming runs before the wrapper argument is recorded, so the
        // function inside a pre-existing wrapper call still gets named
        if let Expr::Call(call) = expr {
            self.name_hoc_argument(call);
            self.record_wrapped_argument(call);
        }

        expr.visit_mut_children_with(self);

        // Anonymous async components: wrap the expression where it stands
        let wrap = match &*expr {
            Expr::Fn(fn_expr) => {
                self.hook.is_some()
                    && fn_expr.function.is_async
                    && !self.memoized.contains(&fn_expr.function.span)
                    && self.uses_hook(&*fn_expr.function)
            }
            Expr::Arrow(arrow) => {
                self.hook.is_some()
                    && arrow.is_async
                    && !self.memoized.contains(&arrow.span)
                    && self.uses_hook(arrow)
            }
            _ => false,
        };
        if wrap {
            let func = expr.take();
            *expr = self.memoize_call(func);
        }
    }
}

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

#[plugin_transform]
pub fn process_transform(
    mut program: Program,
    metadata: TransformPluginProgramMetadata,
) -> Program {
    let config = metadata
        .get_transform_plugin_config()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    program.visit_mut_with(&mut RelaksTransform::new(config));
    program
}

// -----------------------------------------------------------------------------
// Unit tests (end-to-end transforms live in tests/transform.rs)
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Ident {
        Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
    }

    fn ident_callee(name: &str) -> Callee {
        Callee::Expr(Box::new(Expr::Ident(ident(name))))
    }

    fn member_callee(obj: Expr, prop: MemberProp) -> Callee {
        Callee::Expr(Box::new(Expr::Member(MemberExpr {
            span: DUMMY_SP,
            obj: Box::new(obj),
            prop,
        })))
    }

    #[test]
    fn qualified_name_of_identifier() {
        assert_eq!(
            qualified_name(&ident_callee("observer")).as_deref(),
            Some("observer")
        );
    }

    #[test]
    fn qualified_name_of_single_member() {
        let callee = member_callee(
            Expr::Ident(ident("React")),
            MemberProp::Ident(IdentName::new("memo".into(), DUMMY_SP)),
        );
        assert_eq!(qualified_name(&callee).as_deref(), Some("React.memo"));
    }

    #[test]
    fn qualified_name_rejects_computed_access() {
        let callee = member_callee(
            Expr::Ident(ident("React")),
            MemberProp::Computed(ComputedPropName {
                span: DUMMY_SP,
                expr: Box::new(Expr::Lit(Lit::Str(Str {
                    span: DUMMY_SP,
                    value: "memo".into(),
                    raw: None,
                }))),
            }),
        );
        assert_eq!(qualified_name(&callee), None);
    }

    #[test]
    fn qualified_name_rejects_deep_chain() {
        // a.b.c: the object is itself a member expression
        let inner = Expr::Member(MemberExpr {
            span: DUMMY_SP,
            obj: Box::new(Expr::Ident(ident("a"))),
            prop: MemberProp::Ident(IdentName::new("b".into(), DUMMY_SP)),
        });
        let callee = member_callee(
            inner,
            MemberProp::Ident(IdentName::new("c".into(), DUMMY_SP)),
        );
        assert_eq!(qualified_name(&callee), None);
    }

    #[test]
    fn default_hoc_list_accepts_additions() {
        let transform = RelaksTransform::new(PluginConfig {
            hocs: None,
            other_hocs: Some(vec!["observer".to_string()]),
        });
        assert_eq!(transform.hocs.len(), 5);
        assert!(transform.hocs.iter().any(|entry| entry == "observer"));
        assert!(transform.hocs.iter().any(|entry| entry == "Relaks.use"));
    }

    #[test]
    fn hoc_override_replaces_defaults() {
        let transform = RelaksTransform::new(PluginConfig {
            hocs: Some(vec!["wrap".to_string()]),
            other_hocs: Some(vec!["observer".to_string()]),
        });
        assert_eq!(transform.hocs, vec!["wrap", "observer"]);
    }

    #[test]
    fn realias_rewrites_matching_prefixes_only() {
        let mut transform = RelaksTransform::new(PluginConfig::default());
        transform.realias_hocs(RELAKS_DEFAULT, "diff");
        assert_eq!(
            transform.hocs,
            vec!["diff.use", "diff.memo", "React.memo", "React.forwardRef"]
        );
    }

    #[test]
    fn config_reads_exact_option_keys() {
        let config: PluginConfig =
            serde_json::from_str(r#"{ "otherHOCs": ["observer"] }"#).unwrap();
        assert_eq!(config.other_hocs, Some(vec!["observer".to_string()]));
        assert!(config.hocs.is_none());
    }
}
