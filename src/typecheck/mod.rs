//! Static checks over a parsed file, before any specialization.
//!
//! Builds the helper call graph and rejects what no signature could
//! make valid: duplicate definitions, helpers shadowing builtins, calls
//! to unknown functions, calls with too many positional or unknown
//! keyword arguments, kernels called from device code, and recursion.
//! Type, shape and value rules depend on the launch signature and are
//! enforced while tracing.

pub mod types;

use std::collections::BTreeMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::Spanned;
use crate::trace::is_builtin;

/// Check a whole file; all diagnostics are collected.
pub fn check_file(file: &File) -> Result<(), Vec<Diagnostic>> {
    let mut checker = Checker::new(file);
    checker.definitions();
    for def in &file.items {
        checker.current = checker.nodes.get(def.name.node.as_str()).copied();
        checker.block(&def.body.node);
    }
    checker.recursion();
    if checker.diagnostics.is_empty() {
        Ok(())
    } else {
        Err(checker.diagnostics)
    }
}

struct Checker<'a> {
    file: &'a File,
    graph: DiGraph<&'a str, ()>,
    nodes: BTreeMap<&'a str, NodeIndex>,
    current: Option<NodeIndex>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Checker<'a> {
    fn new(file: &'a File) -> Self {
        Self {
            file,
            graph: DiGraph::new(),
            nodes: BTreeMap::new(),
            current: None,
            diagnostics: Vec::new(),
        }
    }

    fn definitions(&mut self) {
        for def in &self.file.items {
            let name = def.name.node.as_str();
            if self.nodes.contains_key(name) {
                self.diagnostics.push(
                    Diagnostic::name_error(format!("'{}' is defined more than once", name), def.name.span)
                        .with_help("rename one of the definitions".to_string()),
                );
                continue;
            }
            if is_builtin(name) || name == "range" {
                self.diagnostics.push(Diagnostic::name_error(
                    format!("'{}' shadows a builtin", name),
                    def.name.span,
                ));
            }
            let idx = self.graph.add_node(name);
            self.nodes.insert(name, idx);
        }
    }

    // ─── Traversal ────────────────────────────────────────────────

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(&stmt.node);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { init, .. } => self.expr(init),
            Stmt::Assign { value, .. } => self.expr(value),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond);
                self.block(&then_block.node);
                if let Some(b) = else_block {
                    self.block(&b.node);
                }
            }
            Stmt::For {
                start,
                end,
                step,
                body,
                ..
            } => {
                self.expr(start);
                self.expr(end);
                if let Some(s) = step {
                    self.expr(s);
                }
                self.block(&body.node);
            }
            Stmt::Return(Some(e)) | Stmt::Expr(e) => self.expr(e),
            Stmt::Return(None) | Stmt::Pass => {}
        }
    }

    fn expr(&mut self, expr: &Spanned<Expr>) {
        match &expr.node {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::BinOp { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::UnaryOp { operand, .. } => self.expr(operand),
            Expr::Call { callee, args } => {
                self.call(callee, args);
                for a in args {
                    self.expr(&a.value);
                }
            }
            Expr::Method { receiver, args, .. } => {
                self.expr(receiver);
                for a in args {
                    self.expr(&a.value);
                }
            }
            Expr::Attr { expr, .. } | Expr::Index { expr, .. } => self.expr(expr),
            Expr::Tuple(items) => {
                for item in items {
                    self.expr(item);
                }
            }
        }
    }

    fn call(&mut self, callee: &Spanned<String>, args: &[CallArg]) {
        let name = callee.node.as_str();
        if let Some(def) = self.file.find(name) {
            if def.kind == FnKind::Kernel {
                self.diagnostics.push(
                    Diagnostic::type_error(
                        format!("kernel '{}' cannot be called from device code", name),
                        callee.span,
                    )
                    .with_help("move the shared code into a `fn` helper".to_string()),
                );
                return;
            }
            self.arity(def, args);
            if let (Some(from), Some(&to)) = (self.current, self.nodes.get(name)) {
                self.graph.update_edge(from, to, ());
            }
            return;
        }
        if name == "range" {
            self.diagnostics.push(Diagnostic::type_error(
                "range() is only valid as the bounds of a for loop".to_string(),
                callee.span,
            ));
        } else if !is_builtin(name) {
            self.diagnostics.push(Diagnostic::name_error(
                format!("unknown function '{}'", name),
                callee.span,
            ));
        }
    }

    fn arity(&mut self, def: &FnDef, args: &[CallArg]) {
        let positional = args.iter().filter(|a| a.name.is_none()).count();
        if positional > def.params.len() {
            self.diagnostics.push(Diagnostic::type_error(
                format!(
                    "{}() takes at most {} arguments but {} were given",
                    def.name.node,
                    def.params.len(),
                    positional
                ),
                args[def.params.len()].value.span,
            ));
        }
        for kw in args.iter().filter_map(|a| a.name.as_ref()) {
            if !def.params.iter().any(|p| p.name.node == kw.node) {
                self.diagnostics.push(Diagnostic::name_error(
                    format!(
                        "{}() got an unexpected keyword argument '{}'",
                        def.name.node, kw.node
                    ),
                    kw.span,
                ));
            }
        }
    }

    // ─── Recursion ────────────────────────────────────────────────

    fn recursion(&mut self) {
        for scc in tarjan_scc(&self.graph) {
            let self_loop = scc.len() == 1 && self.graph.contains_edge(scc[0], scc[0]);
            if scc.len() < 2 && !self_loop {
                continue;
            }
            let mut names: Vec<&str> = scc.iter().map(|&n| self.graph[n]).collect();
            names.sort_unstable();
            let span = self
                .file
                .find(names[0])
                .map(|d| d.name.span)
                .unwrap_or_else(crate::span::Span::dummy);
            let cycle = names
                .iter()
                .chain(names.first())
                .copied()
                .collect::<Vec<_>>()
                .join(" -> ");
            self.diagnostics.push(
                Diagnostic::value_error(format!("recursive helper calls: {}", cycle), span)
                    .with_help("helpers are inlined and cannot recurse".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::ErrorKind;

    fn check(src: &str) -> Result<(), Vec<Diagnostic>> {
        let file = crate::parse_source(src).expect("parse");
        check_file(&file)
    }

    fn kinds(src: &str) -> Vec<ErrorKind> {
        check(src).unwrap_err().iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_valid_file() {
        let src = r#"
fn twice(x, scale = 2) {
    return x * scale
}

kernel k(X, const N) {
    let off = arange(0, N)
    store(X + off, twice(load(X + off), scale=3))
}
"#;
        assert!(check(src).is_ok());
    }

    #[test]
    fn test_duplicate_definition() {
        let src = "fn a() { pass }\nfn a() { pass }\n";
        assert_eq!(kinds(src), vec![ErrorKind::Name]);
    }

    #[test]
    fn test_shadowing_builtin() {
        assert_eq!(kinds("fn load(p) { return p }\n"), vec![ErrorKind::Name]);
    }

    #[test]
    fn test_unknown_callee() {
        let errs = check("kernel k(X) { frobnicate(X) }\n").unwrap_err();
        assert_eq!(errs[0].kind, ErrorKind::Name);
        assert!(errs[0].message.contains("frobnicate"));
    }

    #[test]
    fn test_arity_and_keywords() {
        let src = "fn f(a) { return a }\nkernel k(X) { f(X, X)\nf(b=X) }\n";
        assert_eq!(kinds(src), vec![ErrorKind::Type, ErrorKind::Name]);
    }

    #[test]
    fn test_kernel_called_from_device() {
        let src = "kernel a(X) { pass }\nkernel b(X) { a(X) }\n";
        assert_eq!(kinds(src), vec![ErrorKind::Type]);
    }

    #[test]
    fn test_direct_and_mutual_recursion() {
        let direct = check("fn f(x) { return f(x) }\n").unwrap_err();
        assert!(direct[0].message.contains("f -> f"));

        let mutual = check("fn a(x) { return b(x) }\nfn b(x) { return a(x) }\n").unwrap_err();
        assert_eq!(mutual.len(), 1);
        assert_eq!(mutual[0].kind, ErrorKind::Value);
        assert!(mutual[0].message.contains("a -> b -> a"));
    }

    #[test]
    fn test_range_outside_for() {
        assert_eq!(kinds("kernel k(X) { let r = range(0, 4) }\n"), vec![ErrorKind::Type]);
    }
}
