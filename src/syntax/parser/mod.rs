mod expr;
mod items;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

const MAX_NESTING_DEPTH: u32 = 256;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 256 levels)",
                "extract deeply nested code into helper functions",
            );
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn parse_file(mut self) -> Result<File, Vec<Diagnostic>> {
        let items = self.parse_items();
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(File { items })
    }

    // ─── Token helpers ─────────────────────────────────────────────

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    /// The first non-newline token at or after the cursor.
    fn peek_past_newlines(&self) -> &Lexeme {
        let mut i = self.pos;
        while i < self.tokens.len() - 1 && self.tokens[i].node == Lexeme::Newline {
            i += 1;
        }
        &self.tokens[i].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(&Lexeme::Newline) || self.at(&Lexeme::Semicolon) {
            self.advance();
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(msg.to_string(), self.current_span()).with_help(help.to_string()),
        );
    }

    fn error_at(&mut self, span: Span, msg: &str, help: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), span).with_help(help.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> File {
        let (tokens, lex_diags) = Lexer::new(source, 0).tokenize();
        assert!(lex_diags.is_empty(), "lex errors: {:?}", lex_diags);
        Parser::new(tokens).parse_file().unwrap()
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let (tokens, _) = Lexer::new(source, 0).tokenize();
        Parser::new(tokens).parse_file().unwrap_err()
    }

    fn body(file: &File, idx: usize) -> &[Spanned<Stmt>] {
        &file.items[idx].body.node.stmts
    }

    #[test]
    fn test_empty_kernel() {
        let file = parse("kernel noop(X) {\n}\n");
        assert_eq!(file.items.len(), 1);
        assert_eq!(file.items[0].kind, FnKind::Kernel);
        assert_eq!(file.items[0].name.node, "noop");
        assert_eq!(file.items[0].params.len(), 1);
        assert!(body(&file, 0).is_empty());
    }

    #[test]
    fn test_params_const_and_default() {
        let file = parse("fn impl_(value = 10) { return value }\nkernel k(X, const SIZE) { pass }");
        let helper = &file.items[0];
        assert_eq!(helper.kind, FnKind::Helper);
        assert!(helper.params[0].default.is_some());
        let kernel = &file.items[1];
        assert!(!kernel.params[0].is_const);
        assert!(kernel.params[1].is_const);
        assert_eq!(kernel.runtime_params().count(), 1);
        assert_eq!(kernel.const_params().count(), 1);
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let file = parse("kernel k() { let c = a + b * c }");
        let Stmt::Let { init, .. } = &body(&file, 0)[0].node else {
            panic!("expected let");
        };
        let Expr::BinOp { op, rhs, .. } = &init.node else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.node, Expr::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_precedence_compare_over_bitand() {
        // `&` binds tighter than `<`, as in Python
        let file = parse("kernel k() { let m = a & b < c }");
        let Stmt::Let { init, .. } = &body(&file, 0)[0].node else {
            panic!("expected let");
        };
        assert!(matches!(init.node, Expr::BinOp { op: BinOp::Lt, .. }));
    }

    #[test]
    fn test_unary_binds_tighter_than_mul() {
        let file = parse("kernel k() { let y = -x * 2 }");
        let Stmt::Let { init, .. } = &body(&file, 0)[0].node else {
            panic!("expected let");
        };
        let Expr::BinOp { op, lhs, .. } = &init.node else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Mul);
        assert!(matches!(lhs.node, Expr::UnaryOp { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_keyword_arguments() {
        let file = parse("kernel k(X) { let x = load(X + off, mask=m, other=0) }");
        let Stmt::Let { init, .. } = &body(&file, 0)[0].node else {
            panic!("expected let");
        };
        let Expr::Call { callee, args } = &init.node else {
            panic!("expected call");
        };
        assert_eq!(callee.node, "load");
        assert_eq!(args.len(), 3);
        assert!(args[0].name.is_none());
        assert_eq!(args[1].name.as_ref().unwrap().node, "mask");
        assert_eq!(args[2].name.as_ref().unwrap().node, "other");
    }

    #[test]
    fn test_index_and_method_and_attr() {
        let file = parse("kernel k() { let z = x[:, None].to(Z.dtype.element_ty, bitcast=True) }");
        let Stmt::Let { init, .. } = &body(&file, 0)[0].node else {
            panic!("expected let");
        };
        let Expr::Method {
            receiver,
            method,
            args,
        } = &init.node
        else {
            panic!("expected method call");
        };
        assert_eq!(method.node, "to");
        assert_eq!(args.len(), 2);
        let Expr::Index { items, .. } = &receiver.node else {
            panic!("expected index");
        };
        let kinds: Vec<IndexItem> = items.iter().map(|i| i.node).collect();
        assert_eq!(kinds, vec![IndexItem::Full, IndexItem::NewAxis]);
        assert!(matches!(args[0].value.node, Expr::Attr { .. }));
    }

    #[test]
    fn test_tuple_let_and_assign() {
        let file = parse("kernel k() {\n    let (a, b, c) = f(x, y)\n    (a, b) = (b, a)\n}");
        let stmts = body(&file, 0);
        assert!(matches!(
            &stmts[0].node,
            Stmt::Let { pattern: Pattern::Tuple(names), .. } if names.len() == 3
        ));
        assert!(matches!(
            &stmts[1].node,
            Stmt::Assign { target: Pattern::Tuple(names), op: None, .. } if names.len() == 2
        ));
    }

    #[test]
    fn test_compound_assignment() {
        let file = parse("kernel k() { acc += x; acc ^= 2 }");
        let stmts = body(&file, 0);
        assert!(matches!(
            stmts[0].node,
            Stmt::Assign { op: Some(BinOp::Add), .. }
        ));
        assert!(matches!(
            stmts[1].node,
            Stmt::Assign { op: Some(BinOp::BitXor), .. }
        ));
    }

    #[test]
    fn test_if_else_chain() {
        let file = parse(
            "kernel k() {\n    if a { pass }\n    else if b { pass } else {\n        pass\n    }\n}",
        );
        let stmts = body(&file, 0);
        assert_eq!(stmts.len(), 1);
        let Stmt::If { else_block, .. } = &stmts[0].node else {
            panic!("expected if");
        };
        let inner = &else_block.as_ref().unwrap().node.stmts;
        assert!(matches!(inner[0].node, Stmt::If { else_block: Some(_), .. }));
    }

    #[test]
    fn test_for_range_with_step() {
        let file = parse("kernel k() { for i in range(0, n, 2) { acc = acc + i } }");
        let Stmt::For { var, step, .. } = &body(&file, 0)[0].node else {
            panic!("expected for");
        };
        assert_eq!(var.node, "i");
        assert!(step.is_some());
    }

    #[test]
    fn test_return_tuple() {
        let file = parse("fn f(a, b) { return (a + b, a - b, a * b) }");
        let Stmt::Return(Some(value)) = &body(&file, 0)[0].node else {
            panic!("expected return");
        };
        assert!(matches!(&value.node, Expr::Tuple(elems) if elems.len() == 3));
    }

    #[test]
    fn test_multiline_call_arguments() {
        let file = parse("kernel k() {\n    store(\n        Z,\n        x,\n    )\n}");
        assert_eq!(body(&file, 0).len(), 1);
    }

    #[test]
    fn test_missing_separator_is_error() {
        let errs = parse_err("kernel k() { let a = 1 let b = 2 }");
        assert!(errs[0].message.contains("expected end of statement"));
    }

    #[test]
    fn test_top_level_garbage_is_error() {
        let errs = parse_err("let x = 1");
        assert!(errs[0].message.contains("expected 'kernel' or 'fn'"));
    }

    #[test]
    fn test_bad_assignment_target() {
        let errs = parse_err("kernel k() { a + b = 3 }");
        assert!(errs[0].message.contains("cannot assign"));
    }

    #[test]
    fn test_deep_nesting_reports() {
        let mut src = String::from("kernel k() { ");
        for _ in 0..300 {
            src.push_str("if c { ");
        }
        for _ in 0..300 {
            src.push_str("} ");
        }
        src.push('}');
        let errs = parse_err(&src);
        assert!(errs.iter().any(|d| d.message.contains("nesting depth")));
    }
}
