use crate::ast::*;
use crate::lexeme::Lexeme;
use crate::span::Spanned;

use super::Parser;

impl Parser {
    pub(super) fn parse_items(&mut self) -> Vec<FnDef> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Lexeme::Eof => break,
                Lexeme::Kernel => items.push(self.parse_fn(FnKind::Kernel)),
                Lexeme::Fn => items.push(self.parse_fn(FnKind::Helper)),
                _ => {
                    self.error_with_help(
                        &format!(
                            "expected 'kernel' or 'fn', found {}",
                            self.peek().description()
                        ),
                        "top-level items are `kernel name(...) { }` or `fn name(...) { }`",
                    );
                    self.recover_to_item();
                }
            }
        }
        items
    }

    fn recover_to_item(&mut self) {
        self.advance();
        while !matches!(self.peek(), Lexeme::Kernel | Lexeme::Fn | Lexeme::Eof) {
            self.advance();
        }
    }

    fn parse_fn(&mut self, kind: FnKind) -> FnDef {
        let start = self.current_span();
        self.advance(); // `kernel` or `fn`
        let name = self.expect_ident();
        self.expect(&Lexeme::LParen);
        let params = self.parse_params();
        self.expect(&Lexeme::RParen);
        let body = self.parse_block();
        let span = start.merge(body.span);
        FnDef {
            kind,
            name,
            params,
            body,
            span,
        }
    }

    fn parse_params(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let is_const = self.eat(&Lexeme::Const);
            let name = self.expect_ident();
            let default = if self.eat(&Lexeme::Eq) {
                Some(self.parse_expr())
            } else {
                None
            };
            params.push(Param {
                name,
                is_const,
                default,
            });
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        params
    }

    // ─── Blocks and statements ─────────────────────────────────────

    pub(super) fn parse_block(&mut self) -> Spanned<Block> {
        if !self.enter_nesting() {
            let span = self.current_span();
            // The depth error is recorded; abandon the rest of the file.
            while !self.at(&Lexeme::Eof) {
                self.advance();
            }
            return Spanned::new(Block { stmts: Vec::new() }, span);
        }

        let start = self.current_span();
        self.expect(&Lexeme::LBrace);

        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&Lexeme::RBrace) || self.at(&Lexeme::Eof) {
                break;
            }
            let errors_before = self.diagnostics.len();
            stmts.push(self.parse_stmt());
            if self.diagnostics.len() > errors_before {
                self.recover_to_statement_end();
                continue;
            }
            self.expect_statement_end();
        }

        let end = self.current_span();
        self.expect(&Lexeme::RBrace);
        self.exit_nesting();
        Spanned::new(Block { stmts }, start.merge(end))
    }

    fn expect_statement_end(&mut self) {
        match self.peek() {
            Lexeme::Newline | Lexeme::Semicolon => {
                self.advance();
            }
            Lexeme::RBrace | Lexeme::Eof => {}
            other => {
                let msg = format!("expected end of statement, found {}", other.description());
                self.error_with_help(&msg, "separate statements with a newline or `;`");
                self.recover_to_statement_end();
            }
        }
    }

    fn recover_to_statement_end(&mut self) {
        while !matches!(
            self.peek(),
            Lexeme::Newline | Lexeme::Semicolon | Lexeme::RBrace | Lexeme::Eof
        ) {
            self.advance();
        }
    }

    fn parse_stmt(&mut self) -> Spanned<Stmt> {
        match self.peek() {
            Lexeme::Let => self.parse_let_stmt(),
            Lexeme::If => self.parse_if_stmt(),
            Lexeme::For => self.parse_for_stmt(),
            Lexeme::Return => self.parse_return_stmt(),
            Lexeme::Pass => {
                let span = self.current_span();
                self.advance();
                Spanned::new(Stmt::Pass, span)
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_pattern(&mut self) -> Pattern {
        if self.eat(&Lexeme::LParen) {
            let mut names = Vec::new();
            while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
                names.push(self.expect_ident());
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::RParen);
            Pattern::Tuple(names)
        } else {
            Pattern::Name(self.expect_ident())
        }
    }

    fn parse_let_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.expect(&Lexeme::Let);
        let pattern = self.parse_pattern();
        self.expect(&Lexeme::Eq);
        let init = self.parse_expr();
        let span = start.merge(init.span);
        Spanned::new(Stmt::Let { pattern, init }, span)
    }

    fn parse_expr_or_assign(&mut self) -> Spanned<Stmt> {
        let expr = self.parse_expr();

        let compound = match self.peek() {
            Lexeme::PlusEq => Some(BinOp::Add),
            Lexeme::MinusEq => Some(BinOp::Sub),
            Lexeme::StarEq => Some(BinOp::Mul),
            Lexeme::SlashEq => Some(BinOp::Div),
            Lexeme::PercentEq => Some(BinOp::Mod),
            Lexeme::AmpEq => Some(BinOp::BitAnd),
            Lexeme::PipeEq => Some(BinOp::BitOr),
            Lexeme::CaretEq => Some(BinOp::BitXor),
            _ => None,
        };

        if compound.is_none() && !self.at(&Lexeme::Eq) {
            let span = expr.span;
            return Spanned::new(Stmt::Expr(expr), span);
        }
        self.advance(); // `=` or `op=`

        let target = match (&expr.node, compound) {
            (Expr::Var(name), _) => Pattern::Name(Spanned::new(name.clone(), expr.span)),
            (Expr::Tuple(elements), None) => {
                let mut names = Vec::new();
                for e in elements {
                    if let Expr::Var(name) = &e.node {
                        names.push(Spanned::new(name.clone(), e.span));
                    } else {
                        self.error_at(
                            e.span,
                            "cannot assign to this expression",
                            "tuple assignment targets must be plain names",
                        );
                    }
                }
                Pattern::Tuple(names)
            }
            _ => {
                self.error_at(
                    expr.span,
                    "cannot assign to this expression",
                    "assignment targets are variable names; store to memory with `store(ptr, value)`",
                );
                Pattern::Name(Spanned::new("_error_".to_string(), expr.span))
            }
        };

        let value = self.parse_expr();
        let span = expr.span.merge(value.span);
        Spanned::new(
            Stmt::Assign {
                target,
                op: compound,
                value,
            },
            span,
        )
    }

    fn parse_if_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.expect(&Lexeme::If);
        let cond = self.parse_expr();
        let then_block = self.parse_block();
        let else_block = if self.peek_past_newlines() == &Lexeme::Else {
            self.skip_newlines();
            self.advance(); // `else`
            if self.at(&Lexeme::If) {
                // `else if` desugars to `else { if ... }`
                let inner_if = self.parse_if_stmt();
                let span = inner_if.span;
                Some(Spanned::new(
                    Block {
                        stmts: vec![inner_if],
                    },
                    span,
                ))
            } else {
                Some(self.parse_block())
            }
        } else {
            None
        };
        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::If {
                cond,
                then_block,
                else_block,
            },
            span,
        )
    }

    fn parse_for_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.expect(&Lexeme::For);
        let var = self.expect_ident();
        self.expect(&Lexeme::In);

        let range_kw = self.expect_ident();
        if range_kw.node != "range" && range_kw.node != "_error_" {
            self.error_at(
                range_kw.span,
                &format!("expected 'range', found '{}'", range_kw.node),
                "loops iterate over `range(start, end)` or `range(start, end, step)`",
            );
        }
        self.expect(&Lexeme::LParen);
        let first = self.parse_expr();
        let (range_start, range_end, step) = if self.eat(&Lexeme::Comma) {
            let end = self.parse_expr();
            let step = if self.eat(&Lexeme::Comma) {
                Some(self.parse_expr())
            } else {
                None
            };
            (first, end, step)
        } else {
            // `range(n)` counts from zero
            let zero = Spanned::new(Expr::Literal(Literal::Integer(0)), first.span);
            (zero, first, None)
        };
        self.expect(&Lexeme::RParen);

        let body = self.parse_block();
        let span = start.merge(self.prev_span());
        Spanned::new(
            Stmt::For {
                var,
                start: range_start,
                end: range_end,
                step,
                body,
            },
            span,
        )
    }

    fn parse_return_stmt(&mut self) -> Spanned<Stmt> {
        let start = self.current_span();
        self.expect(&Lexeme::Return);
        let value = if matches!(
            self.peek(),
            Lexeme::Newline | Lexeme::Semicolon | Lexeme::RBrace | Lexeme::Eof
        ) {
            None
        } else {
            Some(self.parse_expr())
        };
        let span = start.merge(self.prev_span());
        Spanned::new(Stmt::Return(value), span)
    }
}
