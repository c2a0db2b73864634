use crate::ast::*;
use crate::lexeme::Lexeme;
use crate::span::Spanned;

use super::Parser;

/// Right binding power of prefix `-` and `~`.
const UNARY_BP: u8 = 22;
/// Right binding power of prefix `not`: looser than comparisons.
const NOT_BP: u8 = 6;

impl Parser {
    pub(super) fn parse_expr(&mut self) -> Spanned<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Spanned<Expr> {
        let mut lhs = self.parse_prefix();

        loop {
            let op = match self.peek() {
                Lexeme::Or => BinOp::Or,
                Lexeme::And => BinOp::And,
                Lexeme::EqEq => BinOp::Eq,
                Lexeme::NotEq => BinOp::Ne,
                Lexeme::Lt => BinOp::Lt,
                Lexeme::LtEq => BinOp::Le,
                Lexeme::Gt => BinOp::Gt,
                Lexeme::GtEq => BinOp::Ge,
                Lexeme::Pipe => BinOp::BitOr,
                Lexeme::Caret => BinOp::BitXor,
                Lexeme::Amp => BinOp::BitAnd,
                Lexeme::Shl => BinOp::Shl,
                Lexeme::Shr => BinOp::Shr,
                Lexeme::Plus => BinOp::Add,
                Lexeme::Minus => BinOp::Sub,
                Lexeme::Star => BinOp::Mul,
                Lexeme::Slash => BinOp::Div,
                Lexeme::SlashSlash => BinOp::FloorDiv,
                Lexeme::Percent => BinOp::Mod,
                _ => break,
            };

            let (l_bp, r_bp) = op_binding_power(op);
            if l_bp < min_bp {
                break;
            }

            self.advance(); // consume operator
            let rhs = self.parse_expr_bp(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                Expr::BinOp {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        lhs
    }

    fn parse_prefix(&mut self) -> Spanned<Expr> {
        let start = self.current_span();
        let (op, bp) = match self.peek() {
            Lexeme::Minus => (UnaryOp::Neg, UNARY_BP),
            Lexeme::Tilde => (UnaryOp::Invert, UNARY_BP),
            Lexeme::Not => (UnaryOp::Not, NOT_BP),
            _ => {
                let primary = self.parse_primary();
                return self.parse_postfix(primary);
            }
        };
        self.advance();
        let operand = self.parse_expr_bp(bp);
        let span = start.merge(operand.span);
        Spanned::new(
            Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    /// Postfix chains: `.attr`, `.method(args)`, `[None, :]`.
    fn parse_postfix(&mut self, mut expr: Spanned<Expr>) -> Spanned<Expr> {
        loop {
            if self.eat(&Lexeme::Dot) {
                let name = self.expect_ident();
                if self.eat(&Lexeme::LParen) {
                    let args = self.parse_call_args();
                    self.expect(&Lexeme::RParen);
                    let span = expr.span.merge(self.prev_span());
                    expr = Spanned::new(
                        Expr::Method {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.merge(name.span);
                    expr = Spanned::new(
                        Expr::Attr {
                            expr: Box::new(expr),
                            attr: name,
                        },
                        span,
                    );
                }
            } else if self.eat(&Lexeme::LBracket) {
                let items = self.parse_index_items();
                self.expect(&Lexeme::RBracket);
                let span = expr.span.merge(self.prev_span());
                expr = Spanned::new(
                    Expr::Index {
                        expr: Box::new(expr),
                        items,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        expr
    }

    fn parse_index_items(&mut self) -> Vec<Spanned<IndexItem>> {
        let mut items = Vec::new();
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            let span = self.current_span();
            match self.peek() {
                Lexeme::Colon => {
                    self.advance();
                    items.push(Spanned::new(IndexItem::Full, span));
                }
                Lexeme::None => {
                    self.advance();
                    items.push(Spanned::new(IndexItem::NewAxis, span));
                }
                other => {
                    let msg = format!("unsupported index {}", other.description());
                    self.error_with_help(
                        &msg,
                        "blocks are indexed with `None` (new axis) and `:` (keep axis) only",
                    );
                    self.advance();
                }
            }
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        items
    }

    fn parse_primary(&mut self) -> Spanned<Expr> {
        let start = self.current_span();

        match self.peek().clone() {
            Lexeme::Integer(n) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Integer(n)), start)
            }
            Lexeme::Float(x) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Float(x)), start)
            }
            Lexeme::True => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Bool(true)), start)
            }
            Lexeme::False => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Bool(false)), start)
            }
            Lexeme::None => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::None), start)
            }
            Lexeme::Str(s) => {
                self.advance();
                Spanned::new(Expr::Literal(Literal::Str(s)), start)
            }
            Lexeme::LParen => {
                self.advance();
                if self.eat(&Lexeme::RParen) {
                    let span = start.merge(self.prev_span());
                    return Spanned::new(Expr::Tuple(Vec::new()), span);
                }
                let first = self.parse_expr();
                if self.eat(&Lexeme::Comma) {
                    let mut elements = vec![first];
                    while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
                        elements.push(self.parse_expr());
                        if !self.eat(&Lexeme::Comma) {
                            break;
                        }
                    }
                    self.expect(&Lexeme::RParen);
                    let span = start.merge(self.prev_span());
                    Spanned::new(Expr::Tuple(elements), span)
                } else {
                    self.expect(&Lexeme::RParen);
                    let span = start.merge(self.prev_span());
                    Spanned::new(first.node, span)
                }
            }
            Lexeme::Ident(name) => {
                self.advance();
                if self.eat(&Lexeme::LParen) {
                    let args = self.parse_call_args();
                    self.expect(&Lexeme::RParen);
                    let span = start.merge(self.prev_span());
                    Spanned::new(
                        Expr::Call {
                            callee: Spanned::new(name, start),
                            args,
                        },
                        span,
                    )
                } else {
                    Spanned::new(Expr::Var(name), start)
                }
            }
            _ => {
                self.error_with_help(
                    &format!("expected expression, found {}", self.peek().description()),
                    "expressions include literals (42, 1.5, True), names, calls and operators",
                );
                self.advance();
                Spanned::new(Expr::Literal(Literal::Integer(0)), start)
            }
        }
    }

    /// Arguments up to (not including) `)`. `name=value` pairs are
    /// keyword arguments.
    fn parse_call_args(&mut self) -> Vec<CallArg> {
        let mut args = Vec::new();
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let name = match (self.peek(), self.peek_nth(1)) {
                (Lexeme::Ident(n), Lexeme::Eq) => {
                    let n = Spanned::new(n.clone(), self.current_span());
                    self.advance();
                    self.advance();
                    Some(n)
                }
                _ => None,
            };
            let value = self.parse_expr();
            args.push(CallArg { name, value });
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        args
    }

    fn peek_nth(&self, n: usize) -> &Lexeme {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].node
    }
}

/// Python-style precedence, loosest first.
fn op_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (2, 3),
        BinOp::And => (4, 5),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (8, 9),
        BinOp::BitOr => (10, 11),
        BinOp::BitXor => (12, 13),
        BinOp::BitAnd => (14, 15),
        BinOp::Shl | BinOp::Shr => (16, 17),
        BinOp::Add | BinOp::Sub => (18, 19),
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => (20, 21),
    }
}
