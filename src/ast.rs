use crate::span::{Span, Spanned};

/// A parsed `.tsl` source file: a flat list of kernels and helpers.
#[derive(Clone, Debug)]
pub struct File {
    pub items: Vec<FnDef>,
}

impl File {
    pub fn find(&self, name: &str) -> Option<&FnDef> {
        self.items.iter().find(|f| f.name.node == name)
    }

    pub fn kernels(&self) -> impl Iterator<Item = &FnDef> {
        self.items.iter().filter(|f| f.kind == FnKind::Kernel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `kernel NAME(...)`: launchable from the host.
    Kernel,
    /// `fn NAME(...)`: callable from kernels only, always inlined.
    Helper,
}

#[derive(Clone, Debug)]
pub struct FnDef {
    pub kind: FnKind,
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub body: Spanned<Block>,
    pub span: Span,
}

impl FnDef {
    /// Parameters filled positionally at launch (everything not `const`).
    pub fn runtime_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.is_const)
    }

    pub fn const_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.is_const)
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: Spanned<String>,
    pub is_const: bool,
    pub default: Option<Spanned<Expr>>,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

/// Binding pattern for `let` and plain assignment.
#[derive(Clone, Debug)]
pub enum Pattern {
    Name(Spanned<String>),
    Tuple(Vec<Spanned<String>>),
}

impl Pattern {
    pub fn names(&self) -> Vec<&Spanned<String>> {
        match self {
            Pattern::Name(n) => vec![n],
            Pattern::Tuple(ns) => ns.iter().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        pattern: Pattern,
        init: Spanned<Expr>,
    },
    /// `x = e`, `(a, b) = e`, or `x op= e` (then `op` is set and the
    /// pattern is a single name).
    Assign {
        target: Pattern,
        op: Option<BinOp>,
        value: Spanned<Expr>,
    },
    If {
        cond: Spanned<Expr>,
        then_block: Spanned<Block>,
        else_block: Option<Spanned<Block>>,
    },
    /// `for var in range(start, end[, step]) { body }`
    For {
        var: Spanned<String>,
        start: Spanned<Expr>,
        end: Spanned<Expr>,
        step: Option<Spanned<Expr>>,
        body: Spanned<Block>,
    },
    Return(Option<Spanned<Expr>>),
    Pass,
    Expr(Spanned<Expr>),
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    BinOp {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Call {
        callee: Spanned<String>,
        args: Vec<CallArg>,
    },
    /// `recv.method(args)`; only `.to(...)` is meaningful today.
    Method {
        receiver: Box<Spanned<Expr>>,
        method: Spanned<String>,
        args: Vec<CallArg>,
    },
    /// `expr.attr` (`dtype`, `element_ty`, `shape`)
    Attr {
        expr: Box<Spanned<Expr>>,
        attr: Spanned<String>,
    },
    /// `expr[None, :]`
    Index {
        expr: Box<Spanned<Expr>>,
        items: Vec<Spanned<IndexItem>>,
    },
    Tuple(Vec<Spanned<Expr>>),
}

/// One argument at a call site, positional or `name=value`.
#[derive(Clone, Debug)]
pub struct CallArg {
    pub name: Option<Spanned<String>>,
    pub value: Spanned<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexItem {
    /// `:` keeps an existing axis.
    Full,
    /// `None` inserts a size-1 axis.
    NewAxis,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,      // +
    Sub,      // -
    Mul,      // *
    Div,      // /
    FloorDiv, // //
    Mod,      // %
    BitAnd,   // &
    BitOr,    // |
    BitXor,   // ^
    Shl,      // <<
    Shr,      // >>
    Eq,       // ==
    Ne,       // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    And,      // and
    Or,       // or
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        )
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,    // -
    Invert, // ~
    Not,    // not
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not",
        }
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
