/// All lexemes in the kernel language.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Kernel,
    Fn,
    Let,
    Const,
    If,
    Else,
    For,
    In,
    Return,
    Pass,
    True,
    False,
    None,
    And,
    Or,
    Not,

    // Symbols
    LParen,      // (
    RParen,      // )
    LBrace,      // {
    RBrace,      // }
    LBracket,    // [
    RBracket,    // ]
    Comma,       // ,
    Colon,       // :
    Semicolon,   // ;
    Dot,         // .
    Eq,          // =
    EqEq,        // ==
    NotEq,       // !=
    Lt,          // <
    LtEq,        // <=
    Gt,          // >
    GtEq,        // >=
    Shl,         // <<
    Shr,         // >>
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    SlashSlash,  // //
    Percent,     // %
    Amp,         // &
    Pipe,        // |
    Caret,       // ^
    Tilde,       // ~
    PlusEq,      // +=
    MinusEq,     // -=
    StarEq,      // *=
    SlashEq,     // /=
    PercentEq,   // %=
    AmpEq,       // &=
    PipeEq,      // |=
    CaretEq,     // ^=

    // Literals
    Integer(u64),
    Float(f64),
    Str(String),
    Ident(String),

    /// Statement separator. Suppressed inside `()` and `[]`.
    Newline,

    // End of file
    Eof,
}

impl Lexeme {
    /// Try to match an identifier string to a keyword lexeme.
    pub fn from_keyword(s: &str) -> Option<Lexeme> {
        match s {
            "kernel" => Some(Lexeme::Kernel),
            "fn" => Some(Lexeme::Fn),
            "let" => Some(Lexeme::Let),
            "const" => Some(Lexeme::Const),
            "if" => Some(Lexeme::If),
            "else" => Some(Lexeme::Else),
            "for" => Some(Lexeme::For),
            "in" => Some(Lexeme::In),
            "return" => Some(Lexeme::Return),
            "pass" => Some(Lexeme::Pass),
            "true" | "True" => Some(Lexeme::True),
            "false" | "False" => Some(Lexeme::False),
            "None" => Some(Lexeme::None),
            "and" => Some(Lexeme::And),
            "or" => Some(Lexeme::Or),
            "not" => Some(Lexeme::Not),
            _ => None,
        }
    }

    /// Human-readable description for error messages.
    pub fn description(&self) -> String {
        match self {
            Lexeme::Kernel => "'kernel'".into(),
            Lexeme::Fn => "'fn'".into(),
            Lexeme::Let => "'let'".into(),
            Lexeme::Const => "'const'".into(),
            Lexeme::If => "'if'".into(),
            Lexeme::Else => "'else'".into(),
            Lexeme::For => "'for'".into(),
            Lexeme::In => "'in'".into(),
            Lexeme::Return => "'return'".into(),
            Lexeme::Pass => "'pass'".into(),
            Lexeme::True => "'true'".into(),
            Lexeme::False => "'false'".into(),
            Lexeme::None => "'None'".into(),
            Lexeme::And => "'and'".into(),
            Lexeme::Or => "'or'".into(),
            Lexeme::Not => "'not'".into(),
            Lexeme::LParen => "'('".into(),
            Lexeme::RParen => "')'".into(),
            Lexeme::LBrace => "'{'".into(),
            Lexeme::RBrace => "'}'".into(),
            Lexeme::LBracket => "'['".into(),
            Lexeme::RBracket => "']'".into(),
            Lexeme::Comma => "','".into(),
            Lexeme::Colon => "':'".into(),
            Lexeme::Semicolon => "';'".into(),
            Lexeme::Dot => "'.'".into(),
            Lexeme::Eq => "'='".into(),
            Lexeme::EqEq => "'=='".into(),
            Lexeme::NotEq => "'!='".into(),
            Lexeme::Lt => "'<'".into(),
            Lexeme::LtEq => "'<='".into(),
            Lexeme::Gt => "'>'".into(),
            Lexeme::GtEq => "'>='".into(),
            Lexeme::Shl => "'<<'".into(),
            Lexeme::Shr => "'>>'".into(),
            Lexeme::Plus => "'+'".into(),
            Lexeme::Minus => "'-'".into(),
            Lexeme::Star => "'*'".into(),
            Lexeme::Slash => "'/'".into(),
            Lexeme::SlashSlash => "'//'".into(),
            Lexeme::Percent => "'%'".into(),
            Lexeme::Amp => "'&'".into(),
            Lexeme::Pipe => "'|'".into(),
            Lexeme::Caret => "'^'".into(),
            Lexeme::Tilde => "'~'".into(),
            Lexeme::PlusEq => "'+='".into(),
            Lexeme::MinusEq => "'-='".into(),
            Lexeme::StarEq => "'*='".into(),
            Lexeme::SlashEq => "'/='".into(),
            Lexeme::PercentEq => "'%='".into(),
            Lexeme::AmpEq => "'&='".into(),
            Lexeme::PipeEq => "'|='".into(),
            Lexeme::CaretEq => "'^='".into(),
            Lexeme::Integer(n) => format!("integer {}", n),
            Lexeme::Float(x) => format!("float {}", x),
            Lexeme::Str(s) => format!("string {:?}", s),
            Lexeme::Ident(name) => format!("identifier '{}'", name),
            Lexeme::Newline => "end of line".into(),
            Lexeme::Eof => "end of file".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(Lexeme::from_keyword("kernel"), Some(Lexeme::Kernel));
        assert_eq!(Lexeme::from_keyword("None"), Some(Lexeme::None));
        assert_eq!(Lexeme::from_keyword("True"), Some(Lexeme::True));
        assert_eq!(Lexeme::from_keyword("load"), None);
    }

    #[test]
    fn test_description() {
        assert_eq!(Lexeme::Ident("x".into()).description(), "identifier 'x'");
        assert_eq!(Lexeme::SlashSlash.description(), "'//'");
    }
}
