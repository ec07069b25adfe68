use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,

    // Operators
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEq,
    #[token("=")]
    Assign,
    #[token("==")]
    EqEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len()-1].to_string())
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// Lex source code into a stream of tokens with byte ranges.
pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                let snippet = source[span.clone()].to_string();
                return Err(LexError {
                    position: span.start,
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "Close the string literal with a matching '\"'".to_string()
    } else if bad_token.chars().all(|c| c.is_ascii_digit()) {
        format!("Integer literal '{}' does not fit in 64 bits", bad_token)
    } else {
        format!("Unexpected character(s): '{}'", bad_token)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_var_declaration() {
        assert_eq!(
            kinds("var a = 10;"),
            vec![
                Token::Var,
                Token::Ident("a".to_string()),
                Token::Assign,
                Token::Number(10),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn lex_keyword_prefix_is_identifier() {
        assert_eq!(kinds("variable"), vec![Token::Ident("variable".to_string())]);
        assert_eq!(kinds("print_me"), vec![Token::Ident("print_me".to_string())]);
    }

    #[test]
    fn lex_two_char_operators() {
        assert_eq!(
            kinds("<= >= == != < > = !"),
            vec![
                Token::LessEq,
                Token::GreaterEq,
                Token::EqEq,
                Token::BangEq,
                Token::Less,
                Token::Greater,
                Token::Assign,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn lex_string_literal() {
        assert_eq!(kinds(r#""hello world""#), vec![Token::Str("hello world".to_string())]);
    }

    #[test]
    fn lex_comment_ignored() {
        let tokens = kinds("// leading comment\nprint 1; // trailing");
        assert_eq!(tokens, vec![Token::Print, Token::Number(1), Token::Semicolon]);
    }

    #[test]
    fn lex_spans_are_byte_ranges() {
        let tokens = lex("print  42;").unwrap();
        assert_eq!(tokens[1].1, 7..9);
    }

    #[test]
    fn lex_unterminated_string_is_error() {
        let err = lex("print \"oops;").unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.suggestion.contains("string"), "got: {}", err.suggestion);
    }

    #[test]
    fn lex_unknown_character_is_error() {
        let err = lex("var a = 1 % 2;").unwrap_err();
        assert_eq!(err.snippet, "%");
    }
}
