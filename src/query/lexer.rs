//! Query tokenizer

use super::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Element name, function name or operator keyword (`and`, `or`)
    Name(String),
    Literal(String),
    Number(f64),
    Slash,
    Star,
    Dot,
    DotDot,
    LParen,
    RParen,
    Comma,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Token plus its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, QueryError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let peek = chars.get(i + 1).map(|&(_, c)| c);

        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' => Token::Slash,
            '*' => Token::Star,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '-' => Token::Minus,
            '=' => Token::Eq,
            '!' if peek == Some('=') => {
                i += 1;
                Token::Ne
            }
            '<' if peek == Some('=') => {
                i += 1;
                Token::Le
            }
            '>' if peek == Some('=') => {
                i += 1;
                Token::Ge
            }
            '<' => Token::Lt,
            '>' => Token::Gt,
            '.' if peek == Some('.') => {
                i += 1;
                Token::DotDot
            }
            '.' if !peek.map(|p| p.is_ascii_digit()).unwrap_or(false) => Token::Dot,
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(QueryError::new("unterminated string literal", pos));
                }
                let text: String = chars[start..end].iter().map(|&(_, c)| c).collect();
                i = end;
                Token::Literal(text)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].1.is_ascii_digit() || chars[end].1 == '.')
                {
                    end += 1;
                }
                let text: String = chars[start..end].iter().map(|&(_, c)| c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| QueryError::new(format!("invalid number '{}'", text), pos))?;
                i = end - 1;
                Token::Number(value)
            }
            c if is_name_start(c) => {
                let start = i;
                let mut end = i;
                while end < chars.len() && is_name_char(chars[end].1) {
                    end += 1;
                }
                let text: String = chars[start..end].iter().map(|&(_, c)| c).collect();
                i = end - 1;
                Token::Name(text)
            }
            other => {
                return Err(QueryError::new(
                    format!("unexpected character '{}'", other),
                    pos,
                ))
            }
        };

        tokens.push(Spanned { token, pos });
        i += 1;
    }

    Ok(tokens)
}
