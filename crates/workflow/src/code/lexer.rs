//! Tokenizer for inline code blocks.

use super::CodeError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
    pub token: Token,
    pub line: usize,
}

const TWO_CHAR_OPS: [&str; 8] = ["//", "==", "!=", "<=", ">=", "+=", "-=", "*="];
const ONE_CHAR_OPS: [&str; 8] = ["+", "-", "*", "/", "%", "<", ">", "="];

pub(super) fn tokenize(source: &str) -> Result<Vec<Spanned>, CodeError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    // Newlines inside brackets continue the statement.
    let mut depth = 0usize;
    let mut i = 0;

    let syntax = |line: usize, message: String| CodeError::Syntax { line, message };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                if depth == 0 {
                    tokens.push(Spanned { token: Token::Newline, line });
                }
                line += 1;
                i += 1;
            }
            ';' => {
                tokens.push(Spanned { token: Token::Newline, line });
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                line += 1;
                i += 2;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '0'..='9' => {
                let (token, next) = number(&chars, i).map_err(|m| syntax(line, m))?;
                tokens.push(Spanned { token, line });
                i = next;
            }
            '.' if chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                let (token, next) = number(&chars, i).map_err(|m| syntax(line, m))?;
                tokens.push(Spanned { token, line });
                i = next;
            }
            '.' => return Err(syntax(line, "attribute access is not allowed".into())),
            '"' | '\'' => {
                let (text, next) = string(&chars, i).map_err(|m| syntax(line, m))?;
                tokens.push(Spanned { token: Token::Str(text), line });
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Spanned { token: Token::Name(name), line });
            }
            '(' | '[' | '{' => {
                depth += 1;
                let token = match c {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                };
                tokens.push(Spanned { token, line });
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                let token = match c {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                };
                tokens.push(Spanned { token, line });
                i += 1;
            }
            ',' => {
                tokens.push(Spanned { token: Token::Comma, line });
                i += 1;
            }
            ':' => {
                tokens.push(Spanned { token: Token::Colon, line });
                i += 1;
            }
            _ => {
                let pair: String = chars[i..chars.len().min(i + 2)].iter().collect();
                if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                    tokens.push(Spanned { token: Token::Op(*op), line });
                    i += 2;
                } else if let Some(op) = ONE_CHAR_OPS.iter().find(|op| op.starts_with(c)) {
                    tokens.push(Spanned { token: Token::Op(*op), line });
                    i += 1;
                } else {
                    return Err(syntax(line, format!("unexpected character '{c}'")));
                }
            }
        }
    }
    Ok(tokens)
}

fn number(chars: &[char], start: usize) -> Result<(Token, usize), String> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let is_float = chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit);
    if is_float {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text: String = chars[start..i].iter().collect();
    let token = if is_float {
        Token::Float(text.parse().map_err(|_| format!("invalid number '{text}'"))?)
    } else {
        Token::Int(text.parse().map_err(|_| format!("integer literal '{text}' is too large"))?)
    };
    Ok((token, i))
}

fn string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None | Some('\n') => return Err("unterminated string literal".into()),
            Some(c) if *c == quote => return Ok((out, i + 1)),
            Some('\\') => {
                let escaped = chars.get(i + 1).ok_or("unterminated string literal")?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' | '\'' | '"' => out.push(*escaped),
                    other => {
                        out.push('\\');
                        out.push(*other);
                    }
                }
                i += 2;
            }
            Some(c) => {
                out.push(*c);
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn tokenizes_assignment() {
        assert_eq!(
            kinds("x = 2.5 // 'a\\'b'"),
            vec![
                Token::Name("x".into()),
                Token::Op("="),
                Token::Float(2.5),
                Token::Op("//"),
                Token::Str("a'b".into()),
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let tokens = kinds("x = [1,\n 2]\ny = 1");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
    }

    #[test]
    fn comments_and_semicolons() {
        let tokens = tokenize("a = 1; b = 2 # trailing\n# whole line\nc = 3").unwrap();
        assert_eq!(tokens.iter().filter(|t| t.token == Token::Newline).count(), 3);
        assert_eq!(tokens.last().unwrap().line, 3);
    }

    #[test]
    fn rejects_attribute_access_and_strays() {
        assert!(matches!(tokenize("x.y"), Err(CodeError::Syntax { .. })));
        assert!(matches!(tokenize("x = 1 @ 2"), Err(CodeError::Syntax { .. })));
        assert!(matches!(tokenize("s = 'open"), Err(CodeError::Syntax { .. })));
    }
}
