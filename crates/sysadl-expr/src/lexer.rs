use sysadl_core::{ErrorKind, SysadlError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: [&str; 24] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "(", ")", "[", "]", ".", ",", "?", ":",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, SysadlError> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        if ch.is_ascii_digit()
            || (ch == '.' && chars.get(index + 1).is_some_and(char::is_ascii_digit))
        {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.') {
                index += 1;
            }
            let text = chars[start..index].iter().collect::<String>();
            let number = text.parse::<f64>().map_err(|_| {
                lex_error(source, format!("invalid number literal \"{}\"", text))
            })?;
            tokens.push(Token::Number(number));
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            index += 1;
            let mut text = String::new();
            loop {
                let Some(&current) = chars.get(index) else {
                    return Err(lex_error(source, "unterminated string literal"));
                };
                index += 1;
                if current == quote {
                    break;
                }
                if current == '\\' {
                    let Some(&escaped) = chars.get(index) else {
                        return Err(lex_error(source, "unterminated escape sequence"));
                    };
                    index += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    continue;
                }
                text.push(current);
            }
            tokens.push(Token::Str(text));
            continue;
        }

        if is_ident_start(ch) {
            let start = index;
            while index < chars.len() && is_ident_continue(chars[index]) {
                index += 1;
            }
            tokens.push(Token::Ident(chars[start..index].iter().collect()));
            continue;
        }

        let rest = chars[index..].iter().take(3).collect::<String>();
        let Some(punct) = PUNCTUATION.iter().find(|punct| rest.starts_with(**punct)) else {
            return Err(lex_error(source, format!("unexpected character '{}'", ch)));
        };
        index += punct.chars().count();
        tokens.push(Token::Punct(punct));
    }

    Ok(tokens)
}

pub(crate) fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

pub(crate) fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

fn lex_error(source: &str, detail: impl Into<String>) -> SysadlError {
    SysadlError::new(
        ErrorKind::ExpressionEvaluationError,
        format!("Expression \"{}\" is invalid: {}", source, detail.into()),
    )
}

#[cfg(test)]
mod lexer_tests {
    use super::*;

    #[test]
    fn splits_operators_longest_first() {
        let tokens = tokenize("a.b === 'x' && !c").expect("lex should pass");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".to_string()),
                Token::Punct("."),
                Token::Ident("b".to_string()),
                Token::Punct("==="),
                Token::Str("x".to_string()),
                Token::Punct("&&"),
                Token::Punct("!"),
                Token::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        let error = tokenize("name == \"abc").expect_err("lex should fail");
        assert_eq!(error.kind, ErrorKind::ExpressionEvaluationError);
    }
}
