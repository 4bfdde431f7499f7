//! Command-Line Tokenizer
//!
//! Turns a request payload such as
//!
//! ```text
//! set greeting "hello world"
//! ```
//!
//! into a [`Command`] with name `set` and arguments `["greeting", "hello world"]`.
//!
//! ## Rules
//!
//! - Whitespace separates tokens.
//! - `'...'` and `"..."` quote a span; whitespace inside is kept. A quoted span
//!   may be empty and still yields a token, and it can be glued to unquoted
//!   text (`a"b c"` is the single token `ab c`).
//! - Outside quotes, a backslash makes the next character literal.
//! - Inside quotes, a backslash only escapes the active quote character or
//!   another backslash; any other backslash is kept as is.

use thiserror::Error;

/// A command name plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

/// Errors produced while splitting a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("ERR empty request")]
    Empty,

    #[error("ERR unclosed quote {0} in command line")]
    UnterminatedQuote(char),

    #[error("ERR trailing backslash in command line")]
    DanglingEscape,
}

/// Splits a command line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                _ if c == q => quote = None,
                '\\' => match chars.next() {
                    Some(next) if next == q || next == '\\' => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(TokenizeError::UnterminatedQuote(q)),
                },
                _ => current.push(c),
            }
            continue;
        }

        match c {
            '\\' => {
                let next = chars.next().ok_or(TokenizeError::DanglingEscape)?;
                current.push(next);
                in_token = true;
            }
            '"' | '\'' => {
                quote = Some(c);
                in_token = true;
            }
            _ if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            _ => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(TokenizeError::UnterminatedQuote(q));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Tokenizes a command line; the first token is the command name.
///
/// # Example
///
/// ```
/// use kvstore::protocol::parse_command;
///
/// let command = parse_command(r#"set greeting "hello world""#).unwrap();
/// assert_eq!(command.name, "set");
/// assert_eq!(command.args, vec!["greeting", "hello world"]);
/// ```
pub fn parse_command(line: &str) -> Result<Command, TokenizeError> {
    let mut tokens = tokenize(line)?.into_iter();
    let name = tokens.next().ok_or(TokenizeError::Empty)?;
    Ok(Command::new(name, tokens.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<&str> {
        command.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_plain_words() {
        let command = parse_command("  get   key\t").unwrap();
        assert_eq!(command.name, "get");
        assert_eq!(args(&command), vec!["key"]);
    }

    #[test]
    fn test_quoted_spans() {
        let command = parse_command(r#"set "a b" 'c  d' e"#).unwrap();
        assert_eq!(command.name, "set");
        assert_eq!(args(&command), vec!["a b", "c  d", "e"]);
    }

    #[test]
    fn test_empty_quotes_make_a_token() {
        let command = parse_command(r#"set key """#).unwrap();
        assert_eq!(args(&command), vec!["key", ""]);
    }

    #[test]
    fn test_other_quote_inside_quotes() {
        let command = parse_command(r#"set k "it's""#).unwrap();
        assert_eq!(args(&command), vec!["k", "it's"]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(tokenize(r"a\ b").unwrap(), vec!["a b"]);
        assert_eq!(tokenize(r#"\"quoted\""#).unwrap(), vec![r#""quoted""#]);
        assert_eq!(tokenize(r#""say \"hi\"""#).unwrap(), vec![r#"say "hi""#]);
        assert_eq!(tokenize(r#""c:\path""#).unwrap(), vec![r"c:\path"]);
    }

    #[test]
    fn test_first_character_is_not_escaped() {
        // A leading quote opens a quoted span rather than being taken literally
        assert_eq!(tokenize(r#""a b""#).unwrap(), vec!["a b"]);
        assert_eq!(tokenize(" get").unwrap(), vec!["get"]);
    }

    #[test]
    fn test_glued_quotes() {
        assert_eq!(tokenize(r#"a"b c"d"#).unwrap(), vec!["ab cd"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_command(""), Err(TokenizeError::Empty));
        assert_eq!(parse_command("   "), Err(TokenizeError::Empty));
        assert_eq!(
            parse_command("set 'unterminated"),
            Err(TokenizeError::UnterminatedQuote('\''))
        );
        assert_eq!(parse_command(r"get key\"), Err(TokenizeError::DanglingEscape));
    }

    #[test]
    fn test_display() {
        let command = parse_command(r#"set key "a b""#).unwrap();
        assert_eq!(command.to_string(), r#"set "key" "a b""#);
    }
}
