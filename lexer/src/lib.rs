//! Turns raw source text into a flat token stream. A token is either a bare word (an opcode
//! mnemonic, a number, a label, a keyword) or the placeholder `*`, which marks a quoted string
//! literal whose decoded text was appended to the companion `strings` list instead of being
//! inlined in the token stream — mirrors how the original translator keeps string data out of
//! the word stream so the rest of the pipeline never has to tokenize inside a string.

use std::fmt;

pub const STRING_PLACEHOLDER: &str = "*";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tokens {
    pub words: Vec<String>,
    pub strings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    UnterminatedString,
    UnterminatedEscape,
    UnknownEscape(char),
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedString => write!(f, "unterminated string literal"),
            LexError::UnterminatedEscape => write!(f, "trailing backslash inside string literal"),
            LexError::UnknownEscape(c) => write!(f, "unknown escape sequence \\{}", c),
        }
    }
}

impl std::error::Error for LexError {}

/// Tokenizes `source`. A `\` outside a string runs a comment to end of line; a `"..."` outside
/// a comment is a string literal (escapes: `\\`, `\"`, `\n`, `\t`, `\0`); everything else is
/// split on whitespace.
pub fn tokenize(source: &str) -> Result<Tokens, LexError> {
    let mut tokens = Tokens::default();
    let mut chars = source.chars().peekable();
    let mut word = String::new();

    macro_rules! flush_word {
        () => {
            if !word.is_empty() {
                tokens.words.push(std::mem::take(&mut word));
            }
        };
    }

    while let Some(&c) = chars.peek() {
        match c {
            '\\' => {
                flush_word!();
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                flush_word!();
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        None => return Err(LexError::UnterminatedString),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            None => return Err(LexError::UnterminatedEscape),
                            Some('\\') => literal.push('\\'),
                            Some('"') => literal.push('"'),
                            Some('n') => literal.push('\n'),
                            Some('t') => literal.push('\t'),
                            Some('0') => literal.push('\0'),
                            Some(other) => return Err(LexError::UnknownEscape(other)),
                        },
                        Some(c) => literal.push(c),
                    }
                }
                tokens.strings.push(literal);
                tokens.words.push(STRING_PLACEHOLDER.to_string());
            }
            c if c.is_whitespace() => {
                flush_word!();
                chars.next();
            }
            _ => {
                word.push(c);
                chars.next();
            }
        }
    }
    flush_word!();

    Ok(tokens)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        let tokens = tokenize("lit 1 out 1").unwrap();
        assert_eq!(tokens.words, vec!["lit", "1", "out", "1"]);
        assert!(tokens.strings.is_empty());
    }

    #[test]
    fn backslash_runs_a_comment_to_end_of_line() {
        let tokens = tokenize("lit 1 \\ push one\nout 1").unwrap();
        assert_eq!(tokens.words, vec!["lit", "1", "out", "1"]);
    }

    #[test]
    fn quoted_strings_become_a_placeholder_plus_sidecar_text() {
        let tokens = tokenize(r#"str greeting "Hi\n""#).unwrap();
        assert_eq!(tokens.words, vec!["str", "greeting", "*"]);
        assert_eq!(tokens.strings, vec!["Hi\n".to_string()]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert_eq!(tokenize("str x \"oops"), Err(LexError::UnterminatedString));
    }
}
