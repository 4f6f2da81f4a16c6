//! Shell-style word processing for Dockerfile values.
//!
//! Expands `$NAME` and `${NAME}` references (with the `:-`, `-`, `:+`, `+`,
//! `:?` and `?` modifiers) and removes quoting, the way Docker resolves
//! ARG and ENV values. The result is always a single word.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use stagekey_core::error::{DigestError, Result};

/// Variable bindings visible to a word.
pub type Vars = HashMap<String, String>;

const ESCAPE: char = '\\';

/// Merge scopes into one lookup table; later scopes win on key collision.
pub fn merge_scopes(scopes: &[&Vars]) -> Vars {
    let mut merged = Vars::new();
    for scope in scopes {
        for (key, value) in scope.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Resolve variable references and quoting in `text`.
///
/// Unset variables expand to the empty string.
pub fn resolve(text: &str, vars: &Vars) -> Result<String> {
    let mut lexer = Lexer {
        chars: text.chars().peekable(),
        vars,
    };
    lexer
        .process_until(None)
        .map(|(word, _)| word)
        .map_err(|message| DigestError::ExpansionError {
            input: text.to_string(),
            message,
        })
}

type LexResult<T> = std::result::Result<T, String>;

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    vars: &'a Vars,
}

impl<'a> Lexer<'a> {
    /// Process characters until `stop` (consumed) or the end of input.
    ///
    /// Returns the word and whether the stop character was found.
    fn process_until(&mut self, stop: Option<char>) -> LexResult<(String, bool)> {
        let mut result = String::new();

        while let Some(ch) = self.chars.next() {
            if Some(ch) == stop {
                return Ok((result, true));
            }
            match ch {
                '\'' => result.push_str(&self.single_quoted()?),
                '"' => result.push_str(&self.double_quoted()?),
                '$' => result.push_str(&self.dollar()?),
                ESCAPE => match self.chars.next() {
                    Some(escaped) => result.push(escaped),
                    None => return Err("unexpected end of statement after escape".to_string()),
                },
                other => result.push(other),
            }
        }

        Ok((result, false))
    }

    fn single_quoted(&mut self) -> LexResult<String> {
        let mut result = String::new();
        loop {
            match self.chars.next() {
                Some('\'') => return Ok(result),
                Some(ch) => result.push(ch),
                None => {
                    return Err(
                        "unexpected end of statement while looking for matching single-quote"
                            .to_string(),
                    )
                }
            }
        }
    }

    fn double_quoted(&mut self) -> LexResult<String> {
        let mut result = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(result),
                Some('$') => result.push_str(&self.dollar()?),
                Some(ESCAPE) => match self.chars.peek() {
                    Some(&next) if next == '"' || next == '$' || next == ESCAPE => {
                        self.chars.next();
                        result.push(next);
                    }
                    _ => result.push(ESCAPE),
                },
                Some(ch) => result.push(ch),
                None => {
                    return Err(
                        "unexpected end of statement while looking for matching double-quote"
                            .to_string(),
                    )
                }
            }
        }
    }

    /// Expand a reference; the leading `$` is already consumed.
    fn dollar(&mut self) -> LexResult<String> {
        if self.chars.peek() != Some(&'{') {
            let name = self.name();
            if name.is_empty() {
                return Ok("$".to_string());
            }
            return Ok(self.lookup(&name).unwrap_or_default());
        }

        self.chars.next();
        match self.chars.peek() {
            None => return Err("syntax error: missing '}'".to_string()),
            Some('{') | Some('}') | Some(':') => return Err("bad substitution".to_string()),
            _ => {}
        }

        let name = self.name();
        match self.chars.next() {
            Some('}') => Ok(self.lookup(&name).unwrap_or_default()),
            Some(':') => match self.chars.next() {
                Some('-') => {
                    let word = self.modifier_word()?;
                    Ok(match self.lookup(&name) {
                        Some(value) if !value.is_empty() => value,
                        _ => word,
                    })
                }
                Some('+') => {
                    let word = self.modifier_word()?;
                    Ok(match self.lookup(&name) {
                        Some(value) if !value.is_empty() => word,
                        _ => String::new(),
                    })
                }
                Some('?') => {
                    let word = self.modifier_word()?;
                    match self.lookup(&name) {
                        Some(value) if !value.is_empty() => Ok(value),
                        _ => Err(unset_message(&name, word)),
                    }
                }
                Some(modifier) => Err(format!(
                    "unsupported modifier ({}) in substitution",
                    modifier
                )),
                None => Err("syntax error: missing '}'".to_string()),
            },
            Some('-') => {
                let word = self.modifier_word()?;
                Ok(self.lookup(&name).unwrap_or(word))
            }
            Some('+') => {
                let word = self.modifier_word()?;
                Ok(match self.lookup(&name) {
                    Some(_) => word,
                    None => String::new(),
                })
            }
            Some('?') => {
                let word = self.modifier_word()?;
                self.lookup(&name).ok_or_else(|| unset_message(&name, word))
            }
            Some(_) => Err("missing ':' in substitution".to_string()),
            None => Err("syntax error: missing '}'".to_string()),
        }
    }

    /// Word after a modifier, up to the closing brace.
    fn modifier_word(&mut self) -> LexResult<String> {
        match self.process_until(Some('}'))? {
            (word, true) => Ok(word),
            (_, false) => Err("syntax error: missing '}'".to_string()),
        }
    }

    /// Variable name: digits, one special parameter, or `[A-Za-z0-9_]+`.
    fn name(&mut self) -> String {
        let mut name = String::new();

        match self.chars.peek() {
            Some(ch) if ch.is_ascii_digit() => {
                while let Some(&ch) = self.chars.peek() {
                    if !ch.is_ascii_digit() {
                        break;
                    }
                    name.push(ch);
                    self.chars.next();
                }
                return name;
            }
            Some(&ch) if is_special_param(ch) => {
                self.chars.next();
                name.push(ch);
                return name;
            }
            _ => {}
        }

        while let Some(&ch) = self.chars.peek() {
            if !(ch.is_ascii_alphanumeric() || ch == '_') {
                break;
            }
            name.push(ch);
            self.chars.next();
        }
        name
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

fn is_special_param(ch: char) -> bool {
    matches!(ch, '@' | '*' | '#' | '?' | '-' | '$' | '!' | '0')
}

fn unset_message(name: &str, word: String) -> String {
    if word.is_empty() {
        format!("{}: is not allowed to be unset", name)
    } else {
        format!("{}: {}", name, word)
    }
}
