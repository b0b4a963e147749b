//! Key expression mini-language.
//!
//! Grammar:
//!
//! ```text
//! template := term ( '+' term )*
//! term     := literal | variable
//! literal  := '\'' ( any char except '\'' | "''" )* '\''
//! variable := '#' ident ( '.' ident )*
//! ident    := [A-Za-z_] [A-Za-z0-9_]*
//! ```
//!
//! Whitespace between tokens is ignored. A variable names a call argument;
//! `.field` segments index into map values by string key.

use std::fmt;
use std::str::FromStr;

use crate::error::KeyError;
use crate::value::{ArgValue, KeyArgs};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Literal(String),
    Variable { name: String, path: Vec<String> },
}

/// A parsed key expression such as `'group:' + #groupId + '-member:' + #memberId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    terms: Vec<Term>,
}

impl KeyTemplate {
    /// Parses a key expression.
    ///
    /// Errors carry the byte offset of the offending token.
    pub fn parse(source: &str) -> Result<Self, KeyError> {
        let terms = Parser::new(source).parse()?;
        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    /// The expression as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the arguments this expression reads, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|t| match t {
            Term::Variable { name, .. } => Some(name.as_str()),
            Term::Literal(_) => None,
        })
    }

    /// Evaluates the expression against call arguments.
    ///
    /// A single-term expression yields the raw value, so `#ids` produces the
    /// list itself. Multi-term expressions concatenate canonical forms into a
    /// string. A null result, or a null term in a concatenation, is an error.
    pub fn evaluate(&self, args: &KeyArgs) -> Result<ArgValue, KeyError> {
        if let [term] = self.terms.as_slice() {
            let value = self.resolve(term, args)?;
            if value.is_null() {
                return Err(KeyError::null_key(&self.source));
            }
            return Ok(value);
        }

        let mut out = String::new();
        for term in &self.terms {
            match term {
                Term::Literal(text) => out.push_str(text),
                Term::Variable { .. } => {
                    let value = self.resolve(term, args)?;
                    if value.is_null() {
                        return Err(KeyError::null_key(&self.source));
                    }
                    value.write_canonical(&mut out);
                }
            }
        }
        Ok(ArgValue::Str(out))
    }

    /// Evaluates and renders the canonical string form.
    pub fn render(&self, args: &KeyArgs) -> Result<String, KeyError> {
        self.evaluate(args).map(|v| v.canonical())
    }

    fn resolve(&self, term: &Term, args: &KeyArgs) -> Result<ArgValue, KeyError> {
        match term {
            Term::Literal(text) => Ok(ArgValue::Str(text.clone())),
            Term::Variable { name, path } => {
                let mut current = args
                    .get(name)
                    .ok_or_else(|| KeyError::unbound_variable(&self.source, name))?;
                for field in path {
                    current = match current {
                        ArgValue::Map(_) => current.field(field).ok_or_else(|| {
                            KeyError::invalid_expression(
                                &self.source,
                                format!("'#{name}' has no field '{field}'"),
                            )
                        })?,
                        ArgValue::Null => return Err(KeyError::null_key(&self.source)),
                        _ => {
                            return Err(KeyError::invalid_expression(
                                &self.source,
                                format!("cannot read field '{field}' of a non-map value"),
                            ));
                        }
                    };
                }
                Ok(current.clone())
            }
        }
    }
}

impl FromStr for KeyTemplate {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn error(&self, pos: usize, reason: impl fmt::Display) -> KeyError {
        KeyError::invalid_expression(self.source, format!("{reason} at position {pos}"))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn parse(mut self) -> Result<Vec<Term>, KeyError> {
        let mut terms = Vec::new();
        loop {
            self.skip_whitespace();
            terms.push(self.term()?);
            self.skip_whitespace();
            match self.chars.next() {
                None => return Ok(terms),
                Some((_, '+')) => continue,
                Some((pos, c)) => return Err(self.error(pos, format_args!("expected '+', found '{c}'"))),
            }
        }
    }

    fn term(&mut self) -> Result<Term, KeyError> {
        match self.chars.next() {
            Some((pos, '\'')) => self.literal(pos),
            Some((_, '#')) => self.variable(),
            Some((pos, c)) => Err(self.error(pos, format_args!("unexpected '{c}'"))),
            None => Err(self.error(self.source.len(), "expected a term")),
        }
    }

    fn literal(&mut self, start: usize) -> Result<Term, KeyError> {
        let mut text = String::new();
        while let Some((_, c)) = self.chars.next() {
            if c == '\'' {
                if self.chars.next_if(|(_, c)| *c == '\'').is_some() {
                    text.push('\'');
                    continue;
                }
                return Ok(Term::Literal(text));
            }
            text.push(c);
        }
        Err(self.error(start, "unterminated string literal"))
    }

    fn variable(&mut self) -> Result<Term, KeyError> {
        let name = self.ident()?;
        let mut path = Vec::new();
        while self.chars.next_if(|(_, c)| *c == '.').is_some() {
            path.push(self.ident()?);
        }
        Ok(Term::Variable { name, path })
    }

    fn ident(&mut self) -> Result<String, KeyError> {
        let mut ident = String::new();
        match self.chars.peek().copied() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            Some((pos, c)) => {
                return Err(self.error(pos, format_args!("expected identifier, found '{c}'")));
            }
            None => return Err(self.error(self.source.len(), "expected identifier")),
        }
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        {
            ident.push(c);
        }
        Ok(ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render_concatenation() {
        let template = KeyTemplate::parse("'group:' + #groupId + '-member:' + #memberId").unwrap();
        let args = KeyArgs::new().arg("groupId", 42).arg("memberId", 7);
        assert_eq!(template.render(&args).unwrap(), "group:42-member:7");
        assert_eq!(template.variables().collect::<Vec<_>>(), vec!["groupId", "memberId"]);
    }

    #[test]
    fn test_single_variable_yields_raw_value() {
        let template: KeyTemplate = "#ids".parse().unwrap();
        let args = KeyArgs::new().arg("ids", vec![1, 2, 3]);
        assert_eq!(
            template.evaluate(&args).unwrap(),
            ArgValue::from(vec![1, 2, 3])
        );
        assert_eq!(template.render(&args).unwrap(), "[1,2,3]");
    }

    #[test]
    fn test_escaped_quote_and_whitespace() {
        let template = KeyTemplate::parse("  'it''s' +#x  ").unwrap();
        let args = KeyArgs::new().arg("x", "!");
        assert_eq!(template.render(&args).unwrap(), "it's!");
    }

    #[test]
    fn test_field_path() {
        let template = KeyTemplate::parse("'post:' + #req.postId").unwrap();
        let req = serde_json::json!({"postId": 10, "title": "hello"});
        let args = KeyArgs::new().arg("req", req);
        assert_eq!(template.render(&args).unwrap(), "post:10");

        let missing = KeyTemplate::parse("#req.authorId").unwrap();
        assert!(matches!(
            missing.render(&args),
            Err(KeyError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_unbound_and_null() {
        let template = KeyTemplate::parse("'group:' + #groupId").unwrap();
        let err = template.render(&KeyArgs::new()).unwrap_err();
        assert_eq!(
            err,
            KeyError::unbound_variable("'group:' + #groupId", "groupId")
        );

        let args = KeyArgs::new().arg("groupId", None::<i64>);
        assert!(matches!(template.render(&args), Err(KeyError::NullKey { .. })));

        let single = KeyTemplate::parse("#groupId").unwrap();
        assert!(matches!(single.render(&args), Err(KeyError::NullKey { .. })));
    }

    #[test]
    fn test_nested_null_renders() {
        let template = KeyTemplate::parse("#ids").unwrap();
        let args = KeyArgs::new().arg("ids", vec![Some(1), None]);
        assert_eq!(template.render(&args).unwrap(), "[1,null]");
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "'open", "#", "#1abc", "'a' +", "'a' 'b'", "groupId", "#a..b"] {
            let err = KeyTemplate::parse(bad).unwrap_err();
            assert!(
                matches!(err, KeyError::InvalidExpression { .. }),
                "expected parse error for {bad:?}, got {err:?}"
            );
        }

        let err = KeyTemplate::parse("'a' + $b").unwrap_err();
        assert!(err.to_string().contains("position 6"), "{err}");
    }

    #[test]
    fn test_literal_only() {
        let template = KeyTemplate::parse("'fixed'").unwrap();
        assert_eq!(template.render(&KeyArgs::new()).unwrap(), "fixed");
        assert_eq!(template.to_string(), "'fixed'");
    }
}
