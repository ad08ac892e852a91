use std::iter::Peekable;
use std::str::Chars;

use crate::error::{Result, SchemeError};
use crate::eval::MAX_DEPTH;
use crate::value::Value;

/// Reads data one at a time from source text
pub struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    depth: usize,
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';' | '\'')
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            depth: 0,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> SchemeError {
        SchemeError::Syntax(format!("line {}: {}", self.line, message))
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn skip_atmosphere(&mut self) {
        while let Some(&ch) = self.chars.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == ';' {
                while let Some(ch) = self.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// The next datum, or `None` at end of input
    pub fn next_datum(&mut self) -> Result<Option<Value>> {
        self.skip_atmosphere();
        if self.chars.peek().is_none() {
            return Ok(None);
        }
        self.datum().map(Some)
    }

    fn datum(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("data nested too deeply"));
        }
        self.depth += 1;
        let datum = self.nested_datum();
        self.depth -= 1;
        datum
    }

    fn nested_datum(&mut self) -> Result<Value> {
        self.skip_atmosphere();
        let Some(ch) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        match ch {
            '(' | '[' => self.list(if ch == '(' { ')' } else { ']' }),
            ')' | ']' => Err(self.error(format!("unexpected '{ch}'"))),
            '\'' => self.abbreviation("quote"),
            '`' => self.abbreviation("quasiquote"),
            ',' => {
                if self.chars.peek() == Some(&'@') {
                    self.bump();
                    self.abbreviation("unquote-splicing")
                } else {
                    self.abbreviation("unquote")
                }
            }
            '"' => self.string(),
            _ => self.atom(ch),
        }
    }

    fn abbreviation(&mut self, name: &str) -> Result<Value> {
        let quoted = self.datum()?;
        Ok(Value::list([Value::symbol(name), quoted]))
    }

    fn list(&mut self, close: char) -> Result<Value> {
        let mut items = Vec::new();
        let mut tail = Value::Nil;
        loop {
            self.skip_atmosphere();
            match self.chars.peek() {
                None => return Err(self.error("unterminated list")),
                Some(&ch) if ch == close => {
                    self.bump();
                    break;
                }
                Some(')') | Some(']') => return Err(self.error("mismatched brackets")),
                _ => {}
            }

            let item = self.datum()?;
            if matches!(&item, Value::Symbol(name) if name.as_ref() == ".") {
                if items.is_empty() {
                    return Err(self.error("'.' at start of list"));
                }
                tail = self.datum()?;
                self.skip_atmosphere();
                if self.bump() != Some(close) {
                    return Err(self.error("expected end of dotted list"));
                }
                break;
            }
            items.push(item);
        }
        Ok(items
            .into_iter()
            .rev()
            .fold(tail, |rest, item| Value::cons(item, rest)))
    }

    fn string(&mut self) -> Result<Value> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(Value::from(text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some(other) => text.push(other),
                    None => return Err(self.error("unterminated string")),
                },
                Some(ch) => text.push(ch),
            }
        }
    }

    fn atom(&mut self, first: char) -> Result<Value> {
        let mut token = String::from(first);
        while let Some(&ch) = self.chars.peek() {
            if is_delimiter(ch) || ch == ']' {
                break;
            }
            token.push(ch);
            self.bump();
        }

        match token.as_str() {
            "#t" | "#true" => return Ok(Value::Bool(true)),
            "#f" | "#false" => return Ok(Value::Bool(false)),
            _ => {}
        }
        if token.starts_with('#') {
            return Err(self.error(format!("unknown syntax {token}")));
        }
        if let Ok(n) = token.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        let numeric_start = token
            .trim_start_matches(['+', '-'])
            .starts_with(|c: char| c.is_ascii_digit() || c == '.');
        if numeric_start && token != "." && token != "..." {
            if let Ok(x) = token.parse::<f64>() {
                return Ok(Value::Real(x));
            }
        }
        Ok(Value::symbol(&token))
    }
}

/// Read every datum in `source`
pub fn parse(source: &str) -> Result<Vec<Value>> {
    let mut reader = Reader::new(source);
    let mut data = Vec::new();
    while let Some(datum) = reader.next_datum()? {
        data.push(datum);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(source: &str) -> Value {
        let mut data = parse(source).unwrap();
        assert_eq!(data.len(), 1, "{source}");
        data.remove(0)
    }

    #[test]
    fn test_atoms() {
        assert!(matches!(read_one("42"), Value::Int(42)));
        assert!(matches!(read_one("-7"), Value::Int(-7)));
        assert!(matches!(read_one("0.5"), Value::Real(x) if x == 0.5));
        assert!(matches!(read_one(".25"), Value::Real(x) if x == 0.25));
        assert!(matches!(read_one("#t"), Value::Bool(true)));
        assert_eq!(read_one("iox-after").as_symbol(), Some("iox-after"));
        assert_eq!(read_one("+").as_symbol(), Some("+"));
        assert_eq!(read_one("-").as_symbol(), Some("-"));
        assert_eq!(read_one("G-DISPATCHER").as_symbol(), Some("G-DISPATCHER"));
    }

    #[test]
    fn test_strings() {
        assert_eq!(read_one(r#""a\"b\nc""#).as_str(), Some("a\"b\nc"));
        assert!(parse("\"open").is_err());
    }

    #[test]
    fn test_lists_and_quotes() {
        assert_eq!(read_one("(define (f x) (* x 2))").to_string(), "(define (f x) (* x 2))");
        assert_eq!(read_one("'(1 . 2)").to_string(), "(quote (1 . 2))");
        assert_eq!(read_one("`(a ,b ,@c)").to_string(), "(quasiquote (a (unquote b) (unquote-splicing c)))");
        assert_eq!(read_one("[1 2]").to_string(), "(1 2)");
        assert_eq!(read_one("()").to_string(), "()");
    }

    #[test]
    fn test_comments_and_sequences() {
        let data = parse("; leading comment\n(define x 1) ; trailing\n x").unwrap();
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_errors_report_line() {
        let err = parse("(a\n(b").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
        assert!(parse(")").is_err());
        assert!(parse("( . a)").is_err());
        assert!(parse("(a . b c)").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let err = parse(&"(".repeat(200_000)).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "{err}");
        assert!(parse(&"'".repeat(200_000)).is_err());

        let deep = format!("{}x{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert_eq!(parse(&deep).unwrap().len(), 1);

        // Nesting is limited, length is not
        let long = format!("({})", "1 ".repeat(200_000));
        assert_eq!(read_one(&long).list_to_vec().unwrap().len(), 200_000);
    }
}
