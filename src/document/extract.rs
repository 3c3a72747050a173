//! Function Extractor
//!
//! Turns the text of a single function literal into a [`Callable`]. Accepted shapes:
//!
//! - `[async] function [name] (a, b) { body }`
//! - `[async] (a, b) => body`
//! - `[async] a => body`
//!
//! Block bodies are kept verbatim without the enclosing braces. Concise arrow bodies are
//! wrapped as `return <expr>;`. The body is then compiled by the script engine so that a
//! callable is only ever produced for code that can run.

use crate::document::callable::Callable;
use crate::error::ExtractionError;

const RESERVED_PARAMS: &[&str] = &[
    "function", "return", "if", "else", "for", "while", "do", "let", "const", "var", "new",
    "this", "true", "false", "null", "throw", "try", "catch", "switch", "case", "break",
    "continue", "in", "of", "typeof", "delete", "class", "import", "export",
];

/// Extract a callable from function-literal source text.
pub fn extract(source: &str) -> Result<Callable, ExtractionError> {
    let literal = source.trim();
    if literal.is_empty() {
        return Err(ExtractionError::Shape("empty source".to_string()));
    }

    let mut scanner = Scanner::new(literal);
    scanner.skip_trivia()?;

    let mut is_async = false;
    if scanner.peek_word() == Some("async") {
        let checkpoint = scanner.pos;
        scanner.take_word();
        scanner.skip_trivia()?;
        if scanner.starts_with("=>") {
            // `async => ...` is an arrow whose single parameter is named `async`
            scanner.pos = checkpoint;
        } else {
            is_async = true;
        }
    }

    let (params, body) = if scanner.peek_word() == Some("function") {
        scanner.take_word();
        scanner.skip_trivia()?;
        if scanner.peek_char() == Some('*') {
            return Err(ExtractionError::Shape(
                "generator functions are not supported".to_string(),
            ));
        }
        if scanner.peek_word().is_some() {
            scanner.take_word();
            scanner.skip_trivia()?;
        }
        if scanner.peek_char() != Some('(') {
            return Err(ExtractionError::Syntax(
                "expected '(' after function keyword".to_string(),
            ));
        }
        let params = scanner.parameter_list(true)?;
        scanner.skip_trivia()?;
        if scanner.peek_char() != Some('{') {
            return Err(ExtractionError::Syntax(
                "expected '{' to open the function body".to_string(),
            ));
        }
        let body = scanner.block_body()?;
        (params, body)
    } else if scanner.peek_char() == Some('(') {
        let params = scanner.parameter_list(false)?;
        scanner.skip_trivia()?;
        if !scanner.starts_with("=>") {
            return Err(ExtractionError::Shape(
                "parenthesized expression is not a function literal".to_string(),
            ));
        }
        scanner.pos += 2;
        let body = scanner.arrow_body()?;
        (params, body)
    } else if let Some(word) = scanner.peek_word() {
        let param = word.to_string();
        scanner.take_word();
        scanner.skip_trivia()?;
        if !scanner.starts_with("=>") {
            return Err(ExtractionError::Shape(format!(
                "expression starting with '{}' is not a function literal",
                param
            )));
        }
        check_param_name(&param)?;
        scanner.pos += 2;
        let body = scanner.arrow_body()?;
        (vec![param], body)
    } else {
        return Err(ExtractionError::Shape(
            "source is not a function literal".to_string(),
        ));
    };

    let callable = Callable {
        params,
        body,
        is_async,
        source: literal.to_string(),
    };
    check_compiles(&callable)?;
    Ok(callable)
}

fn check_param_name(name: &str) -> Result<(), ExtractionError> {
    if RESERVED_PARAMS.contains(&name) {
        return Err(ExtractionError::Syntax(format!(
            "reserved word '{}' used as a parameter",
            name
        )));
    }
    Ok(())
}

fn check_compiles(callable: &Callable) -> Result<(), ExtractionError> {
    let engine = rhai::Engine::new_raw();
    engine
        .compile(callable.script_definition())
        .map(|_| ())
        .map_err(|e| ExtractionError::Syntax(e.to_string()))
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.rest().starts_with(pat)
    }

    fn peek_word(&self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if is_ident_start(c) => {}
            _ => return None,
        }
        let end = chars
            .find(|(_, c)| !is_ident_part(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    fn take_word(&mut self) {
        if let Some(word) = self.peek_word() {
            self.pos += word.len();
        }
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), ExtractionError> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if self.starts_with("//") {
                match self.rest().find('\n') {
                    Some(i) => self.pos += i + 1,
                    None => self.pos = self.src.len(),
                }
            } else if self.starts_with("/*") {
                match self.rest()[2..].find("*/") {
                    Some(i) => self.pos += i + 4,
                    None => {
                        return Err(ExtractionError::Syntax(
                            "unterminated block comment".to_string(),
                        ))
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Parse `( ident, ident, ... )`, positioned on the opening parenthesis.
    ///
    /// In a `function` header anything but identifiers is a syntax error, except valid
    /// but unsupported patterns (defaults, destructuring, rest). Before a possible arrow
    /// the parentheses may just as well hold an ordinary expression.
    fn parameter_list(&mut self, function_header: bool) -> Result<Vec<String>, ExtractionError> {
        self.pos += 1;
        let mut params: Vec<String> = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.at_end() {
                return Err(ExtractionError::Syntax(
                    "unexpected end of input in parameter list".to_string(),
                ));
            }
            if self.peek_char() == Some(')') {
                self.pos += 1;
                return Ok(params);
            }
            let Some(word) = self.peek_word() else {
                return Err(self.unexpected_in_params(function_header, false));
            };
            check_param_name(word)?;
            if params.iter().any(|p| p == word) {
                return Err(ExtractionError::Syntax(format!(
                    "duplicate parameter '{}'",
                    word
                )));
            }
            params.push(word.to_string());
            self.take_word();
            self.skip_trivia()?;
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some(')') => {}
                None => {
                    return Err(ExtractionError::Syntax(
                        "unexpected end of input in parameter list".to_string(),
                    ))
                }
                Some(_) => return Err(self.unexpected_in_params(function_header, true)),
            }
        }
    }

    fn unexpected_in_params(&self, function_header: bool, after_ident: bool) -> ExtractionError {
        let unsupported = if after_ident {
            self.peek_char() == Some('=')
        } else {
            self.starts_with("...") || matches!(self.peek_char(), Some('{') | Some('['))
        };
        if unsupported || !function_header {
            ExtractionError::Shape("unsupported parameter pattern".to_string())
        } else {
            ExtractionError::Syntax(format!(
                "unexpected '{}' in parameter list",
                self.peek_char().unwrap_or(' ')
            ))
        }
    }

    /// Positioned on `{`: returns the text between the braces and requires nothing
    /// but trivia to follow.
    fn block_body(&mut self) -> Result<String, ExtractionError> {
        let open = self.pos;
        let close = matching_close(self.src, open)?;
        let body = self.src[open + 1..close].to_string();
        self.pos = close + 1;
        self.skip_trivia()?;
        if !self.at_end() {
            return Err(ExtractionError::Shape(
                "unexpected content after the function literal".to_string(),
            ));
        }
        Ok(body)
    }

    /// Positioned just after `=>`.
    fn arrow_body(&mut self) -> Result<String, ExtractionError> {
        self.skip_trivia()?;
        if self.at_end() {
            return Err(ExtractionError::Syntax("missing arrow body".to_string()));
        }
        if self.peek_char() == Some('{') {
            return self.block_body();
        }
        let expr = self.rest().trim_end();
        check_concise_expression(expr)?;
        self.pos = self.src.len();
        Ok(format!("return {};", expr))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Find the index of the bracket closing the one at `open`, skipping strings and
/// comments.
fn matching_close(src: &str, open: usize) -> Result<usize, ExtractionError> {
    let bytes = src.as_bytes();
    let mut stack: Vec<u8> = vec![closer(bytes[open])];
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' | b'`' => {
                i = skip_string(src, i)?;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = src[i..].find('\n').map(|n| i + n + 1).unwrap_or(bytes.len());
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                match src[i + 2..].find("*/") {
                    Some(n) => i = i + 2 + n + 2,
                    None => {
                        return Err(ExtractionError::Syntax(
                            "unterminated block comment".to_string(),
                        ))
                    }
                }
                continue;
            }
            b'(' | b'[' | b'{' => stack.push(closer(b)),
            b')' | b']' | b'}' => {
                let expected = stack.pop();
                if expected != Some(b) {
                    return Err(ExtractionError::Syntax(format!(
                        "unbalanced '{}' at offset {}",
                        b as char, i
                    )));
                }
                if stack.is_empty() {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(ExtractionError::Syntax(format!(
        "unclosed '{}'",
        bytes[open] as char
    )))
}

fn closer(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

/// Skip a quoted string starting at `start`, returning the index after its closing
/// quote. Backtick strings may embed `${ ... }` interpolations.
fn skip_string(src: &str, start: usize) -> Result<usize, ExtractionError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Ok(i + 1),
            b'$' if quote == b'`' && bytes.get(i + 1) == Some(&b'{') => {
                i = matching_close(src, i + 1)? + 1;
            }
            b'\n' if quote != b'`' => {
                return Err(ExtractionError::Syntax(
                    "unterminated string literal".to_string(),
                ))
            }
            _ => i += 1,
        }
    }
    Err(ExtractionError::Syntax(
        "unterminated string literal".to_string(),
    ))
}

/// A concise arrow body must be one expression: balanced, with no top-level `;` or `,`.
fn check_concise_expression(expr: &str) -> Result<(), ExtractionError> {
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(expr, i)?;
                continue;
            }
            b'(' | b'[' | b'{' => {
                i = matching_close(expr, i)? + 1;
                continue;
            }
            b')' | b']' | b'}' => {
                return Err(ExtractionError::Syntax(format!(
                    "unbalanced '{}' in arrow body",
                    bytes[i] as char
                )))
            }
            b';' => {
                return Err(ExtractionError::Shape(
                    "arrow body contains more than one statement".to_string(),
                ))
            }
            b',' => {
                return Err(ExtractionError::Shape(
                    "sequence expression is not a function literal".to_string(),
                ))
            }
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_function_keeps_body_verbatim() {
        let callable = extract("function (job, err) {\n  let x = 1;\n  x + 1\n}").unwrap();
        assert_eq!(callable.params, vec!["job", "err"]);
        assert_eq!(callable.body, "\n  let x = 1;\n  x + 1\n");
        assert!(!callable.is_async);
    }

    #[test]
    fn async_named_function() {
        let callable = extract("async function main(job) { job.complete(1); }").unwrap();
        assert!(callable.is_async);
        assert_eq!(callable.params, vec!["job"]);
    }

    #[test]
    fn concise_arrow_is_wrapped_in_return() {
        let callable = extract("(a, b) => a + b").unwrap();
        assert_eq!(callable.body, "return a + b;");
        let single = extract("x => x * 2").unwrap();
        assert_eq!(single.params, vec!["x"]);
        let asynchronous = extract("async x => x").unwrap();
        assert!(asynchronous.is_async);
    }

    #[test]
    fn braces_inside_strings_and_comments_do_not_close_body() {
        let callable = extract("function(job) { let s = \"}\"; // }\n job.complete(s); }").unwrap();
        assert!(callable.body.contains("job.complete(s);"));
    }

    #[test]
    fn non_function_input_is_a_shape_error() {
        for src in ["42", "foo(1)", "(1 + 2)", "x", "{ a: 1 }"] {
            assert!(
                matches!(extract(src), Err(ExtractionError::Shape(_))),
                "expected shape error for {src:?}"
            );
        }
    }

    #[test]
    fn trailing_statements_are_a_shape_error() {
        assert!(matches!(
            extract("function() { 1 }; foo()"),
            Err(ExtractionError::Shape(_))
        ));
        assert!(matches!(
            extract("x => x; y"),
            Err(ExtractionError::Shape(_))
        ));
        assert!(matches!(
            extract("x => x, 5"),
            Err(ExtractionError::Shape(_))
        ));
    }

    #[test]
    fn unsupported_parameter_patterns_are_a_shape_error() {
        assert!(matches!(
            extract("({a, b}) => a"),
            Err(ExtractionError::Shape(_))
        ));
        assert!(matches!(
            extract("(a = 1) => a"),
            Err(ExtractionError::Shape(_))
        ));
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        assert!(matches!(
            extract("function(job { }"),
            Err(ExtractionError::Syntax(_))
        ));
        assert!(matches!(
            extract("function(job) { let s = \"open; }"),
            Err(ExtractionError::Syntax(_))
        ));
        assert!(matches!(
            extract("(a, a) => a"),
            Err(ExtractionError::Syntax(_))
        ));
        assert!(matches!(extract("x =>"), Err(ExtractionError::Syntax(_))));
    }

    #[test]
    fn body_that_does_not_compile_is_a_syntax_error() {
        assert!(matches!(
            extract("function(job) { let = ; }"),
            Err(ExtractionError::Syntax(_))
        ));
    }

    #[test]
    fn generators_are_rejected() {
        assert!(matches!(
            extract("function* gen() { }"),
            Err(ExtractionError::Shape(_))
        ));
    }
}
