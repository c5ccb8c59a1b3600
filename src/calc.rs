//! Arithmetic on expressions pulled out of chat messages.
//!
//! Input is untrusted free text, so it is reduced to digits, `.`, `+`, `-`,
//! `*`, `/` and parentheses and then parsed by a small recursive-descent
//! parser. Nothing else is ever interpreted.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Operator words rewritten to symbols before sanitizing. Multi-word forms
/// come first so "multiplié par" is not split.
static OPERATOR_WORDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)multipli(?:é|e) par|multiplied by", "*"),
        (r"(?i)divis(?:é|e) par|divided by", "/"),
        (r"(?i)\bfois\b|\btimes\b", "*"),
        (r"(?i)plus", "+"),
        (r"(?i)moins|minus", "-"),
    ]
    .into_iter()
    .map(|(pattern, op)| (Regex::new(pattern).expect("valid regex"), op))
    .collect()
});

/// Deepest nesting of parentheses and unary signs the parser accepts.
const MAX_DEPTH: usize = 256;

static TRIGGER_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)calculate|calcul").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("empty expression")]
    Empty,
    #[error("malformed number '{0}'")]
    BadNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected '{found}' at position {pos}")]
    Unexpected { found: char, pos: usize },
    #[error("unbalanced parentheses")]
    Unbalanced,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nested too deeply")]
    TooDeep,
}

/// Remove the `calcul`/`calculate` trigger word and rewrite localized
/// operator words ("plus", "moins", "fois", "divisé par", ...) as symbols.
pub fn normalize_operator_words(text: &str) -> String {
    let mut out = TRIGGER_WORD.replace(text, "").into_owned();
    for (re, op) in OPERATOR_WORDS.iter() {
        out = re.replace_all(&out, *op).into_owned();
    }
    out.trim().to_string()
}

/// Keep only the characters the evaluator understands. Whitespace is
/// dropped, so digits separated by spaces join up ("1 2" becomes "12").
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '(' | ')' | '+' | '-' | '*' | '/'))
        .collect()
}

/// Sanitize `raw` and evaluate it with the usual precedence rules.
pub fn evaluate(raw: &str) -> Result<f64, EvalError> {
    let expr = sanitize(raw);
    if expr.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser {
        src: expr.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    match parser.peek() {
        None => {}
        Some(b')') => return Err(EvalError::Unbalanced),
        Some(c) => {
            return Err(EvalError::Unexpected {
                found: c as char,
                pos: parser.pos,
            });
        }
    }

    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}

/// Render a result the way the chat shows it: integers without a fraction.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Avoid printing "-0".
        return "0".into();
    }
    format!("{value}")
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            if op == b'+' {
                value += rhs;
            } else {
                value -= rhs;
            }
        }
        Ok(value)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == b'*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    // unary := ('+' | '-') unary | primary
    fn unary(&mut self) -> Result<f64, EvalError> {
        self.enter()?;
        let value = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        };
        self.depth -= 1;
        value
    }

    // primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                self.enter()?;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(EvalError::Unbalanced);
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(EvalError::Unexpected {
                found: c as char,
                pos: self.pos,
            }),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if text.matches('.').count() > 1 || text == "." {
            return Err(EvalError::BadNumber(text));
        }
        text.parse::<f64>().map_err(|_| EvalError::BadNumber(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(evaluate("2+3*4"), Ok(14.0));
        assert_eq!(evaluate("(2+3)*4"), Ok(20.0));
        assert_eq!(evaluate("10-4-3"), Ok(3.0));
        assert_eq!(evaluate("100/10/5"), Ok(2.0));
        assert_eq!(evaluate("-3*-(2+1)"), Ok(9.0));
        assert_eq!(evaluate("1.5*4"), Ok(6.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(evaluate("5/0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("5/(2-2)"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn malformed_expressions_are_errors() {
        assert_eq!(evaluate("(1+2"), Err(EvalError::Unbalanced));
        assert_eq!(evaluate("1+2)"), Err(EvalError::Unbalanced));
        assert_eq!(evaluate("3+"), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("*3"), Err(EvalError::Unexpected { found: '*', pos: 0 }));
        assert_eq!(evaluate("1.2.3"), Err(EvalError::BadNumber("1.2.3".into())));
        assert_eq!(evaluate("2(3)"), Err(EvalError::Unexpected { found: '(', pos: 1 }));
        assert_eq!(evaluate("abc"), Err(EvalError::Empty));
    }

    #[test]
    fn deep_nesting_is_rejected_without_overflow() {
        assert_eq!(evaluate(&"(".repeat(100_000)), Err(EvalError::TooDeep));
        assert_eq!(evaluate(&("(".repeat(100_000) + "1")), Err(EvalError::TooDeep));
        assert_eq!(evaluate(&("-".repeat(100_000) + "1")), Err(EvalError::TooDeep));
        let nested = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(evaluate(&nested), Ok(1.0));
    }

    #[test]
    fn sanitize_strips_text_and_joins_digits() {
        assert_eq!(sanitize("combien font 1 2 + 3 ?"), "12+3");
        assert_eq!(sanitize("alert('x'); 4*2"), "()4*2");
    }

    #[test]
    fn script_text_never_evaluates() {
        assert!(evaluate("process.exit(1)").is_err());
    }

    #[test]
    fn operator_words_become_symbols() {
        assert_eq!(normalize_operator_words("calcul 12 plus 8"), "12 + 8");
        assert_eq!(normalize_operator_words("7 fois 6"), "7 * 6");
        assert_eq!(normalize_operator_words("9 multiplié par 3"), "9 * 3");
        assert_eq!(normalize_operator_words("Calculate 10 divided by 4"), "10 / 4");
        assert_eq!(normalize_operator_words("20 moins 5"), "20 - 5");
        assert_eq!(evaluate(&normalize_operator_words("calcul 10 divisé par 4")), Ok(2.5));
    }

    #[test]
    fn formats_whole_numbers_without_fraction() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.0), "0");
    }
}
