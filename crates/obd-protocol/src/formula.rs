//! Parameter formula evaluation
//!
//! Formulas are arithmetic expressions over the response bytes, named `A`
//! (first data byte) through `D`, e.g. `(A*256+B)/4`. Supported syntax:
//! decimal literals, `+ - * /`, unary minus and parentheses.

use crate::error::ObdError;

/// Evaluate `formula` against the data bytes following the PID
pub fn evaluate(formula: &str, bytes: &[u8]) -> Result<f64, ObdError> {
    let mut parser = Parser {
        input: formula.as_bytes(),
        pos: 0,
        bytes,
    };
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.pos != parser.input.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    bytes: &'a [u8],
}

impl Parser<'_> {
    fn expression(&mut self) -> Result<f64, ObdError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ObdError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(self.error("division by zero"));
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, ObdError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c @ b'A'..=b'D') => {
                self.pos += 1;
                let index = (c - b'A') as usize;
                self.bytes
                    .get(index)
                    .map(|b| *b as f64)
                    .ok_or_else(|| self.error("formula references a missing byte"))
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of formula")),
        }
    }

    fn number(&mut self) -> Result<f64, ObdError> {
        let start = self.pos;
        while self.pos < self.input.len() && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == b'.') {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| self.error("invalid number"))
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> ObdError {
        ObdError::InvalidFormula(format!(
            "{} at position {} in '{}'",
            message,
            self.pos,
            String::from_utf8_lossy(self.input)
        ))
    }
}
