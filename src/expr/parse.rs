use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rankc_tensor::{TensorType, TensorValue};

use super::{Aggregator, BinaryOp, Expr, ExprRef, ModelRef, UnaryFn};

/// Error parsing the text form of an expression.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    /// Byte offset in the input where the error was detected.
    pub pos: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at position {}: {}", self.pos, self.message)
    }
}

impl Error for ParseError {}

/// Parse an expression from its text form.
///
/// ```
/// use rankc::expr::parse;
///
/// let text = "join(reduce(x, sum, d1), constant(bias), f(a,b)(a + b))";
/// let expr = parse(text).unwrap();
/// assert_eq!(expr.to_string(), text);
/// ```
pub fn parse(src: &str) -> Result<ExprRef, ParseError> {
    let mut parser = Parser { src, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if parser.pos < src.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            pos: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseError> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", ch)))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    /// Parse a name made of ASCII alphanumerics and underscores.
    fn name(&mut self) -> Result<&'a str, ParseError> {
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if name.is_empty() {
            Err(self.error("expected a name"))
        } else {
            Ok(name)
        }
    }

    fn keyword(&mut self, word: &str) -> Result<(), ParseError> {
        let start = self.pos;
        if self.name()? == word {
            Ok(())
        } else {
            self.pos = start;
            Err(self.error(format!("expected \"{}\"", word)))
        }
    }

    fn number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        self.eat('-');
        let digits = self.take_while(|c| c.is_ascii_digit() || c == '.');
        let mut end = self.pos;
        if digits.is_empty() {
            // `inf` and `NaN` are produced when formatting non-finite values.
            let word = self.take_while(|c| c.is_ascii_alphabetic());
            if word != "inf" && word != "NaN" {
                self.pos = start;
                return Err(self.error("expected a number"));
            }
            end = self.pos;
        } else if matches!(self.rest().chars().next(), Some('e' | 'E')) {
            let exp_start = self.pos;
            self.pos += 1;
            if matches!(self.rest().chars().next(), Some('+' | '-')) {
                self.pos += 1;
            }
            let exponent = self.rest().chars().take_while(|c| c.is_ascii_digit()).count();
            if exponent == 0 {
                self.pos = exp_start;
            } else {
                self.pos += exponent;
                end = self.pos;
            }
        }
        let text = self.src[start..end].replace(char::is_whitespace, "");
        text.parse().map_err(|_| ParseError {
            pos: start,
            message: format!("invalid number \"{}\"", text),
        })
    }

    /// Parse a string in double or single quotes.
    fn string(&mut self) -> Result<&'a str, ParseError> {
        let quote = match self.peek() {
            Some(quote @ ('"' | '\'')) => quote,
            _ => return Err(self.error("expected '\"'")),
        };
        self.pos += 1;
        let rest = self.rest();
        let Some(len) = rest.find(quote) else {
            return Err(self.error("unterminated string"));
        };
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn parse_expr(&mut self) -> Result<ExprRef, ParseError> {
        self.parse_binary(1)
    }

    /// Parse infix arithmetic with operators of at least `min_prec`.
    fn parse_binary(&mut self, min_prec: u8) -> Result<ExprRef, ParseError> {
        if min_prec > 2 {
            return self.parse_primary();
        }
        let mut lhs = self.parse_binary(min_prec + 1)?;
        loop {
            let Some(op) = self.peek().and_then(BinaryOp::from_symbol) else {
                break;
            };
            if op.precedence() != min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(min_prec + 1)?;
            lhs = Expr::arithmetic(lhs, rhs, op);
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<ExprRef, ParseError> {
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '.' => {
                Ok(Expr::number(self.number()?))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_named(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    /// Parse an expression which starts with a name: a built-in function,
    /// a tensor literal, a call or a variable.
    fn parse_named(&mut self) -> Result<ExprRef, ParseError> {
        let start = self.pos;
        let name = self.name()?;
        match name {
            "tensor" if matches!(self.rest().chars().next(), Some('<' | '(')) => {
                self.pos = start;
                self.parse_literal()
            }
            "inf" | "NaN" => {
                self.pos = start;
                Ok(Expr::number(self.number()?))
            }
            "join" => {
                self.expect('(')?;
                let lhs = self.parse_expr()?;
                self.expect(',')?;
                let rhs = self.parse_expr()?;
                self.expect(',')?;
                let op = self.parse_binary_lambda()?;
                self.expect(')')?;
                Ok(Expr::join(lhs, rhs, op))
            }
            "reduce" => {
                self.expect('(')?;
                let arg = self.parse_expr()?;
                self.expect(',')?;
                let agg_pos = self.pos;
                let aggregator = Aggregator::from_name(self.name()?).ok_or_else(|| ParseError {
                    pos: agg_pos,
                    message: "unknown aggregator".into(),
                })?;
                let mut dims = Vec::new();
                while self.eat(',') {
                    dims.push(self.name()?.to_string());
                }
                self.expect(')')?;
                Ok(Arc::new(Expr::Reduce {
                    arg,
                    aggregator,
                    dims,
                }))
            }
            "rename" => {
                self.expect('(')?;
                let arg = self.parse_expr()?;
                self.expect(',')?;
                let from = self.parse_dim_list()?;
                self.expect(',')?;
                let to = self.parse_dim_list()?;
                self.expect(')')?;
                if from.len() != to.len() {
                    return Err(self.error("rename lists differ in length"));
                }
                Ok(Expr::rename(arg, from, to))
            }
            "map" => {
                self.expect('(')?;
                let arg = self.parse_expr()?;
                self.expect(',')?;
                let function = self.parse_unary_lambda()?;
                self.expect(')')?;
                Ok(Expr::map(arg, function))
            }
            "concat" => {
                self.expect('(')?;
                let lhs = self.parse_expr()?;
                self.expect(',')?;
                let rhs = self.parse_expr()?;
                self.expect(',')?;
                let dim = self.name()?;
                self.expect(')')?;
                Ok(Expr::concat(lhs, rhs, dim))
            }
            "constant" => {
                self.expect('(')?;
                let name = self.name()?;
                self.expect(')')?;
                Ok(Expr::constant(name))
            }
            "onnx_import" => {
                self.expect('(')?;
                let model = self.string()?;
                let output = if self.eat(',') {
                    Some(self.string()?)
                } else {
                    None
                };
                self.expect(')')?;
                Ok(Arc::new(Expr::ModelRef(ModelRef::new(model, output))))
            }
            _ => {
                if !self.eat('(') {
                    return Ok(Expr::variable(name));
                }
                let mut args = Vec::new();
                if !self.eat(')') {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                Ok(Arc::new(Expr::Call {
                    name: name.to_string(),
                    args,
                }))
            }
        }
    }

    /// Parse `tensor<T>(dims)(value)` or `tensor<T>(dims):[v, v, ...]`.
    fn parse_literal(&mut self) -> Result<ExprRef, ParseError> {
        let start = self.pos;
        let (ty, len) = TensorType::parse_prefix(self.rest()).map_err(|err| ParseError {
            pos: start,
            message: err.to_string(),
        })?;
        self.pos += len;

        let value = if self.eat(':') {
            self.expect('[')?;
            let mut values = Vec::new();
            if !self.eat(']') {
                loop {
                    values.push(self.number()?);
                    if self.eat(']') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            TensorValue::from_data(ty, values)
        } else {
            self.expect('(')?;
            let value = self.number()?;
            self.expect(')')?;
            TensorValue::filled(ty, value)
        };

        value.map(Expr::literal).map_err(|err| ParseError {
            pos: start,
            message: err.to_string(),
        })
    }

    /// Parse `d0` or `(d0, d1, ...)`.
    fn parse_dim_list(&mut self) -> Result<Vec<String>, ParseError> {
        if !self.eat('(') {
            return Ok(vec![self.name()?.to_string()]);
        }
        let mut dims = vec![self.name()?.to_string()];
        while self.eat(',') {
            dims.push(self.name()?.to_string());
        }
        self.expect(')')?;
        Ok(dims)
    }

    /// Parse `f(a,b)(a OP b)`.
    fn parse_binary_lambda(&mut self) -> Result<BinaryOp, ParseError> {
        self.keyword("f")?;
        self.expect('(')?;
        let a = self.name()?;
        self.expect(',')?;
        let b = self.name()?;
        self.expect(')')?;
        self.expect('(')?;
        self.keyword(a)?;
        let op_pos = self.pos;
        let op = self
            .peek()
            .and_then(BinaryOp::from_symbol)
            .ok_or_else(|| self.error("expected an operator"))?;
        self.pos += 1;
        self.keyword(b).map_err(|err| ParseError {
            pos: op_pos,
            message: err.message,
        })?;
        self.expect(')')?;
        Ok(op)
    }

    /// Parse `f(a)(fn(a))`.
    fn parse_unary_lambda(&mut self) -> Result<UnaryFn, ParseError> {
        self.keyword("f")?;
        self.expect('(')?;
        let param = self.name()?;
        self.expect(')')?;
        self.expect('(')?;
        let fn_pos = self.pos;
        let function = UnaryFn::from_name(self.name()?).ok_or_else(|| ParseError {
            pos: fn_pos,
            message: "unknown function".into(),
        })?;
        self.expect('(')?;
        self.keyword(param)?;
        self.expect(')')?;
        self.expect(')')?;
        Ok(function)
    }
}
