use sysadl_core::{ErrorKind, SysadlError, Value};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{tokenize, Token};

const MAX_NESTING: usize = 64;

pub fn parse_expression(source: &str) -> Result<Expr, SysadlError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(SysadlError::new(
            ErrorKind::ExpressionEvaluationError,
            "Expression is empty.",
        ));
    }

    let mut parser = Parser {
        source,
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.parse_conditional()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing token {:?}", token)));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(current)) if *current == punct) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, punct: &str) -> Result<(), SysadlError> {
        if self.eat(punct) {
            return Ok(());
        }
        Err(self.error(format!("expected '{}'", punct)))
    }

    fn error(&self, detail: impl Into<String>) -> SysadlError {
        SysadlError::new(
            ErrorKind::ExpressionEvaluationError,
            format!("Expression \"{}\" is invalid: {}", self.source, detail.into()),
        )
    }

    fn enter(&mut self) -> Result<(), SysadlError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn parse_conditional(&mut self) -> Result<Expr, SysadlError> {
        self.enter()?;
        let test = self.parse_or()?;
        let expr = if self.eat("?") {
            let then = self.parse_conditional()?;
            self.expect(":")?;
            let otherwise = self.parse_conditional()?;
            Expr::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            test
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_equality()?;
        while self.eat("&&") {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat("===") {
                BinaryOp::StrictEq
            } else if self.eat("!==") {
                BinaryOp::StrictNotEq
            } else if self.eat("==") {
                BinaryOp::Eq
            } else if self.eat("!=") {
                BinaryOp::NotEq
            } else {
                return Ok(left);
            };
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat("<=") {
                BinaryOp::LtEq
            } else if self.eat(">=") {
                BinaryOp::GtEq
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SysadlError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SysadlError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Negate
        } else if self.eat("+") {
            self.enter()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(operand);
        } else {
            return self.parse_postfix();
        };
        self.enter()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, SysadlError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let Some(Token::Ident(property)) = self.advance() else {
                    return Err(self.error("expected property name after '.'"));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.parse_conditional()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let Some(callee) = expr.dotted_name() else {
                    return Err(self.error("only named functions can be called"));
                };
                let mut args = Vec::new();
                if !self.eat(")") {
                    loop {
                        args.push(self.parse_conditional()?);
                        if self.eat(")") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                expr = Expr::Call { callee, args };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, SysadlError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Literal(Value::Number(value))),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::String(value))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Identifier(name),
            }),
            Some(Token::Punct("(")) => {
                let expr = self.parse_conditional()?;
                self.expect(")")?;
                Ok(expr)
            }
            Some(token) => Err(self.error(format!("unexpected token {:?}", token))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
