//! Recursive descent parser for condition expressions
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparison.

use super::ast::{Check, CompareOp, Expression, Operand};
use crate::resolver::{has_placeholders, Reference};
use crate::{ExpressionError, Value};

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::new("empty expression", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(ExpressionError::new(
            format!("unexpected {}", token.kind.describe()),
            token.offset,
        ));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Placeholder(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    Is,
    Empty,
    Null,
    True,
    False,
    LParen,
    RParen,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier '{}'", s),
            TokenKind::Placeholder(s) => format!("placeholder '{}'", s),
            TokenKind::Str(s) => format!("string '{}'", s),
            TokenKind::Num(n) => format!("number {}", n),
            TokenKind::Op(op) => format!("operator '{}'", op),
            TokenKind::And => "'and'".to_string(),
            TokenKind::Or => "'or'".to_string(),
            TokenKind::Not => "'not'".to_string(),
            TokenKind::Is => "'is'".to_string(),
            TokenKind::Empty => "'empty'".to_string(),
            TokenKind::Null => "'null'".to_string(),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        let push = |tokens: &mut Vec<Token>, kind| tokens.push(Token { kind, offset });

        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                push(&mut tokens, TokenKind::LParen);
                i += 1;
            }
            ')' => {
                push(&mut tokens, TokenKind::RParen);
                i += 1;
            }
            '{' if next == Some('{') => {
                let close = input[offset..]
                    .find("}}")
                    .ok_or_else(|| ExpressionError::new("unterminated placeholder", offset))?;
                let end = offset + close + 2;
                push(&mut tokens, TokenKind::Placeholder(input[offset..end].to_string()));
                while i < chars.len() && chars[i].0 < end {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let ch = chars[j].1;
                    if ch == '\\' && j + 1 < chars.len() {
                        text.push(chars[j + 1].1);
                        j += 2;
                        continue;
                    }
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    text.push(ch);
                    j += 1;
                }
                if !closed {
                    return Err(ExpressionError::new("unterminated string", offset));
                }
                push(&mut tokens, TokenKind::Str(text));
                i = j + 1;
            }
            '=' | '!' | '<' | '>' => {
                let two = next == Some('=');
                let kind = match (c, two) {
                    ('=', true) | ('=', false) => TokenKind::Op(CompareOp::Eq),
                    ('!', true) => TokenKind::Op(CompareOp::NotEq),
                    ('!', false) => TokenKind::Not,
                    ('<', true) => TokenKind::Op(CompareOp::Lte),
                    ('<', false) => TokenKind::Op(CompareOp::Lt),
                    ('>', true) => TokenKind::Op(CompareOp::Gte),
                    _ => TokenKind::Op(CompareOp::Gt),
                };
                push(&mut tokens, kind);
                i += if two { 2 } else { 1 };
            }
            '≠' | '≥' | '≤' => {
                let op = match c {
                    '≠' => CompareOp::NotEq,
                    '≥' => CompareOp::Gte,
                    _ => CompareOp::Lte,
                };
                push(&mut tokens, TokenKind::Op(op));
                i += 1;
            }
            '&' | '|' if next == Some(c) => {
                push(&mut tokens, if c == '&' { TokenKind::And } else { TokenKind::Or });
                i += 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(input.len());
                let number = input[offset..end]
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::new("invalid number", offset))?;
                push(&mut tokens, TokenKind::Num(number));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' || c == '#' => {
                let mut j = i + 1;
                while j < chars.len() {
                    let ch = chars[j].1;
                    if ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.' | '#') {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(input.len());
                let word = &input[offset..end];
                let kind = match word {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "is" => TokenKind::Is,
                    "empty" => TokenKind::Empty,
                    "null" => TokenKind::Null,
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "contains" => TokenKind::Op(CompareOp::Contains),
                    "starts_with" => TokenKind::Op(CompareOp::StartsWith),
                    "ends_with" => TokenKind::Op(CompareOp::EndsWith),
                    _ => TokenKind::Ident(word.trim_matches('#').to_string()),
                };
                push(&mut tokens, kind);
                i = j;
            }
            other => {
                return Err(ExpressionError::new(
                    format!("unexpected character '{}'", other),
                    offset,
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_kind_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(ExpressionError::new(
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
                token.offset,
            )),
            None => Err(ExpressionError::new(
                format!("expected {}", kind.describe()),
                self.end,
            )),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = left.or(right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek_kind() == Some(&TokenKind::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.advance();
            return Ok(self.parse_unary()?.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        if self.peek_kind() == Some(&TokenKind::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }

        let left = self.parse_operand()?;

        match self.peek_kind() {
            Some(TokenKind::Op(op)) => {
                let op = *op;
                self.advance();
                let right = self.parse_operand()?;
                Ok(Expression::Compare { left, op, right })
            }
            Some(TokenKind::Not)
                if self.peek_kind_at(1) == Some(&TokenKind::Op(CompareOp::Contains)) =>
            {
                self.pos += 2;
                let right = self.parse_operand()?;
                Ok(Expression::Compare {
                    left,
                    op: CompareOp::NotContains,
                    right,
                })
            }
            Some(TokenKind::Is) => {
                self.advance();
                let negated = self.peek_kind() == Some(&TokenKind::Not);
                if negated {
                    self.advance();
                }
                let offset = self.offset();
                let check = match (self.advance().map(|t| t.kind), negated) {
                    (Some(TokenKind::Empty), false) => Check::Empty,
                    (Some(TokenKind::Empty), true) => Check::NotEmpty,
                    (Some(TokenKind::Null), false) => Check::Null,
                    (Some(TokenKind::Null), true) => Check::NotNull,
                    _ => return Err(ExpressionError::new("expected 'empty' or 'null'", offset)),
                };
                Ok(Expression::Check {
                    operand: left,
                    check,
                })
            }
            _ => Ok(match left {
                Operand::Literal(Value::Bool(b)) => Expression::Literal(b),
                other => Expression::Truthy(other),
            }),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        let offset = self.offset();
        let token = self
            .advance()
            .ok_or_else(|| ExpressionError::new("unexpected end of expression", offset))?;
        let operand = match token.kind {
            TokenKind::Ident(name) | TokenKind::Placeholder(name) => Operand::Reference(
                Reference::parse(&name).map_err(|e| ExpressionError::new(e.to_string(), offset))?,
            ),
            TokenKind::Str(text) if has_placeholders(&text) => Operand::Template(text),
            TokenKind::Str(text) => Operand::Literal(Value::String(text)),
            TokenKind::Num(n) => Operand::Literal(Value::Number(n)),
            TokenKind::True => Operand::Literal(Value::Bool(true)),
            TokenKind::False => Operand::Literal(Value::Bool(false)),
            TokenKind::Null => Operand::Literal(Value::Null),
            other => {
                return Err(ExpressionError::new(
                    format!("expected operand, found {}", other.describe()),
                    offset,
                ))
            }
        };
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(name: &str) -> Operand {
        Operand::Reference(Reference::Bound {
            name: name.into(),
            path: vec![],
        })
    }

    #[test]
    fn test_parse_simple_comparison() {
        assert_eq!(
            parse("count < 3").unwrap(),
            Expression::Compare {
                left: bound("count"),
                op: CompareOp::Lt,
                right: Operand::Literal(Value::Number(3.0)),
            }
        );
    }

    #[test]
    fn test_parse_placeholder_operand() {
        let expr = parse("{{#classify.intent#}} == 'search'").unwrap();
        match expr {
            Expression::Compare { left, op, .. } => {
                assert_eq!(op, CompareOp::Eq);
                assert_eq!(
                    left,
                    Operand::Reference(Reference::Output {
                        vertex: "classify".into(),
                        field: "intent".into(),
                        path: vec![]
                    })
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("a == 1 or b == 2 and not c").unwrap();
        assert!(matches!(expr, Expression::Or(_, ref right) if matches!(**right, Expression::And(_, _))));
    }

    #[test]
    fn test_parse_checks_and_keywords() {
        assert!(matches!(
            parse("llm.text is not empty").unwrap(),
            Expression::Check { check: Check::NotEmpty, .. }
        ));
        assert!(matches!(
            parse("tags not contains 'x'").unwrap(),
            Expression::Compare { op: CompareOp::NotContains, .. }
        ));
        assert_eq!(parse("true").unwrap(), Expression::Literal(true));
        assert_eq!(parse("(false)").unwrap(), Expression::Literal(false));
    }

    #[test]
    fn test_parse_errors_carry_offsets() {
        let err = parse("count < ").unwrap_err();
        assert_eq!(err.offset, 8);
        let err = parse("a == 'open").unwrap_err();
        assert_eq!(err.offset, 5);
        assert!(parse("(a == 1").is_err());
        assert!(parse("").is_err());
    }
}
