use std::collections::BTreeMap;

use sv_core::{SessionState, StateValue, StoryError};

/// Read access to named values while evaluating an expression.
pub trait Variables {
    fn lookup(&self, name: &str) -> Option<StateValue>;
}

impl Variables for SessionState {
    fn lookup(&self, name: &str) -> Option<StateValue> {
        self.variable(name).cloned()
    }
}

impl Variables for BTreeMap<String, StateValue> {
    fn lookup(&self, name: &str) -> Option<StateValue> {
        self.get(name).cloned()
    }
}

/// No variables at all; identifiers read as null.
pub struct NoVariables;

impl Variables for NoVariables {
    fn lookup(&self, _name: &str) -> Option<StateValue> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "||" => Self::Or,
            "&&" => Self::And,
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::LtEq,
            ">" => Self::Gt,
            ">=" => Self::GtEq,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            _ => return None,
        })
    }

    fn binding_power(self) -> (u8, u8) {
        match self {
            Self::Or => (1, 2),
            Self::And => (3, 4),
            Self::Eq | Self::NotEq => (5, 6),
            Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => (7, 8),
            Self::Add | Self::Sub => (9, 10),
            Self::Mul | Self::Div | Self::Rem => (11, 12),
        }
    }
}

const PREFIX_POWER: u8 = 13;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(StateValue),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Word(String),
    Op(&'static str),
    LParen,
    RParen,
}

/// Symbol spellings, longest first, mapped to the operator they mean.
const SYMBOLS: &[(&str, &str)] = &[
    ("===", "=="),
    ("!==", "!="),
    ("&&", "&&"),
    ("||", "||"),
    ("==", "=="),
    ("!=", "!="),
    ("<>", "!="),
    ("<=", "<="),
    (">=", ">="),
    ("<", "<"),
    (">", ">"),
    ("=", "=="),
    ("+", "+"),
    ("-", "-"),
    ("*", "*"),
    ("/", "/"),
    ("%", "%"),
    ("!", "!"),
];

/// Author phrases, longest first, mapped to operators.
const PHRASES: &[(&[&str], &str)] = &[
    (&["is", "greater", "than", "or", "equal", "to"], ">="),
    (&["is", "less", "than", "or", "equal", "to"], "<="),
    (&["greater", "than", "or", "equal", "to"], ">="),
    (&["less", "than", "or", "equal", "to"], "<="),
    (&["is", "not", "equal", "to"], "!="),
    (&["is", "greater", "than"], ">"),
    (&["is", "less", "than"], "<"),
    (&["is", "equal", "to"], "=="),
    (&["greater", "than"], ">"),
    (&["less", "than"], "<"),
    (&["is", "not"], "!="),
    (&["equals"], "=="),
    (&["is"], "=="),
    (&["and"], "&&"),
    (&["or"], "||"),
    (&["not"], "!"),
];

pub fn parse(source: &str) -> Result<Expr, StoryError> {
    let tokens = normalize_words(tokenize(source)?);
    if tokens.is_empty() {
        return Err(StoryError::new("EXPR_EMPTY", "Expression is empty."));
    }
    let mut parser = Parser {
        source,
        tokens,
        position: 0,
    };
    let expr = parser.expression(0)?;
    if parser.position < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

pub fn evaluate(source: &str, variables: &dyn Variables) -> Result<StateValue, StoryError> {
    parse(source)?.evaluate(variables)
}

pub fn evaluate_condition(source: &str, variables: &dyn Variables) -> Result<bool, StoryError> {
    Ok(evaluate(source, variables)?.is_truthy())
}

fn tokenize(source: &str) -> Result<Vec<Token>, StoryError> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }
        if ch == '(' {
            tokens.push(Token::LParen);
            index += 1;
            continue;
        }
        if ch == ')' {
            tokens.push(Token::RParen);
            index += 1;
            continue;
        }
        if ch == '"' || ch == '\'' {
            let (text, next) = read_string(&chars, index, source)?;
            tokens.push(Token::Str(text));
            index = next;
            continue;
        }
        if ch.is_ascii_digit() {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.') {
                index += 1;
            }
            let raw = chars[start..index].iter().collect::<String>();
            let number = raw.parse::<f64>().map_err(|_| {
                StoryError::new(
                    "EXPR_SYNTAX",
                    format!("Invalid number \"{}\" in \"{}\".", raw, source),
                )
            })?;
            tokens.push(Token::Number(number));
            continue;
        }
        if ch.is_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            tokens.push(Token::Word(chars[start..index].iter().collect()));
            continue;
        }

        let rest = chars[index..].iter().take(3).collect::<String>();
        let Some((spelling, symbol)) = SYMBOLS
            .iter()
            .find(|(spelling, _)| rest.starts_with(spelling))
        else {
            return Err(StoryError::new(
                "EXPR_SYNTAX",
                format!("Unexpected character '{}' in \"{}\".", ch, source),
            ));
        };
        tokens.push(Token::Op(*symbol));
        index += spelling.chars().count();
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize, source: &str) -> Result<(String, usize), StoryError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut index = start + 1;
    while index < chars.len() {
        match chars[index] {
            '\\' if index + 1 < chars.len() => {
                text.push(chars[index + 1]);
                index += 2;
            }
            ch if ch == quote => return Ok((text, index + 1)),
            ch => {
                text.push(ch);
                index += 1;
            }
        }
    }
    Err(StoryError::new(
        "EXPR_SYNTAX",
        format!("Unterminated string in \"{}\".", source),
    ))
}

fn normalize_words(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut index = 0usize;
    'tokens: while index < tokens.len() {
        for (phrase, symbol) in PHRASES {
            if phrase_matches(&tokens[index..], phrase) {
                out.push(Token::Op(*symbol));
                index += phrase.len();
                continue 'tokens;
            }
        }
        out.push(tokens[index].clone());
        index += 1;
    }
    out
}

fn phrase_matches(tokens: &[Token], phrase: &[&str]) -> bool {
    tokens.len() >= phrase.len()
        && phrase.iter().zip(tokens).all(|(word, token)| {
            matches!(token, Token::Word(raw) if raw.eq_ignore_ascii_case(word))
        })
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn expression(&mut self, min_power: u8) -> Result<Expr, StoryError> {
        let mut left = self.prefix()?;
        loop {
            let Some(Token::Op(symbol)) = self.tokens.get(self.position) else {
                break;
            };
            let Some(op) = BinaryOp::from_symbol(symbol) else {
                break;
            };
            let (left_power, right_power) = op.binding_power();
            if left_power < min_power {
                break;
            }
            self.position += 1;
            let right = self.expression(right_power)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, StoryError> {
        let Some(token) = self.tokens.get(self.position).cloned() else {
            return Err(self.error("expression ends too early"));
        };
        self.position += 1;
        match token {
            Token::Number(value) => Ok(Expr::Literal(StateValue::Number(value))),
            Token::Str(value) => Ok(Expr::Literal(StateValue::String(value))),
            Token::Word(word) => Ok(match word.to_ascii_lowercase().as_str() {
                "true" => Expr::Literal(StateValue::Bool(true)),
                "false" => Expr::Literal(StateValue::Bool(false)),
                "null" => Expr::Literal(StateValue::Null),
                _ => Expr::Variable(word),
            }),
            Token::Op("!") => Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(self.expression(PREFIX_POWER)?),
            }),
            Token::Op("-") => Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(self.expression(PREFIX_POWER)?),
            }),
            Token::Op("+") => self.expression(PREFIX_POWER),
            Token::LParen => {
                let inner = self.expression(0)?;
                match self.tokens.get(self.position) {
                    Some(Token::RParen) => {
                        self.position += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing ')'")),
                }
            }
            Token::Op(_) | Token::RParen => Err(self.error("unexpected operator")),
        }
    }

    fn error(&self, reason: &str) -> StoryError {
        StoryError::new(
            "EXPR_SYNTAX",
            format!("Cannot parse \"{}\": {}.", self.source, reason),
        )
    }
}

impl Expr {
    pub fn evaluate(&self, variables: &dyn Variables) -> Result<StateValue, StoryError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Variable(name) => Ok(variables.lookup(name).unwrap_or(StateValue::Null)),
            Self::Unary { op, operand } => {
                let value = operand.evaluate(variables)?;
                match op {
                    UnaryOp::Not => Ok(StateValue::Bool(!value.is_truthy())),
                    UnaryOp::Negate => Ok(StateValue::Number(-require_number(&value, "-")?)),
                }
            }
            Self::Binary { op, left, right } => match op {
                BinaryOp::And => Ok(StateValue::Bool(
                    left.evaluate(variables)?.is_truthy() && right.evaluate(variables)?.is_truthy(),
                )),
                BinaryOp::Or => Ok(StateValue::Bool(
                    left.evaluate(variables)?.is_truthy() || right.evaluate(variables)?.is_truthy(),
                )),
                _ => {
                    let left = left.evaluate(variables)?;
                    let right = right.evaluate(variables)?;
                    apply_binary(*op, &left, &right)
                }
            },
        }
    }
}

fn apply_binary(op: BinaryOp, left: &StateValue, right: &StateValue) -> Result<StateValue, StoryError> {
    let numbers = numeric(left).zip(numeric(right));
    Ok(match op {
        BinaryOp::Eq => StateValue::Bool(loose_equals(left, right)),
        BinaryOp::NotEq => StateValue::Bool(!loose_equals(left, right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match numbers {
                Some((a, b)) => a.partial_cmp(&b),
                None => Some(left.to_text().cmp(&right.to_text())),
            };
            let Some(ordering) = ordering else {
                return Ok(StateValue::Bool(false));
            };
            StateValue::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::Add => match numbers {
            Some((a, b)) => StateValue::Number(a + b),
            None => StateValue::String(format!("{}{}", left.to_text(), right.to_text())),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let symbol = match op {
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                _ => "%",
            };
            let a = require_number(left, symbol)?;
            let b = require_number(right, symbol)?;
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(StoryError::new(
                    "EXPR_DIVISION_BY_ZERO",
                    format!("Right side of '{}' is zero.", symbol),
                ));
            }
            StateValue::Number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })
        }
        BinaryOp::And | BinaryOp::Or => StateValue::Bool(left.is_truthy() && right.is_truthy()),
    })
}

/// Numbers, booleans, null and numeric strings count as numbers.
fn numeric(value: &StateValue) -> Option<f64> {
    match value {
        StateValue::Array(_) | StateValue::Map(_) => None,
        other => other.as_number(),
    }
}

fn require_number(value: &StateValue, symbol: &str) -> Result<f64, StoryError> {
    numeric(value).ok_or_else(|| {
        StoryError::new(
            "EXPR_TYPE",
            format!(
                "Operator '{}' needs a number but got {} \"{}\".",
                symbol,
                value.type_name(),
                value.to_text()
            ),
        )
    })
}

fn loose_equals(left: &StateValue, right: &StateValue) -> bool {
    match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left.to_text() == right.to_text(),
    }
}
