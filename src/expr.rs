//! Infix arithmetic expression evaluation for `#expr` and `#ifexpr`.
//!
//! A shunting-yard evaluator over two fixed-capacity stacks. Errors never
//! panic and never abort expansion; callers render them inline in the
//! expanded output, matching the behavior wiki authors rely on.

use arrayvec::ArrayVec;
use std::{borrow::Cow, f64::consts::PI};

/// Maximum allowed number of in-flight operators or operands.
const MAX_STACK: usize = 100;

/// An expression evaluation error.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The expression nests deeper than the evaluator allows.
    #[error("expression stack exhausted")]
    StackExhausted,
    /// An unrecognized word or character.
    #[error("unrecognized word \"{0}\"")]
    UnknownWord(String),
    /// A number appeared where an operator was expected.
    #[error("unexpected number")]
    UnexpectedNumber,
    /// An operator appeared where an operand was expected.
    #[error("unexpected {0} operator")]
    UnexpectedOperator(&'static str),
    /// A closing bracket with no matching opening bracket.
    #[error("unexpected closing bracket")]
    UnexpectedCloseBracket,
    /// An opening bracket that was never closed.
    #[error("unclosed bracket")]
    UnclosedBracket,
    /// An operator was missing one of its operands.
    #[error("missing operand for {0}")]
    MissingOperand(&'static str),
    /// Division or modulo by zero.
    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),
    /// A domain error in a unary function.
    #[error("invalid argument for {0}: out of range")]
    InvalidArgument(&'static str),
    /// A number that failed to parse.
    #[error("malformed number \"{0}\"")]
    BadNumber(String),
}

/// Operators and functions, in rough source order of the vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    Open,
    Or,
    And,
    Eq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Round,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    SciE,
    Neg,
    Pos,
    Not,
    Ceil,
    Floor,
    Trunc,
    Abs,
    Sqrt,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
}

impl Op {
    /// The precedence tier; higher binds tighter.
    const fn precedence(self) -> i8 {
        match self {
            Op::Open => -1,
            Op::Or => 2,
            Op::And => 3,
            Op::Eq | Op::NotEq | Op::Less | Op::Greater | Op::LessEq | Op::GreaterEq => 4,
            Op::Round => 5,
            Op::Add | Op::Sub => 6,
            Op::Mul | Op::Div | Op::Mod => 7,
            Op::Pow => 8,
            Op::Not
            | Op::Ceil
            | Op::Floor
            | Op::Trunc
            | Op::Abs
            | Op::Sqrt
            | Op::Exp
            | Op::Ln
            | Op::Sin
            | Op::Cos
            | Op::Tan
            | Op::Asin
            | Op::Acos
            | Op::Atan => 9,
            Op::Neg | Op::Pos | Op::SciE => 10,
        }
    }

    /// The source spelling, used in error messages.
    const fn name(self) -> &'static str {
        match self {
            Op::Open => "(",
            Op::Or => "or",
            Op::And => "and",
            Op::Eq => "=",
            Op::NotEq => "<>",
            Op::Less => "<",
            Op::Greater => ">",
            Op::LessEq => "<=",
            Op::GreaterEq => ">=",
            Op::Round => "round",
            Op::Add | Op::Pos => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "mod",
            Op::Pow => "^",
            Op::SciE => "e",
            Op::Not => "not",
            Op::Ceil => "ceil",
            Op::Floor => "floor",
            Op::Trunc => "trunc",
            Op::Abs => "abs",
            Op::Sqrt => "sqrt",
            Op::Exp => "exp",
            Op::Ln => "ln",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Tan => "tan",
            Op::Asin => "asin",
            Op::Acos => "acos",
            Op::Atan => "atan",
        }
    }

    /// Returns true for operators that take a single operand.
    const fn is_unary(self) -> bool {
        matches!(
            self,
            Op::Neg
                | Op::Pos
                | Op::Not
                | Op::Ceil
                | Op::Floor
                | Op::Trunc
                | Op::Abs
                | Op::Sqrt
                | Op::Exp
                | Op::Ln
                | Op::Sin
                | Op::Cos
                | Op::Tan
                | Op::Asin
                | Op::Acos
                | Op::Atan
        )
    }

    /// Looks up a word operator, returning `None` for unknown words.
    fn from_word(word: &str) -> Option<Op> {
        Some(match word {
            "or" => Op::Or,
            "and" => Op::And,
            "not" => Op::Not,
            "round" => Op::Round,
            "mod" => Op::Mod,
            "div" => Op::Div,
            "e" => Op::SciE,
            "ceil" => Op::Ceil,
            "floor" => Op::Floor,
            "trunc" => Op::Trunc,
            "abs" => Op::Abs,
            "sqrt" => Op::Sqrt,
            "exp" => Op::Exp,
            "ln" => Op::Ln,
            "sin" => Op::Sin,
            "cos" => Op::Cos,
            "tan" => Op::Tan,
            "asin" => Op::Asin,
            "acos" => Op::Acos,
            "atan" => Op::Atan,
            _ => return None,
        })
    }

    /// Pops this operator's operands and pushes its result.
    fn apply(self, operands: &mut ArrayVec<f64, MAX_STACK>) -> Result<(), ExprError> {
        let missing = || ExprError::MissingOperand(self.name());

        if self.is_unary() {
            let x = operands.pop().ok_or_else(missing)?;
            let value = match self {
                Op::Neg => -x,
                Op::Pos => x,
                Op::Not => f64::from(x == 0.0),
                Op::Ceil => x.ceil(),
                Op::Floor => x.floor(),
                Op::Trunc => x.trunc(),
                Op::Abs => x.abs(),
                Op::Sqrt => {
                    if x < 0.0 {
                        return Err(ExprError::InvalidArgument(self.name()));
                    }
                    x.sqrt()
                }
                Op::Exp => x.exp(),
                Op::Ln => {
                    if x <= 0.0 {
                        return Err(ExprError::InvalidArgument(self.name()));
                    }
                    x.ln()
                }
                Op::Sin => x.sin(),
                Op::Cos => x.cos(),
                Op::Tan => x.tan(),
                Op::Asin | Op::Acos => {
                    if !(-1.0..=1.0).contains(&x) {
                        return Err(ExprError::InvalidArgument(self.name()));
                    }
                    if self == Op::Asin { x.asin() } else { x.acos() }
                }
                Op::Atan => x.atan(),
                _ => unreachable!(),
            };
            operands.push(value);
            return Ok(());
        }

        let rhs = operands.pop().ok_or_else(missing)?;
        let lhs = operands.pop().ok_or_else(missing)?;
        let value = match self {
            Op::Or => f64::from(lhs != 0.0 || rhs != 0.0),
            Op::And => f64::from(lhs != 0.0 && rhs != 0.0),
            Op::Eq => f64::from(lhs == rhs),
            Op::NotEq => f64::from(lhs != rhs),
            Op::Less => f64::from(lhs < rhs),
            Op::Greater => f64::from(lhs > rhs),
            Op::LessEq => f64::from(lhs <= rhs),
            Op::GreaterEq => f64::from(lhs >= rhs),
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => {
                if rhs == 0.0 {
                    return Err(ExprError::DivisionByZero(self.name()));
                }
                lhs / rhs
            }
            Op::Mod => {
                if rhs == 0.0 {
                    return Err(ExprError::DivisionByZero(self.name()));
                }
                ((lhs as i64) % (rhs as i64)) as f64
            }
            Op::Pow => lhs.powf(rhs),
            Op::SciE => lhs * 10.0_f64.powf(rhs),
            Op::Round => {
                // Rounding to an absurd precision keeps the value intact
                // instead of overflowing to infinity.
                match 10_i64.checked_pow(rhs.abs().min(18.0) as u32) {
                    Some(scale) if rhs >= 0.0 => {
                        let scale = scale as f64;
                        (lhs * scale).round() / scale
                    }
                    Some(scale) => {
                        let scale = scale as f64;
                        (lhs / scale).round() * scale
                    }
                    None => lhs,
                }
            }
            _ => unreachable!(),
        };
        operands.push(value);
        Ok(())
    }
}

/// What the evaluator expects next.
#[derive(Eq, PartialEq)]
enum Expect {
    Operand,
    Operator,
}

/// Evaluates an arithmetic expression, returning `None` for empty input.
pub fn evaluate(expr: &str) -> Result<Option<f64>, ExprError> {
    let mut operands = ArrayVec::<f64, MAX_STACK>::new_const();
    let mut operators = ArrayVec::<Op, MAX_STACK>::new_const();
    let mut expect = Expect::Operand;

    // Wiki text routinely writes operators as entities or typographic
    // minus signs.
    let expr: Cow<'_, str> = if expr.contains(['&', '\u{2212}']) {
        expr.replace("&minus;", "-")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace('\u{2212}', "-")
            .into()
    } else {
        expr.into()
    };

    let mut push_op = |op: Op,
                       operands: &mut ArrayVec<f64, MAX_STACK>,
                       operators: &mut ArrayVec<Op, MAX_STACK>|
     -> Result<(), ExprError> {
        while let Some(top) = operators.last().copied()
            && op.precedence() <= top.precedence()
        {
            top.apply(operands)?;
            operators.pop();
        }
        operators.try_push(op).map_err(|_| ExprError::StackExhausted)
    };

    let mut chars = expr.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        if operands.is_full() || operators.is_full() {
            return Err(ExprError::StackExhausted);
        }

        if c.is_ascii_whitespace() {
            continue;
        }

        // Numbers; MediaWiki reads "1.2.3" as 1.2, so everything beyond a
        // second separator is dropped from the number.
        if c.is_ascii_digit() || c == '.' {
            let mut end = pos + 1;
            let mut separators = usize::from(c == '.');
            while let Some((next, nc)) = chars.peek().copied() {
                if !nc.is_ascii_digit() && nc != '.' {
                    break;
                }
                if nc == '.' {
                    separators += 1;
                }
                chars.next();
                if separators < 2 {
                    end = next + 1;
                }
            }
            let number = expr[pos..end]
                .parse::<f64>()
                .map_err(|_| ExprError::BadNumber(expr[pos..end].to_string()))?;
            if expect != Expect::Operand {
                return Err(ExprError::UnexpectedNumber);
            }
            operands.push(number);
            expect = Expect::Operator;
            continue;
        }

        // Words: functions, word operators, and the constants pi and e.
        if c.is_ascii_alphabetic() {
            let mut end = pos + c.len_utf8();
            while let Some((next, nc)) = chars.peek().copied() {
                if !nc.is_alphabetic() {
                    break;
                }
                chars.next();
                end = next + nc.len_utf8();
            }
            let word = expr[pos..end].to_ascii_lowercase();

            if word == "pi" {
                if expect != Expect::Operand {
                    return Err(ExprError::UnexpectedNumber);
                }
                operands.push(PI);
                expect = Expect::Operator;
                continue;
            }

            let op = Op::from_word(&word).ok_or(ExprError::UnknownWord(word))?;

            // "e" is Euler's number as an operand and scientific notation
            // as an operator.
            if op == Op::SciE && expect == Expect::Operand {
                operands.push(core::f64::consts::E);
                expect = Expect::Operator;
                continue;
            }

            if op.is_unary() && op != Op::Neg && op != Op::Pos {
                if expect != Expect::Operand {
                    return Err(ExprError::UnexpectedOperator(op.name()));
                }
                operators
                    .try_push(op)
                    .map_err(|_| ExprError::StackExhausted)?;
                continue;
            }

            if expect != Expect::Operator {
                return Err(ExprError::UnexpectedOperator(op.name()));
            }
            push_op(op, &mut operands, &mut operators)?;
            expect = Expect::Operand;
            continue;
        }

        // Punctuation operators and brackets.
        let op = match c {
            '+' if expect == Expect::Operand => {
                operators
                    .try_push(Op::Pos)
                    .map_err(|_| ExprError::StackExhausted)?;
                continue;
            }
            '-' if expect == Expect::Operand => {
                operators
                    .try_push(Op::Neg)
                    .map_err(|_| ExprError::StackExhausted)?;
                continue;
            }
            '+' => Op::Add,
            '-' => Op::Sub,
            '*' => Op::Mul,
            '/' => Op::Div,
            '^' => Op::Pow,
            '=' => Op::Eq,
            '(' => {
                if expect == Expect::Operator {
                    return Err(ExprError::UnexpectedOperator("("));
                }
                operators
                    .try_push(Op::Open)
                    .map_err(|_| ExprError::StackExhausted)?;
                continue;
            }
            ')' => {
                loop {
                    match operators.pop() {
                        Some(Op::Open) => break,
                        Some(op) => op.apply(&mut operands)?,
                        None => return Err(ExprError::UnexpectedCloseBracket),
                    }
                }
                expect = Expect::Operator;
                continue;
            }
            '<' => match chars.peek().map(|(_, c)| *c) {
                Some('=') => {
                    chars.next();
                    Op::LessEq
                }
                Some('>') => {
                    chars.next();
                    Op::NotEq
                }
                _ => Op::Less,
            },
            '>' => {
                if chars.next_if(|(_, c)| *c == '=').is_some() {
                    Op::GreaterEq
                } else {
                    Op::Greater
                }
            }
            '!' if matches!(chars.peek(), Some((_, '='))) => {
                chars.next();
                Op::NotEq
            }
            _ => return Err(ExprError::UnknownWord(c.to_string())),
        };

        if expect != Expect::Operator {
            return Err(ExprError::UnexpectedOperator(op.name()));
        }
        push_op(op, &mut operands, &mut operators)?;
        expect = Expect::Operand;
    }

    while let Some(op) = operators.pop() {
        if op == Op::Open {
            return Err(ExprError::UnclosedBracket);
        }
        op.apply(&mut operands)?;
    }

    debug_assert!(operands.len() < 2, "unconsumed operands");
    Ok(operands.pop())
}

/// Formats an expression result the way `#expr` prints it: whole values
/// print without a decimal point.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        // Avoid "-0".
        "0".to_string()
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> f64 {
        evaluate(expr).unwrap().unwrap()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 1"), 2.0);
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2^10"), 1024.0);
        assert_eq!(eval("2 ^ 3 ^ 1"), 8.0);
        assert_eq!(eval("7 mod 3"), 1.0);
        assert_eq!(eval("10 div 4"), 2.5);
        assert_eq!(eval("-3 + 1"), -2.0);
        assert_eq!(eval("+4"), 4.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("4 < 5"), 1.0);
        assert_eq!(eval("1 <> 2"), 1.0);
        assert_eq!(eval("1 != 2"), 1.0);
        assert_eq!(eval("2 >= 2"), 1.0);
        assert_eq!(eval("1 or 0"), 1.0);
        assert_eq!(eval("1 and 0"), 0.0);
        assert_eq!(eval("not 0"), 1.0);
        assert_eq!(eval("not (1 and 0)"), 1.0);
        assert_eq!(eval("-4 * -4 = 4 * 4"), 1.0);
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(eval("abs(-2)"), 2.0);
        assert_eq!(eval("ceil 4.2"), 5.0);
        assert_eq!(eval("floor -4.5"), -5.0);
        assert_eq!(eval("trunc(-4.5)"), -4.0);
        assert_eq!(eval("sqrt(4)"), 2.0);
        assert_eq!(eval("ln(exp(1))"), 1.0);
        assert_eq!(eval("sin(0)"), 0.0);
        assert_eq!(eval("acos(1)"), 0.0);
        assert!((eval("pi") - PI).abs() < 1e-12);
    }

    #[test]
    fn scientific_notation_operator() {
        assert_eq!(eval("2e3"), 2000.0);
        assert_eq!(eval("1e-2"), 0.01);
        assert_eq!(eval("((-1) * 1e10)"), -10_000_000_000.0);
        // As an operand, e is Euler's number.
        assert!((eval("e") - core::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn rounding() {
        assert_eq!(eval("4.5 round 0"), 5.0);
        assert_eq!(eval("-4.5 round 0"), -5.0);
        assert_eq!(eval("3.14159 round 2"), 3.14);
        assert_eq!(eval("10 round 100"), 10.0);
    }

    #[test]
    fn number_quirks() {
        assert_eq!(eval("1.2.3.4.5"), 1.2);
        assert_eq!(eval("1.9.2 > 1.10.9"), 1.0);
        assert_eq!(evaluate(""), Ok(None));
        assert_eq!(evaluate("   "), Ok(None));
    }

    #[test]
    fn entity_operators() {
        assert_eq!(eval("3 &lt; 4"), 1.0);
        assert_eq!(eval("5 &minus; 2"), 3.0);
        assert_eq!(eval("5 \u{2212} 2"), 3.0);
    }

    #[test]
    fn errors() {
        assert_eq!(evaluate("1/0"), Err(ExprError::DivisionByZero("/")));
        assert_eq!(evaluate("1 mod 0"), Err(ExprError::DivisionByZero("mod")));
        assert_eq!(
            evaluate("foo"),
            Err(ExprError::UnknownWord("foo".to_string()))
        );
        assert_eq!(evaluate("1 2"), Err(ExprError::UnexpectedNumber));
        assert_eq!(evaluate("(1"), Err(ExprError::UnclosedBracket));
        assert_eq!(evaluate("1 + 1)"), Err(ExprError::UnexpectedCloseBracket));
        assert_eq!(evaluate("1*"), Err(ExprError::MissingOperand("*")));
        assert_eq!(evaluate("-"), Err(ExprError::MissingOperand("-")));
        assert_eq!(evaluate("sqrt(-1)"), Err(ExprError::InvalidArgument("sqrt")));
        assert_eq!(evaluate("ln(-1)"), Err(ExprError::InvalidArgument("ln")));
        assert_eq!(evaluate("asin(3)"), Err(ExprError::InvalidArgument("asin")));
        assert_eq!(evaluate("1 not"), Err(ExprError::UnexpectedOperator("not")));
    }

    #[test]
    fn whole_floats_print_bare() {
        assert_eq!(format_value(1024.0), "1024");
        assert_eq!(format_value(4.0), "4");
        assert_eq!(format_value(2.5), "2.5");
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(0.01), "0.01");
    }
}
