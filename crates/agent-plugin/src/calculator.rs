//! Calculator package: the four arithmetic operations plus an expression
//! evaluator.

use agent_core::tool::{ParameterSchema, Tool, ToolArgs, ToolPackage, object_schema};
use agent_core::ToolError;
use serde_json::Value;

pub const NAME: &str = "Calculator";

pub fn package() -> ToolPackage {
    ToolPackage::new(NAME, concat!("v", env!("CARGO_PKG_VERSION")), env!("CARGO_PKG_REPOSITORY"))
        .with_description("Basic arithmetic on two numbers and free-form expressions")
        .with_tool(binary("add", "Add two numbers", |a, b| Ok(a + b)))
        .with_tool(binary("subtract", "Subtract b from a", |a, b| Ok(a - b)))
        .with_tool(binary("multiply", "Multiply two numbers", |a, b| Ok(a * b)))
        .with_tool(binary("divide", "Divide a by b", |a, b| {
            if b == 0.0 {
                return Err(ToolError::exec("division by zero"));
            }
            Ok(a / b)
        }))
        .with_tool(calculate())
}

fn binary(
    name: &'static str,
    description: &'static str,
    op: fn(f64, f64) -> Result<f64, ToolError>,
) -> Tool {
    let parameters = object_schema(&[
        ParameterSchema::required("a", "number", "First operand"),
        ParameterSchema::required("b", "number", "Second operand"),
    ]);
    Tool::from_fn(name, description, parameters, move |args| {
        let result = op(number(&args, "a")?, number(&args, "b")?)?;
        Ok(format!("{result}"))
    })
}

fn calculate() -> Tool {
    let parameters = object_schema(&[ParameterSchema::required(
        "expression",
        "string",
        "Mathematical expression to evaluate (e.g., '2 + 2', '(1 + 2) * 3', '2 ^ 8')",
    )]);
    Tool::from_fn("calculate", "Evaluate a mathematical expression", parameters, |args| {
        let expr = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ArgumentDecode("missing string argument 'expression'".into()))?;
        if expr.len() > MAX_EXPRESSION_LEN {
            return Err(ToolError::ArgumentDecode(format!(
                "expression is {} bytes, the limit is {MAX_EXPRESSION_LEN}",
                expr.len()
            )));
        }
        let result = evaluate_expression(expr).map_err(ToolError::Exec)?;
        Ok(format!("{expr} = {result}"))
    })
}

/// Numeric argument; numeric strings are accepted too
fn number(args: &ToolArgs, key: &str) -> Result<f64, ToolError> {
    let value = match args.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    value.ok_or_else(|| {
        let got = args.get(key).map_or_else(|| "nothing".to_string(), Value::to_string);
        ToolError::ArgumentDecode(format!("'{key}' must be a number, got {got}"))
    })
}

/// Longest expression `calculate` accepts, in bytes
pub const MAX_EXPRESSION_LEN: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
}

impl Op {
    fn binary(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            '^' => Some(Self::Pow),
            _ => None,
        }
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Neg => 3,
            Self::Pow => 4,
        }
    }

    const fn right_assoc(self) -> bool {
        matches!(self, Self::Pow)
    }
}

#[derive(Clone, Copy)]
enum Pending {
    Op(Op),
    Open,
}

/// Evaluate `+ - * / ^`, unary minus and parentheses
///
/// Shunting-yard over the input with explicit operand and operator stacks,
/// so nesting depth and length only cost heap. `^` is right-associative and
/// binds tighter than unary minus: `-2^2` is `-4`.
pub fn evaluate_expression(expr: &str) -> Result<f64, String> {
    let mut values: Vec<f64> = Vec::new();
    let mut ops: Vec<Pending> = Vec::new();
    let mut expect_operand = true;
    let mut chars = expr.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '0'..='9' | '.' => {
                if !expect_operand {
                    return Err(format!("unexpected number at position {i}"));
                }
                let mut end = i + 1;
                while let Some(&(j, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let literal = &expr[i..end];
                let value: f64 = literal
                    .parse()
                    .map_err(|e| format!("cannot parse '{literal}': {e}"))?;
                values.push(value);
                expect_operand = false;
            }
            '(' => {
                if !expect_operand {
                    return Err(format!("unexpected '(' at position {i}"));
                }
                ops.push(Pending::Open);
            }
            ')' => {
                if expect_operand {
                    return Err(format!("missing operand before ')' at position {i}"));
                }
                loop {
                    match ops.pop() {
                        Some(Pending::Open) => break,
                        Some(Pending::Op(op)) => apply(op, &mut values)?,
                        None => return Err("unbalanced parentheses".into()),
                    }
                }
            }
            '-' if expect_operand => ops.push(Pending::Op(Op::Neg)),
            '+' if expect_operand => {}
            _ => {
                let op = Op::binary(c).ok_or_else(|| format!("unexpected character '{c}'"))?;
                if expect_operand {
                    return Err(format!("missing operand before '{c}' at position {i}"));
                }
                while let Some(&Pending::Op(top)) = ops.last() {
                    let outranks = top.precedence() > op.precedence()
                        || (top.precedence() == op.precedence() && !op.right_assoc());
                    if !outranks {
                        break;
                    }
                    ops.pop();
                    apply(top, &mut values)?;
                }
                ops.push(Pending::Op(op));
                expect_operand = true;
            }
        }
    }

    if expect_operand {
        if values.is_empty() && ops.is_empty() {
            return Err("empty expression".into());
        }
        return Err("missing operand at end of expression".into());
    }

    while let Some(pending) = ops.pop() {
        match pending {
            Pending::Op(op) => apply(op, &mut values)?,
            Pending::Open => return Err("unbalanced parentheses".into()),
        }
    }

    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err("malformed expression".into()),
    }
}

fn apply(op: Op, values: &mut Vec<f64>) -> Result<(), String> {
    let mut operand = || values.pop().ok_or_else(|| "missing operand".to_string());
    let rhs = operand()?;
    let value = match op {
        Op::Neg => -rhs,
        Op::Add => operand()? + rhs,
        Op::Sub => operand()? - rhs,
        Op::Mul => operand()? * rhs,
        Op::Div if rhs == 0.0 => return Err("division by zero".into()),
        Op::Div => operand()? / rhs,
        Op::Pow => operand()?.powf(rhs),
    };
    values.push(value);
    Ok(())
}
