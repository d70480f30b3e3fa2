//! Symbolic stack-effect expressions.
//!
//! Stack effects are written as small integer expressions over a single variable,
//! `oparg`, the decoded operand of the instruction:
//!
//! - Literals: decimal (`12`) or hexadecimal (`0xff`).
//! - Binary operators, tightest first: `* / %`, `+ -`, `<< >>`, `&`, `^`, `|`,
//!   `== != < <= > >=`. All are left-associative.
//! - Conditionals: `if oparg & 1 { 2 } else { 0 }`; the condition holds when non-zero.
//! - Parentheses around any expression.
//!
//! Parsing uses chumsky combinators directly over the text. Evaluation is done on
//! `i64` so that forms such as `1 + (oparg - 1)` never underflow halfway.
use std::fmt;

use chumsky::prelude::*;

use crate::utils::Error;

type ParserError<'src> = extra::Err<Rich<'src, char>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Rem => 10,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Shl | BinOp::Shr => 8,
            BinOp::BitAnd => 7,
            BinOp::BitXor => 6,
            BinOp::BitOr => 5,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    /// Apply the operator, returning `None` on overflow, out-of-range shifts or division by zero.
    pub fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            BinOp::Mul => lhs.checked_mul(rhs),
            BinOp::Div => lhs.checked_div(rhs),
            BinOp::Rem => lhs.checked_rem(rhs),
            BinOp::Add => lhs.checked_add(rhs),
            BinOp::Sub => lhs.checked_sub(rhs),
            BinOp::Shl => {
                if !(0..63).contains(&rhs) {
                    return None;
                }
                lhs.checked_mul(1i64 << rhs)
            }
            BinOp::Shr => {
                if !(0..64).contains(&rhs) {
                    return None;
                }
                Some(lhs >> rhs)
            }
            BinOp::BitAnd => Some(lhs & rhs),
            BinOp::BitXor => Some(lhs ^ rhs),
            BinOp::BitOr => Some(lhs | rhs),
            BinOp::Eq => Some(i64::from(lhs == rhs)),
            BinOp::Ne => Some(i64::from(lhs != rhs)),
            BinOp::Lt => Some(i64::from(lhs < rhs)),
            BinOp::Le => Some(i64::from(lhs <= rhs)),
            BinOp::Gt => Some(i64::from(lhs > rhs)),
            BinOp::Ge => Some(i64::from(lhs >= rhs)),
        }
    }
}

/// An integer expression over `oparg`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Oparg,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

impl Expr {
    pub const ZERO: Expr = Expr::Const(0);
    pub const ONE: Expr = Expr::Const(1);

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn if_else(condition: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    /// Left-folded, simplified sum of `terms`. An empty sum is `0`.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .fold(Expr::ZERO, |acc, term| Expr::binary(BinOp::Add, acc, term))
            .simplify()
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    /// Whether the value depends on the operand.
    pub fn uses_oparg(&self) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Oparg => true,
            Expr::Binary { lhs, rhs, .. } => lhs.uses_oparg() || rhs.uses_oparg(),
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => condition.uses_oparg() || then_branch.uses_oparg() || else_branch.uses_oparg(),
        }
    }

    /// Replace every occurrence of `oparg` by `value` and fold the result.
    pub fn substitute_oparg(&self, value: i64) -> Self {
        fn replace(expr: &Expr, value: i64) -> Expr {
            match expr {
                Expr::Const(c) => Expr::Const(*c),
                Expr::Oparg => Expr::Const(value),
                Expr::Binary { op, lhs, rhs } => {
                    Expr::binary(*op, replace(lhs, value), replace(rhs, value))
                }
                Expr::If {
                    condition,
                    then_branch,
                    else_branch,
                } => Expr::if_else(
                    replace(condition, value),
                    replace(then_branch, value),
                    replace(else_branch, value),
                ),
            }
        }

        replace(self, value).simplify()
    }

    /// Constant-fold and drop neutral elements.
    pub fn simplify(&self) -> Self {
        match self {
            Expr::Const(_) | Expr::Oparg => self.clone(),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.simplify();
                let rhs = rhs.simplify();

                if let (Some(a), Some(b)) = (lhs.as_const(), rhs.as_const()) {
                    if let Some(folded) = op.apply(a, b) {
                        return Expr::Const(folded);
                    }
                }

                match (op, lhs.as_const(), rhs.as_const()) {
                    (BinOp::Add, Some(0), _) => rhs,
                    (BinOp::Add | BinOp::Sub, _, Some(0)) => lhs,
                    (BinOp::Mul, Some(1), _) => rhs,
                    (BinOp::Mul | BinOp::Div, _, Some(1)) => lhs,
                    (BinOp::Mul, Some(0), _) | (BinOp::Mul, _, Some(0)) => Expr::ZERO,
                    _ => Expr::binary(*op, lhs, rhs),
                }
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = condition.simplify();
                let then_branch = then_branch.simplify();
                let else_branch = else_branch.simplify();

                match condition.as_const() {
                    Some(0) => else_branch,
                    Some(_) => then_branch,
                    None if then_branch == else_branch => then_branch,
                    None => Expr::if_else(condition, then_branch, else_branch),
                }
            }
        }
    }

    /// Evaluate for a concrete operand. `None` on overflow or division by zero.
    pub fn eval(&self, oparg: u32) -> Option<i64> {
        match self {
            Expr::Const(value) => Some(*value),
            Expr::Oparg => Some(i64::from(oparg)),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(oparg)?, rhs.eval(oparg)?),
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if condition.eval(oparg)? != 0 {
                    then_branch.eval(oparg)
                } else {
                    else_branch.eval(oparg)
                }
            }
        }
    }

    /// Render as a Rust expression of type `i64`, assuming `oparg: i64` is in scope.
    ///
    /// Comparisons become `i64::from(..)` and conditions are tested against zero.
    pub fn rust(&self) -> impl fmt::Display + '_ {
        struct RustFmt<'a>(&'a Expr);

        impl fmt::Display for RustFmt<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                render(self.0, f, true)
            }
        }

        RustFmt(self)
    }
}

fn precedence_of(expr: &Expr, rust: bool) -> u8 {
    match expr {
        Expr::Const(value) if *value < 0 => 0,
        Expr::Const(_) | Expr::Oparg => u8::MAX,
        Expr::Binary { op, .. } if rust && op.is_comparison() => u8::MAX,
        Expr::Binary { op, .. } => op.precedence(),
        Expr::If { .. } => 0,
    }
}

fn render_operand(
    child: &Expr,
    parent: BinOp,
    right: bool,
    f: &mut fmt::Formatter<'_>,
    rust: bool,
) -> fmt::Result {
    let child_prec = precedence_of(child, rust);
    let parent_prec = parent.precedence();
    let wrap = child_prec < parent_prec
        || (child_prec == parent_prec && (right || parent.is_comparison()));

    if wrap {
        write!(f, "(")?;
        render(child, f, rust)?;
        write!(f, ")")
    } else {
        render(child, f, rust)
    }
}

fn render_comparison(expr: &Expr, f: &mut fmt::Formatter<'_>, rust: bool) -> fmt::Result {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            render_operand(lhs, *op, false, f, rust)?;
            write!(f, " {} ", op.symbol())?;
            render_operand(rhs, *op, true, f, rust)
        }
        _ => render(expr, f, rust),
    }
}

fn render(expr: &Expr, f: &mut fmt::Formatter<'_>, rust: bool) -> fmt::Result {
    match expr {
        Expr::Const(value) => write!(f, "{value}"),
        Expr::Oparg => write!(f, "oparg"),
        Expr::Binary { op, .. } if rust && op.is_comparison() => {
            write!(f, "i64::from(")?;
            render_comparison(expr, f, rust)?;
            write!(f, ")")
        }
        Expr::Binary { .. } => render_comparison(expr, f, rust),
        Expr::If {
            condition,
            then_branch,
            else_branch,
        } => {
            write!(f, "if ")?;
            match condition.as_ref() {
                Expr::Binary { op, .. } if rust && op.is_comparison() => {
                    render_comparison(condition, f, rust)?
                }
                _ if rust => {
                    render_operand(condition, BinOp::Ne, false, f, rust)?;
                    write!(f, " != 0")?;
                }
                _ => render(condition, f, rust)?,
            }
            write!(f, " {{ ")?;
            render(then_branch, f, rust)?;
            write!(f, " }} else {{ ")?;
            render(else_branch, f, rust)?;
            write!(f, " }}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, f, false)
    }
}

fn binop<'src>(
    symbol: &'static str,
    op: BinOp,
) -> impl Parser<'src, &'src str, BinOp, ParserError<'src>> + Clone {
    just(symbol).to(op)
}

fn left_assoc<'src, P, O>(operand: P, ops: O) -> impl Parser<'src, &'src str, Expr, ParserError<'src>> + Clone
where
    P: Parser<'src, &'src str, Expr, ParserError<'src>> + Clone,
    O: Parser<'src, &'src str, BinOp, ParserError<'src>> + Clone,
{
    operand
        .clone()
        .foldl(ops.padded().then(operand).repeated(), |lhs, (op, rhs)| {
            Expr::binary(op, lhs, rhs)
        })
}

pub fn expr_parser<'src>() -> impl Parser<'src, &'src str, Expr, ParserError<'src>> + Clone {
    recursive(|expr| {
        let hexadecimal = just("0x")
            .or(just("0X"))
            .ignore_then(text::digits(16).to_slice())
            .try_map(|digits: &str, span| {
                i64::from_str_radix(digits, 16).map_err(|_| {
                    Rich::custom(span, format!("invalid hexadecimal literal: 0x{digits}"))
                })
            })
            .labelled("hexadecimal number");

        let decimal = text::digits(10)
            .to_slice()
            .try_map(|digits: &str, span| {
                digits
                    .parse::<i64>()
                    .map_err(|_| Rich::custom(span, format!("invalid decimal literal: {digits}")))
            })
            .labelled("decimal number");

        let number = hexadecimal.or(decimal).map(Expr::Const).labelled("number");

        let block = expr
            .clone()
            .padded()
            .delimited_by(just('{'), just('}'))
            .padded()
            .labelled("block");

        let conditional = just("if")
            .then_ignore(text::whitespace().at_least(1))
            .ignore_then(expr.clone())
            .then(block.clone())
            .then_ignore(just("else"))
            .then(block)
            .map(|((condition, then_branch), else_branch)| {
                Expr::if_else(condition, then_branch, else_branch)
            })
            .labelled("if-expression");

        let variable = text::ident()
            .try_map(|ident: &str, span| {
                if ident == "oparg" {
                    Ok(Expr::Oparg)
                } else {
                    Err(Rich::custom(span, format!("unknown variable `{ident}`")))
                }
            })
            .labelled("oparg");

        let parens = expr
            .clone()
            .padded()
            .delimited_by(just('('), just(')'))
            .labelled("parentheses");

        let atom = choice((number, conditional, variable, parens))
            .padded()
            .boxed();

        let product = left_assoc(
            atom,
            choice((
                binop("*", BinOp::Mul),
                binop("/", BinOp::Div),
                binop("%", BinOp::Rem),
            )),
        )
        .boxed();
        let sum = left_assoc(
            product,
            choice((binop("+", BinOp::Add), binop("-", BinOp::Sub))),
        )
        .boxed();
        let shift = left_assoc(
            sum,
            choice((binop("<<", BinOp::Shl), binop(">>", BinOp::Shr))),
        )
        .boxed();
        let bit_and = left_assoc(shift, binop("&", BinOp::BitAnd)).boxed();
        let bit_xor = left_assoc(bit_and, binop("^", BinOp::BitXor)).boxed();
        let bit_or = left_assoc(bit_xor, binop("|", BinOp::BitOr)).boxed();

        left_assoc(
            bit_or,
            choice((
                binop("==", BinOp::Eq),
                binop("!=", BinOp::Ne),
                binop("<=", BinOp::Le),
                binop(">=", BinOp::Ge),
                binop("<", BinOp::Lt),
                binop(">", BinOp::Gt),
            )),
        )
        .labelled("expression")
    })
}

/// Parse `text` as a stack expression belonging to `owner` (used for error reporting).
pub fn parse_expr(owner: &str, text: &str) -> Result<Expr, Error> {
    let (output, errors) = expr_parser()
        .padded()
        .then_ignore(end())
        .parse(text)
        .into_output_errors();

    if let Some(error) = errors.into_iter().next() {
        let span = error.span();
        return Err(Error::InvalidExpression {
            owner: owner.to_string(),
            text: text.to_string(),
            start: span.start,
            end: span.end,
            message: error.to_string(),
        });
    }

    output.ok_or_else(|| Error::InvalidExpression {
        owner: owner.to_string(),
        text: text.to_string(),
        start: 0,
        end: text.len(),
        message: "empty expression".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Expr {
        parse_expr("test", text).expect("expression should parse")
    }

    #[test]
    fn precedence_follows_rust() {
        assert_eq!(parse("1 + 2 * 3").eval(0), Some(7));
        assert_eq!(parse("(1 + 2) * 3").eval(0), Some(9));
        assert_eq!(parse("1 << 2 + 1").eval(0), Some(8));
        assert_eq!(parse("oparg & 1 == 1").eval(3), Some(1));
        assert_eq!(parse("10 - 4 - 3").eval(0), Some(3));
    }

    #[test]
    fn operand_dependent_forms() {
        assert_eq!(parse("2 + (oparg & 1)").eval(3), Some(3));
        assert_eq!(parse("2 + (oparg & 1)").eval(4), Some(2));
        assert_eq!(parse("oparg * 2").eval(5), Some(10));
        assert_eq!(parse("1 + (oparg - 1)").eval(0), Some(0));
        assert_eq!(parse("0xff & oparg").eval(0x1234), Some(0x34));
        assert_eq!(parse("if oparg & 1 { 3 } else { 0 }").eval(1), Some(3));
        assert_eq!(parse("if oparg & 1 { 3 } else { 0 }").eval(2), Some(0));
    }

    #[test]
    fn eval_rejects_division_by_zero() {
        assert_eq!(parse("4 / oparg").eval(0), None);
        assert_eq!(parse("4 / oparg").eval(2), Some(2));
    }

    #[test]
    fn malformed_expressions_are_reported() {
        let err = parse_expr("LoadConst", "oparg +").unwrap_err();
        assert!(err.is_invalid_expression());

        let err = parse_expr("LoadConst", "count + 1").unwrap_err();
        match err {
            Error::InvalidExpression {
                owner, text, start, ..
            } => {
                assert_eq!(owner, "LoadConst");
                assert_eq!(text, "count + 1");
                assert_eq!(start, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn simplify_folds_constants_and_neutral_terms() {
        assert_eq!(parse("0 + oparg").simplify(), Expr::Oparg);
        assert_eq!(parse("(2 + 3) * 1").simplify(), Expr::Const(5));
        assert_eq!(parse("if 1 { oparg } else { 2 }").simplify(), Expr::Oparg);
        assert_eq!(
            Expr::sum([Expr::ONE, Expr::Oparg, Expr::ZERO]),
            Expr::binary(BinOp::Add, Expr::ONE, Expr::Oparg)
        );
        assert_eq!(Expr::sum([]), Expr::ZERO);
    }

    #[test]
    fn substitution_removes_the_operand() {
        let expr = parse("2 + oparg * 2");
        assert!(expr.uses_oparg());
        let folded = expr.substitute_oparg(0);
        assert!(!folded.uses_oparg());
        assert_eq!(folded, Expr::Const(2));
    }

    #[test]
    fn display_reparses_to_the_same_tree() {
        for text in [
            "2 + (oparg & 1)",
            "oparg - (1 - 2)",
            "(oparg >> 2) * 3",
            "if oparg == 2 { 1 } else { oparg }",
            "1 + (if oparg & 1 { 2 } else { 0 })",
        ] {
            let expr = parse(text);
            assert_eq!(parse(&expr.to_string()), expr, "{text}");
        }
    }

    #[test]
    fn rust_rendering_converts_booleans() {
        assert_eq!(parse("oparg == 1").rust().to_string(), "i64::from(oparg == 1)");
        assert_eq!(
            parse("if oparg & 1 { 2 } else { 0 }").rust().to_string(),
            "if oparg & 1 != 0 { 2 } else { 0 }"
        );
        assert_eq!(
            parse("1 + (if oparg > 3 { 2 } else { 0 })").rust().to_string(),
            "1 + (if oparg > 3 { 2 } else { 0 })"
        );
    }
}
