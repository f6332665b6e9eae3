//! query::parser
//!
//! Nom parser for query predicates.
//!
//! Precedence, loosest first: `OR`, `AND`, `NOT`, comparisons and `IN`,
//! `+ -`, `* / %`, unary `+ -`.

use chrono::NaiveDateTime;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::expr::{BinaryOp, Expr, Identifier, InItem, Literal, UnaryOp};
use super::QueryError;

const KEYWORDS: &[&str] = &["and", "or", "not", "in"];

const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Parse a predicate expression.
///
/// # Examples
///
/// ```
/// use dimcat::query::{parse_expression, Identifier};
///
/// let expr = parse_expression("visit = 10 and detector > 1").unwrap();
/// assert!(expr.identifiers().contains(&Identifier::bare("detector")));
/// ```
///
/// # Errors
///
/// Returns [`QueryError::Syntax`] if `input` is not a complete expression.
pub fn parse_expression(input: &str) -> Result<Expr, QueryError> {
    match all_consuming(terminated(or_expr, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let rest = e.input.trim_start();
            let message = if rest.is_empty() {
                "unexpected end of expression".to_string()
            } else {
                let shown: String = rest.chars().take(20).collect();
                format!("unexpected input at '{}'", shown)
            };
            Err(QueryError::Syntax {
                expression: input.to_string(),
                message,
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Syntax {
            expression: input.to_string(),
            message: "incomplete expression".to_string(),
        }),
    }
}

// =============================================================================
// OPERATORS
// =============================================================================

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(keyword("or"), and_expr))(input)?;
    Ok((input, fold(first, rest, BinaryOp::Or)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(keyword("and"), not_expr))(input)?;
    Ok((input, fold(first, rest, BinaryOp::And)))
}

fn not_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(keyword("not"), not_expr), |e| unary(UnaryOp::Not, e)),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = additive(input)?;
    let (input, suffix) = opt(alt((in_suffix, compare_suffix)))(input)?;
    let expr = match suffix {
        None => left,
        Some(Suffix::Compare(op, right)) => binary(op, left, right),
        Some(Suffix::In(items, negated)) => Expr::In {
            expr: Box::new(left),
            items,
            negated,
        },
    };
    Ok((input, expr))
}

enum Suffix {
    Compare(BinaryOp, Expr),
    In(Vec<InItem>, bool),
}

fn compare_suffix(input: &str) -> IResult<&str, Suffix> {
    map(pair(compare_op, additive), |(op, right)| {
        Suffix::Compare(op, right)
    })(input)
}

fn compare_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Le, symbol("<=")),
        value(BinaryOp::Ge, symbol(">=")),
        value(BinaryOp::Ne, symbol("<>")),
        value(BinaryOp::Ne, symbol("!=")),
        value(BinaryOp::Eq, symbol("=")),
        value(BinaryOp::Lt, symbol("<")),
        value(BinaryOp::Gt, symbol(">")),
    ))(input)
}

fn in_suffix(input: &str) -> IResult<&str, Suffix> {
    map(
        tuple((
            opt(keyword("not")),
            keyword("in"),
            symbol("("),
            separated_list1(symbol(","), in_item),
            symbol(")"),
        )),
        |(negated, _, _, items, _)| Suffix::In(items, negated.is_some()),
    )(input)
}

/// `start..stop[:stride]` or any additive expression.
fn in_item(input: &str) -> IResult<&str, InItem> {
    alt((
        map(
            tuple((
                integer,
                symbol(".."),
                integer,
                opt(preceded(symbol(":"), integer)),
            )),
            |(start, _, stop, stride)| InItem::Range {
                start,
                stop,
                stride,
            },
        ),
        map(additive, InItem::Value),
    ))(input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Add, symbol("+")),
            value(BinaryOp::Sub, symbol("-")),
        )),
        term,
    ))(input)?;
    Ok((input, fold_ops(first, rest)))
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Mul, symbol("*")),
            value(BinaryOp::Div, symbol("/")),
            value(BinaryOp::Mod, symbol("%")),
        )),
        factor,
    ))(input)?;
    Ok((input, fold_ops(first, rest)))
}

fn factor(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(symbol("-"), factor), |e| unary(UnaryOp::Minus, e)),
        map(preceded(symbol("+"), factor), |e| unary(UnaryOp::Plus, e)),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(time_literal, Expr::Literal),
            map(string_literal, |s| Expr::Literal(Literal::Str(s.to_string()))),
            map(number, Expr::Literal),
            map(identifier, Expr::Identifier),
            delimited(char('('), or_expr, symbol(")")),
        )),
    )(input)
}

// =============================================================================
// TOKENS
// =============================================================================

fn symbol<'a>(s: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, tag(s))
}

/// A case-insensitive keyword not followed by an identifier character.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(
        multispace0,
        terminated(tag_no_case(word), not(satisfy(is_name_char))),
    )
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn name(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_name_char),
        )),
        |s: &str| !KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(s)),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, Identifier> {
    map(
        pair(name, opt(preceded(char('.'), name))),
        |(first, second)| match second {
            Some(column) => Identifier::qualified(first, column),
            None => Identifier::bare(first),
        },
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    delimited(char('\''), take_until("'"), char('\''))(input)
}

/// `T'2005-12-15 02:00:00'`
fn time_literal(input: &str) -> IResult<&str, Literal> {
    map_res(preceded(tag_no_case("t"), string_literal), |s: &str| {
        TIME_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
            .map(Literal::Time)
            .ok_or(())
    })(input)
}

fn number(input: &str) -> IResult<&str, Literal> {
    alt((
        map_res(recognize(tuple((digit1, char('.'), digit1))), |s: &str| {
            s.parse::<f64>().map(Literal::Float)
        }),
        map_res(digit1, |s: &str| s.parse::<i64>().map(Literal::Int)),
    ))(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    preceded(
        multispace0,
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>()
        }),
    )(input)
}

// =============================================================================
// HELPERS
// =============================================================================

fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn fold(first: Expr, rest: Vec<Expr>, op: BinaryOp) -> Expr {
    rest.into_iter().fold(first, |left, right| binary(op, left, right))
}

fn fold_ops(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |left, (op, right)| binary(op, left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn id(name: &str) -> Expr {
        Expr::Identifier(Identifier::bare(name))
    }

    fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v))
    }

    #[test]
    fn parse_comparison() {
        assert_eq!(
            parse_expression("visit = 10").unwrap(),
            binary(BinaryOp::Eq, id("visit"), int(10))
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_expression("a = 1 or b = 2 AND c = 3").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse_expression("detector + 2 * 3 > 7").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Gt,
                binary(
                    BinaryOp::Add,
                    id("detector"),
                    binary(BinaryOp::Mul, int(2), int(3))
                ),
                int(7)
            )
        );
    }

    #[test]
    fn in_list_with_ranges() {
        let expr = parse_expression("tract NOT IN (1, 5, 10..20:2)").unwrap();
        assert_eq!(
            expr,
            Expr::In {
                expr: Box::new(id("tract")),
                items: vec![
                    InItem::Value(int(1)),
                    InItem::Value(int(5)),
                    InItem::Range {
                        start: 10,
                        stop: 20,
                        stride: Some(2)
                    },
                ],
                negated: true,
            }
        );
    }

    #[test]
    fn qualified_identifiers_and_strings() {
        let expr = parse_expression("visit.seeing < 0.8 and physical_filter = 'dummy_r'").unwrap();
        let ids = expr.identifiers();
        assert!(ids.contains(&Identifier::qualified("visit", "seeing")));
        assert!(ids.contains(&Identifier::bare("physical_filter")));
    }

    #[test]
    fn time_literals() {
        let expr = parse_expression("exposure.datetime_begin >= T'2005-12-15 02:00:00'").unwrap();
        let expected = NaiveDate::from_ymd_opt(2005, 12, 15)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        let Expr::Binary { right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(*right, Expr::Literal(Literal::Time(expected)));
    }

    #[test]
    fn keywords_are_case_insensitive_but_not_prefixes() {
        assert!(parse_expression("NOT visit = 1 AnD detector = 2").is_ok());
        // `order` starts with `or` but is an identifier
        let expr = parse_expression("order = 1").unwrap();
        assert_eq!(expr, binary(BinaryOp::Eq, id("order"), int(1)));
    }

    #[test]
    fn syntax_errors() {
        for bad in ["", "visit =", "visit = = 1", "(visit = 1", "and = 1", "visit = 'open"] {
            assert!(
                matches!(parse_expression(bad), Err(QueryError::Syntax { .. })),
                "expected syntax error for {:?}",
                bad
            );
        }
    }
}
