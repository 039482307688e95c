//! The matchmaker ticket query grammar (spec §4.6): a boolean expression
//! over AND/OR/NOT with leaf predicates `key:value` (exact string match)
//! or `key:[lo TO hi]` (numeric inclusive range); quoted values permit
//! spaces. Parsed once at ticket-add time into an explicit AST (design
//! notes §9), then evaluated by a recursive walk with short-circuiting —
//! a hand-written token-cursor parser in the same small-decoder style as
//! the teacher's `valence_protocol` VarInt/packet decoders, deliberately
//! not reaching for `nom`/`pest`.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// `key:value`, exact match against a string property.
    Term(String, String),
    /// `key:[lo TO hi]`, inclusive numeric range against a numeric
    /// property.
    Range(String, f64, f64),
    /// An empty query matches everything.
    MatchAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParseError(pub String);

impl fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid matchmaker query: {}", self.0)
    }
}

impl std::error::Error for QueryParseError {}

impl Query {
    pub fn parse(input: &str) -> Result<Self, QueryParseError> {
        if input.trim().is_empty() {
            return Ok(Query::MatchAll);
        }
        let tokens = tokenize(input)?;
        let mut cursor = Cursor { tokens: &tokens, pos: 0 };
        let query = parse_or(&mut cursor)?;
        if cursor.pos != cursor.tokens.len() {
            return Err(QueryParseError(format!(
                "unexpected trailing token at position {}",
                cursor.pos
            )));
        }
        Ok(query)
    }

    /// Evaluate this query against another ticket's properties, short
    /// circuiting on And/Or.
    pub fn evaluate(
        &self,
        string_properties: &HashMap<String, String>,
        numeric_properties: &HashMap<String, f64>,
    ) -> bool {
        match self {
            Query::MatchAll => true,
            Query::And(clauses) => clauses
                .iter()
                .all(|c| c.evaluate(string_properties, numeric_properties)),
            Query::Or(clauses) => clauses
                .iter()
                .any(|c| c.evaluate(string_properties, numeric_properties)),
            Query::Not(inner) => !inner.evaluate(string_properties, numeric_properties),
            Query::Term(key, value) => string_properties.get(key).map(|v| v == value).unwrap_or(false),
            Query::Range(key, lo, hi) => numeric_properties
                .get(key)
                .map(|v| *v >= *lo && *v <= *hi)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    And,
    Or,
    Not,
    To,
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '"' {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(QueryParseError("unterminated quoted value".to_string()));
                }
                tokens.push(Token::Word(s));
            }
            _ => {
                let start = i;
                while i < chars.len() && !matches!(chars[i], ' ' | '\t' | '\n' | '\r' | '(' | ')' | '[' | ']' | ':') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "TO" => Token::To,
                    _ => Token::Word(word),
                });
            }
        }
    }

    Ok(tokens)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, t: &Token) -> Result<(), QueryParseError> {
        match self.bump() {
            Some(found) if found == t => Ok(()),
            Some(found) => Err(QueryParseError(format!("expected {t:?}, found {found:?}"))),
            None => Err(QueryParseError(format!("expected {t:?}, found end of query"))),
        }
    }
}

fn parse_or(cursor: &mut Cursor) -> Result<Query, QueryParseError> {
    let mut clauses = vec![parse_and(cursor)?];
    while matches!(cursor.peek(), Some(Token::Or)) {
        cursor.bump();
        clauses.push(parse_and(cursor)?);
    }
    Ok(if clauses.len() == 1 {
        clauses.pop().unwrap()
    } else {
        Query::Or(clauses)
    })
}

fn parse_and(cursor: &mut Cursor) -> Result<Query, QueryParseError> {
    let mut clauses = vec![parse_not(cursor)?];
    while matches!(cursor.peek(), Some(Token::And)) {
        cursor.bump();
        clauses.push(parse_not(cursor)?);
    }
    Ok(if clauses.len() == 1 {
        clauses.pop().unwrap()
    } else {
        Query::And(clauses)
    })
}

fn parse_not(cursor: &mut Cursor) -> Result<Query, QueryParseError> {
    if matches!(cursor.peek(), Some(Token::Not)) {
        cursor.bump();
        let inner = parse_term(cursor)?;
        return Ok(Query::Not(Box::new(inner)));
    }
    parse_term(cursor)
}

fn parse_term(cursor: &mut Cursor) -> Result<Query, QueryParseError> {
    match cursor.peek() {
        Some(Token::LParen) => {
            cursor.bump();
            let inner = parse_or(cursor)?;
            cursor.expect(&Token::RParen)?;
            Ok(inner)
        }
        Some(Token::Word(_)) => {
            let key = match cursor.bump() {
                Some(Token::Word(w)) => w.clone(),
                _ => unreachable!(),
            };
            cursor.expect(&Token::Colon)?;
            match cursor.peek() {
                Some(Token::LBracket) => {
                    cursor.bump();
                    let lo = parse_number(cursor)?;
                    cursor.expect(&Token::To)?;
                    let hi = parse_number(cursor)?;
                    cursor.expect(&Token::RBracket)?;
                    Ok(Query::Range(key, lo, hi))
                }
                Some(Token::Word(_)) => {
                    let value = match cursor.bump() {
                        Some(Token::Word(w)) => w.clone(),
                        _ => unreachable!(),
                    };
                    Ok(Query::Term(key, value))
                }
                other => Err(QueryParseError(format!(
                    "expected a value after '{key}:', found {other:?}"
                ))),
            }
        }
        other => Err(QueryParseError(format!("expected a term, found {other:?}"))),
    }
}

fn parse_number(cursor: &mut Cursor) -> Result<f64, QueryParseError> {
    match cursor.bump() {
        Some(Token::Word(w)) => w
            .parse::<f64>()
            .map_err(|_| QueryParseError(format!("{w:?} is not a number"))),
        other => Err(QueryParseError(format!("expected a number, found {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn nums(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_query_matches_everything() {
        let q = Query::parse("").unwrap();
        assert!(q.evaluate(&HashMap::new(), &HashMap::new()));
    }

    #[test]
    fn simple_term_matches_exact_string() {
        let q = Query::parse("mode:1v1").unwrap();
        assert!(q.evaluate(&props(&[("mode", "1v1")]), &HashMap::new()));
        assert!(!q.evaluate(&props(&[("mode", "2v2")]), &HashMap::new()));
    }

    #[test]
    fn quoted_value_permits_spaces() {
        let q = Query::parse(r#"region:"us west""#).unwrap();
        assert!(q.evaluate(&props(&[("region", "us west")]), &HashMap::new()));
    }

    #[test]
    fn range_term_matches_inclusive_numeric_bounds() {
        let q = Query::parse("rank:[1000 TO 2000]").unwrap();
        assert!(q.evaluate(&HashMap::new(), &nums(&[("rank", 1000.0)])));
        assert!(q.evaluate(&HashMap::new(), &nums(&[("rank", 2000.0)])));
        assert!(!q.evaluate(&HashMap::new(), &nums(&[("rank", 2001.0)])));
    }

    #[test]
    fn and_or_not_compose() {
        let q = Query::parse("mode:1v1 AND NOT region:eu").unwrap();
        assert!(q.evaluate(&props(&[("mode", "1v1"), ("region", "us")]), &HashMap::new()));
        assert!(!q.evaluate(&props(&[("mode", "1v1"), ("region", "eu")]), &HashMap::new()));

        let q2 = Query::parse("mode:1v1 OR mode:2v2").unwrap();
        assert!(q2.evaluate(&props(&[("mode", "2v2")]), &HashMap::new()));
    }

    #[test]
    fn parentheses_group_precedence() {
        let q = Query::parse("(mode:1v1 OR mode:2v2) AND region:us").unwrap();
        assert!(q.evaluate(
            &props(&[("mode", "2v2"), ("region", "us")]),
            &HashMap::new()
        ));
        assert!(!q.evaluate(
            &props(&[("mode", "2v2"), ("region", "eu")]),
            &HashMap::new()
        ));
    }

    #[test]
    fn malformed_query_is_rejected_at_parse_time() {
        assert!(Query::parse("mode:").is_err());
        assert!(Query::parse("mode").is_err());
        assert!(Query::parse("mode:[1 TO]").is_err());
        assert!(Query::parse("(mode:1v1").is_err());
    }
}
