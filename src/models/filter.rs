// Resource filter: a restricted conjunction of equality / IN predicates.
//   cell_type = 'NR' AND region IN ('north', 'south') AND band = 78
// Columns become quoted identifiers; literals are bound, never spliced.

use crate::error::ConfigError;

use super::quote_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    /// Compared as text so the same SQL works for numeric and text columns.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Eq,
    LParen,
    RParen,
    Comma,
}

impl ResourceFilter {
    /// Empty or whitespace-only input is "no filter".
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidResourceFilter {
            filter: input.to_string(),
            reason: reason.to_string(),
        };
        let tokens = tokenize(input).map_err(|r| invalid(&r))?;
        let mut predicates = Vec::new();
        let mut pos = 0;
        while pos < tokens.len() {
            if !predicates.is_empty() {
                match tokens.get(pos) {
                    Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("and") => pos += 1,
                    _ => return Err(invalid("predicates must be joined by AND")),
                }
            }
            let Some(Token::Ident(column)) = tokens.get(pos) else {
                return Err(invalid("expected column name"));
            };
            quote_identifier(column)?;
            pos += 1;
            let values = match tokens.get(pos) {
                Some(Token::Eq) => {
                    pos += 1;
                    let Some(Token::Literal(v)) = tokens.get(pos) else {
                        return Err(invalid("expected literal after ="));
                    };
                    pos += 1;
                    vec![v.clone()]
                }
                Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("in") => {
                    pos += 1;
                    if tokens.get(pos) != Some(&Token::LParen) {
                        return Err(invalid("expected ( after IN"));
                    }
                    pos += 1;
                    let mut values = Vec::new();
                    loop {
                        let Some(Token::Literal(v)) = tokens.get(pos) else {
                            return Err(invalid("expected literal in IN list"));
                        };
                        values.push(v.clone());
                        pos += 1;
                        match tokens.get(pos) {
                            Some(Token::Comma) => pos += 1,
                            Some(Token::RParen) => {
                                pos += 1;
                                break;
                            }
                            _ => return Err(invalid("unterminated IN list")),
                        }
                    }
                    values
                }
                _ => return Err(invalid("expected = or IN")),
            };
            predicates.push(Predicate {
                column: column.clone(),
                values,
            });
        }
        Ok(Self { predicates })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Renders ` AND ...` clauses with `$n` placeholders starting at `first_placeholder`.
    /// Returns the SQL fragment and the values to bind, in order.
    pub fn to_sql(&self, first_placeholder: usize) -> Result<(String, Vec<String>), ConfigError> {
        let mut sql = String::new();
        let mut binds = Vec::new();
        let mut n = first_placeholder;
        for p in &self.predicates {
            let column = quote_identifier(&p.column)?;
            let placeholders: Vec<String> = p
                .values
                .iter()
                .map(|v| {
                    binds.push(v.clone());
                    let ph = format!("${}", n);
                    n += 1;
                    ph
                })
                .collect();
            if placeholders.len() == 1 {
                sql.push_str(&format!(" AND CAST({} AS TEXT) = {}", column, placeholders[0]));
            } else {
                sql.push_str(&format!(
                    " AND CAST({} AS TEXT) IN ({})",
                    column,
                    placeholders.join(", ")
                ));
            }
        }
        Ok((sql, binds))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' => {
                tokens.push(Token::Eq);
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(value));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.parse::<f64>().is_err() {
                    return Err(format!("bad number {text:?}"));
                }
                tokens.push(Token::Literal(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}
