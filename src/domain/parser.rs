//! Trigger DSL parser.
//!
//! Recursive descent parser for the one-line trigger grammar. Converts text
//! to [`TriggerAst`] with meaningful error messages including character
//! offset and the unmatched clause.
//!
//! ```text
//! rule       ::= "IF" condition "FOR" INT "d" "THEN" action ("WITH" options)?
//! condition  ::= and_expr ("OR" and_expr)*        AND binds tighter than OR
//! and_expr   ::= term ("AND" term)*
//! term       ::= "IND(" name ("," "region=" ident)? ("," "cohort=" ident)? ")" op NUMBER
//!              | "SLOPE(" name "," INT "d)" op NUMBER
//!              | "BAND(" name ")" "IS" ("below"|"in_band"|"above")
//!              | "GAP(" name "," name ")" op NUMBER
//! action     ::= "START" ident "IN" ident
//! options    ::= ("COOLDOWN=" INT "d" | "PERSISTENCE=" INT "d" | "WINDOW=" INT "d")+
//! op         ::= ">" | ">=" | "<" | "<=" | "==" | "!="
//! ```
//!
//! Keywords are case-insensitive; identifiers keep their case as written.

use crate::domain::ast::{
    Action, BandState, CmpOp, Condition, Expression, Options, TriggerAst,
};
use crate::domain::error::SyntaxError;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), SyntaxError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(SyntaxError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(SyntaxError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    /// Case-insensitive keyword lookahead with a word-boundary check.
    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        // get() also rejects a split inside a multibyte character.
        let Some(head) = remaining.get(..keyword.len()) else {
            return false;
        };
        head.eq_ignore_ascii_case(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SyntaxError> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek_word();
            Err(SyntaxError {
                message: format!("expected '{}', found '{}'", keyword, found),
                position: self.pos,
            })
        }
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_ident(&mut self) -> Result<String, SyntaxError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(SyntaxError {
                message: format!("expected identifier, found '{}'", self.peek_word()),
                position: start,
            });
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_number(&mut self) -> Result<f64, SyntaxError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(SyntaxError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| SyntaxError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<u32, SyntaxError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut digits = 0;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(SyntaxError {
                message: "expected integer".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<u32>().map_err(|_| SyntaxError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    /// `INT "d"` — a day count like `7d`.
    fn parse_days(&mut self) -> Result<u32, SyntaxError> {
        let days = self.parse_integer()?;
        match self.peek() {
            Some('d') | Some('D') => {
                self.advance();
                Ok(days)
            }
            _ => Err(SyntaxError {
                message: format!("expected 'd' after day count, found '{}'", self.peek_word()),
                position: self.pos,
            }),
        }
    }

    fn parse_op(&mut self) -> Result<CmpOp, SyntaxError> {
        self.skip_whitespace();
        let rest = self.remaining();
        let (op, len) = if rest.starts_with(">=") {
            (CmpOp::Ge, 2)
        } else if rest.starts_with("<=") {
            (CmpOp::Le, 2)
        } else if rest.starts_with("==") {
            (CmpOp::Eq, 2)
        } else if rest.starts_with("!=") {
            (CmpOp::Ne, 2)
        } else if rest.starts_with('>') {
            (CmpOp::Gt, 1)
        } else if rest.starts_with('<') {
            (CmpOp::Lt, 1)
        } else {
            return Err(SyntaxError {
                message: format!(
                    "expected comparison operator, found '{}'",
                    self.peek_word()
                ),
                position: self.pos,
            });
        };
        self.pos += len;
        Ok(op)
    }

    fn parse_indicator_term(&mut self) -> Result<Expression, SyntaxError> {
        self.expect_keyword("IND")?;
        self.expect_char('(')?;
        let name = self.parse_ident()?;

        let mut region = None;
        let mut cohort = None;
        loop {
            self.skip_whitespace();
            if self.peek() != Some(',') {
                break;
            }
            self.advance();
            self.skip_whitespace();
            if self.peek_keyword("region") {
                self.pos += "region".len();
                self.expect_char('=')?;
                region = Some(self.parse_ident()?);
            } else if self.peek_keyword("cohort") {
                self.pos += "cohort".len();
                self.expect_char('=')?;
                cohort = Some(self.parse_ident()?);
            } else {
                return Err(SyntaxError {
                    message: format!(
                        "expected 'region=' or 'cohort=', found '{}'",
                        self.peek_word()
                    ),
                    position: self.pos,
                });
            }
        }
        self.expect_char(')')?;

        let op = self.parse_op()?;
        let value = self.parse_number()?;
        Ok(Expression::Indicator {
            name,
            region,
            cohort,
            op,
            value,
        })
    }

    fn parse_slope_term(&mut self) -> Result<Expression, SyntaxError> {
        self.expect_keyword("SLOPE")?;
        self.expect_char('(')?;
        let name = self.parse_ident()?;
        self.expect_char(',')?;
        let window_days = self.parse_days()?;
        self.expect_char(')')?;
        let op = self.parse_op()?;
        let value = self.parse_number()?;
        Ok(Expression::Slope {
            name,
            window_days,
            op,
            value,
        })
    }

    fn parse_band_term(&mut self) -> Result<Expression, SyntaxError> {
        self.expect_keyword("BAND")?;
        self.expect_char('(')?;
        let name = self.parse_ident()?;
        self.expect_char(')')?;
        self.expect_keyword("IS")?;
        self.skip_whitespace();
        let state_pos = self.pos;
        let word = self.parse_ident()?;
        let expected = BandState::parse(&word.to_lowercase()).ok_or(SyntaxError {
            message: format!(
                "expected band state (below, in_band, above), found '{}'",
                word
            ),
            position: state_pos,
        })?;
        Ok(Expression::Band { name, expected })
    }

    fn parse_gap_term(&mut self) -> Result<Expression, SyntaxError> {
        self.expect_keyword("GAP")?;
        self.expect_char('(')?;
        let left = self.parse_ident()?;
        self.expect_char(',')?;
        let right = self.parse_ident()?;
        self.expect_char(')')?;
        let op = self.parse_op()?;
        let value = self.parse_number()?;
        Ok(Expression::Gap {
            left,
            right,
            op,
            value,
        })
    }

    fn parse_term(&mut self) -> Result<Condition, SyntaxError> {
        self.skip_whitespace();
        let expr = if self.peek_keyword("IND") {
            self.parse_indicator_term()?
        } else if self.peek_keyword("SLOPE") {
            self.parse_slope_term()?
        } else if self.peek_keyword("BAND") {
            self.parse_band_term()?
        } else if self.peek_keyword("GAP") {
            self.parse_gap_term()?
        } else {
            return Err(SyntaxError {
                message: format!(
                    "expected term (IND, SLOPE, BAND or GAP), found '{}'",
                    self.peek_word()
                ),
                position: self.pos,
            });
        };
        Ok(Condition::Expr(expr))
    }

    /// `and_expr ::= term ("AND" term)*` — left-associative.
    fn parse_and_expr(&mut self) -> Result<Condition, SyntaxError> {
        let mut left = self.parse_term()?;
        loop {
            self.skip_whitespace();
            if self.peek_keyword("AND") {
                self.pos += "AND".len();
                let right = self.parse_term()?;
                left = Condition::And(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    /// `condition ::= and_expr ("OR" and_expr)*` — AND binds tighter than OR,
    /// so `A AND B OR C` is `Or(And(A, B), C)`.
    fn parse_condition(&mut self) -> Result<Condition, SyntaxError> {
        let mut left = self.parse_and_expr()?;
        loop {
            self.skip_whitespace();
            if self.peek_keyword("OR") {
                self.pos += "OR".len();
                let right = self.parse_and_expr()?;
                left = Condition::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_action(&mut self) -> Result<Action, SyntaxError> {
        self.expect_keyword("START")?;
        let template_key = self.parse_ident()?;
        self.expect_keyword("IN")?;
        let capacity = self.parse_ident()?;
        Ok(Action {
            template_key,
            capacity,
        })
    }

    fn parse_options(&mut self) -> Result<Options, SyntaxError> {
        let mut options = Options::default();
        let mut count = 0;
        loop {
            self.skip_whitespace();
            if self.peek_keyword("COOLDOWN") {
                self.pos += "COOLDOWN".len();
                self.expect_char('=')?;
                options.cooldown_days = Some(self.parse_days()?);
            } else if self.peek_keyword("PERSISTENCE") {
                self.pos += "PERSISTENCE".len();
                self.expect_char('=')?;
                options.persistence_days = Some(self.parse_days()?);
            } else if self.peek_keyword("WINDOW") {
                self.pos += "WINDOW".len();
                self.expect_char('=')?;
                options.window_days = Some(self.parse_days()?);
            } else {
                break;
            }
            count += 1;
        }
        if count == 0 {
            return Err(SyntaxError {
                message: format!(
                    "expected option (COOLDOWN, PERSISTENCE or WINDOW) after WITH, found '{}'",
                    self.peek_word()
                ),
                position: self.pos,
            });
        }
        Ok(options)
    }

    fn parse_rule(&mut self) -> Result<TriggerAst, SyntaxError> {
        self.expect_keyword("IF")?;
        let condition = self.parse_condition()?;
        self.expect_keyword("FOR")?;
        let persistence_days = self.parse_days()?;
        self.expect_keyword("THEN")?;
        let action = self.parse_action()?;

        let options = if self.consume_keyword("WITH") {
            self.parse_options()?
        } else {
            Options::default()
        };

        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(SyntaxError {
                message: format!("unexpected input after rule: '{}'", self.remaining()),
                position: self.pos,
            });
        }

        Ok(TriggerAst {
            condition,
            persistence_days,
            action,
            options,
        })
    }
}

/// Parse one line of trigger DSL text into an AST.
pub fn parse(input: &str) -> Result<TriggerAst, SyntaxError> {
    let mut parser = Parser::new(input);
    parser.parse_rule()
}
