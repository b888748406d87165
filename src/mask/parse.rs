//! Parser for the textual mask syntax, e.g.
//! `Mask('osd.png') - Region(x=0, y=0, right=100, bottom=40)`

use super::Mask;
use crate::error::{Error, Result};
use crate::images::ImageLookup;
use crate::region::Region;

pub(super) fn parse(expr: &str, lookup: &ImageLookup) -> Result<Mask> {
    let mut parser = Parser {
        src: expr,
        pos: 0,
        lookup,
    };
    let mask = parser.expr()?;
    parser.skip_ws();
    if parser.pos != expr.len() {
        return Err(parser.syntax_error("trailing input"));
    }
    Ok(mask)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    lookup: &'a ImageLookup,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.syntax_error(&format!("expected '{token}'")))
        }
    }

    fn syntax_error(&self, what: &str) -> Error {
        Error::InvalidArgument {
            description: format!(
                "invalid mask expression {:?}: {what} at offset {}",
                self.src, self.pos
            ),
        }
    }

    // expr := unary (('+' | '-') unary)*
    fn expr(&mut self) -> Result<Mask> {
        let mut mask = self.unary()?;
        loop {
            if self.eat("+") {
                mask = mask + self.unary()?;
            } else if self.eat("-") {
                mask = mask - self.unary()?;
            } else {
                return Ok(mask);
            }
        }
    }

    // unary := '~' unary | primary
    fn unary(&mut self) -> Result<Mask> {
        if self.eat("~") {
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Mask> {
        if self.eat("(") {
            let inner = self.expr()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if self.eat("Region.ALL") {
            return Ok(Mask::from(Region::ALL));
        }
        if self.eat("Region(") {
            return self.region_args().map(Mask::from);
        }
        if self.eat("Mask(") {
            return self.mask_args();
        }
        Err(self.unsupported_operand())
    }

    /// Consume whatever operand-like text comes next and report it.
    fn unsupported_operand(&mut self) -> Error {
        self.skip_ws();
        let rest = self.rest();
        let mut depth = 0usize;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    end = i;
                    break;
                }
                ')' => depth -= 1,
                '+' | '-' | '~' if depth == 0 && i > 0 => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        let operand = rest[..end].trim();
        if operand.is_empty() {
            return self.syntax_error("expected an operand");
        }
        Error::UnsupportedOperand {
            operand: operand.to_string(),
        }
    }

    fn region_args(&mut self) -> Result<Region> {
        let (mut x, mut y, mut right, mut bottom) = (None, None, None, None);
        loop {
            self.skip_ws();
            if self.eat(")") {
                break;
            }
            let key = self.ident();
            self.expect("=")?;
            let value = self.int()?;
            match key {
                "x" => x = Some(value),
                "y" => y = Some(value),
                "right" => right = Some(value),
                "bottom" => bottom = Some(value),
                other => {
                    return Err(self.syntax_error(&format!("unknown Region field '{other}'")));
                }
            }
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        match (x, y, right, bottom) {
            (Some(x), Some(y), Some(right), Some(bottom)) => {
                Ok(Region::new(x, y, right - x, bottom - y))
            }
            _ => Err(self.syntax_error("Region needs x, y, right and bottom")),
        }
    }

    fn mask_args(&mut self) -> Result<Mask> {
        self.skip_ws();
        if self.eat("None") {
            self.expect(")")?;
            return Ok(Mask::from(None::<Region>));
        }
        if self.rest().starts_with('\'') || self.rest().starts_with('"') {
            let name = self.string()?;
            self.expect(")")?;
            return Mask::load(&name, self.lookup);
        }
        // `Mask(<Image>)` names pixels we don't have.
        Err(self.unsupported_operand())
    }

    fn ident(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn int(&mut self) -> Result<i32> {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let value = rest[..end]
            .parse::<i32>()
            .map_err(|_| self.syntax_error("expected an integer"))?;
        self.pos += end;
        Ok(value)
    }

    fn string(&mut self) -> Result<String> {
        let rest = self.rest();
        let quote = rest.chars().next().unwrap_or('\'');
        let mut out = String::new();
        let mut escaped = false;
        for (i, c) in rest.char_indices().skip(1) {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                self.pos += i + 1;
                return Ok(out);
            } else {
                out.push(c);
            }
        }
        Err(self.syntax_error("unterminated string"))
    }
}
