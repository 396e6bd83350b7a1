//! KeyValues text parser.
//!
//! Keys and values are double-quoted strings without escapes. A `/` outside
//! a string starts a comment that runs to the end of the line.

use std::iter::Peekable;
use std::str::Chars;

use crate::kv::{KvList, KvValue};
use crate::{Error, Result};

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    /// Next character that is not whitespace or part of a comment.
    fn skip_space(&mut self) -> Option<char> {
        loop {
            match self.next()? {
                '/' => {
                    while !matches!(self.next(), Some('\n') | None) {}
                }
                c if c.is_whitespace() => {}
                c => return Some(c),
            }
        }
    }

    fn string(&mut self, context: &[String]) -> Result<String> {
        let mut s = String::new();
        loop {
            match self.next() {
                Some('"') => return Ok(s),
                Some(c) => s.push(c),
                None => return Err(self.eof(context)),
            }
        }
    }

    fn eof(&self, context: &[String]) -> Error {
        Error::UnexpectedEof {
            line: self.line,
            context: describe(context),
        }
    }

    fn unexpected(&self, expected: &'static str, found: char, context: &[String]) -> Error {
        Error::Unexpected {
            line: self.line,
            expected,
            found,
            context: describe(context),
        }
    }

    fn item(&mut self, context: &mut Vec<String>) -> Result<(String, KvValue)> {
        let key = self.string(context)?;
        match self.skip_space() {
            Some('"') => {
                let value = self.string(context)?;
                Ok((key, KvValue::Str(value)))
            }
            Some('{') => {
                context.push(key.clone());
                let block = self.block(context)?;
                context.pop();
                Ok((key, KvValue::List(block)))
            }
            Some(c) => Err(self.unexpected("a string or a block", c, context)),
            None => Err(self.eof(context)),
        }
    }

    fn block(&mut self, context: &mut Vec<String>) -> Result<KvList> {
        let mut list = KvList::new();
        loop {
            match self.skip_space() {
                Some('}') => return Ok(list),
                Some('"') => {
                    let (k, v) = self.item(context)?;
                    list.insert(k, v);
                }
                Some(c) => return Err(self.unexpected("'\"' or '}'", c, context)),
                None => return Err(self.eof(context)),
            }
        }
    }

    fn document(&mut self) -> Result<KvList> {
        let mut list = KvList::new();
        let mut context = Vec::new();
        loop {
            match self.skip_space() {
                None => return Ok(list),
                Some('"') => {
                    let (k, v) = self.item(&mut context)?;
                    list.insert(k, v);
                }
                Some(c) => return Err(self.unexpected("'\"'", c, &context)),
            }
        }
    }
}

fn describe(context: &[String]) -> String {
    if context.is_empty() {
        "top level".to_string()
    } else {
        context.join("/")
    }
}

/// Parse a KeyValues document.
pub fn parse(text: &str) -> Result<KvList> {
    Parser::new(text).document()
}
