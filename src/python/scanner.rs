//! Splits Python source into logical lines without executing anything.
//!
//! Comments are dropped, bracketed and backslash continuations are joined,
//! `;`-separated statements become separate lines, and every string literal is
//! collapsed to an empty literal of the same quote character so later passes
//! can scan for brackets and keywords without tracking quoting.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ScanError {
    pub line: usize,
    pub reason: String,
}

/// One Python statement, as seen by the tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based line on which the statement starts
    pub line: usize,
    /// Indentation width of the first physical line (tabs expand to 8)
    pub indent: usize,
    pub text: String,
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    lines: Vec<LogicalLine>,
    text: String,
    start_line: usize,
    indent: usize,
    column: usize,
    at_line_start: bool,
}

pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, ScanError> {
    let mut scanner = Scanner {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        lines: Vec::new(),
        text: String::new(),
        start_line: 1,
        indent: 0,
        column: 0,
        at_line_start: true,
    };
    scanner.run()?;
    Ok(scanner.lines)
}

impl Scanner {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(&mut self) -> Result<(), ScanError> {
        while let Some(c) = self.peek(0) {
            if self.at_line_start && self.depth == 0 && self.text.is_empty() {
                match c {
                    ' ' => {
                        self.column += 1;
                        self.pos += 1;
                        continue;
                    }
                    '\t' => {
                        self.column = (self.column / 8 + 1) * 8;
                        self.pos += 1;
                        continue;
                    }
                    '\x0c' | '\r' => {
                        self.pos += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            match c {
                '#' => self.skip_comment(),
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    if self.depth > 0 {
                        self.text.push(' ');
                    } else {
                        self.finish_line();
                        self.at_line_start = true;
                        self.column = 0;
                    }
                }
                '\r' => self.pos += 1,
                '\\' if matches!(self.peek(1), Some('\n')) => {
                    self.pos += 2;
                    self.line += 1;
                    self.text.push(' ');
                }
                '\\' if matches!(self.peek(1), Some('\r')) && matches!(self.peek(2), Some('\n')) => {
                    self.pos += 3;
                    self.line += 1;
                    self.text.push(' ');
                }
                '\'' | '"' => {
                    self.begin_token();
                    self.read_string(c)?;
                }
                ';' if self.depth == 0 => {
                    self.pos += 1;
                    let indent = self.indent;
                    self.finish_line();
                    // The next statement shares the physical line's indentation.
                    self.indent = indent;
                    self.at_line_start = false;
                }
                '(' | '[' | '{' => {
                    self.begin_token();
                    self.depth += 1;
                    self.text.push(c);
                    self.pos += 1;
                }
                ')' | ']' | '}' => {
                    self.begin_token();
                    self.depth = self.depth.saturating_sub(1);
                    self.text.push(c);
                    self.pos += 1;
                }
                _ => {
                    self.begin_token();
                    self.text.push(c);
                    self.pos += 1;
                }
            }
        }

        if self.depth > 0 && !self.text.trim().is_empty() {
            return Err(ScanError {
                line: self.start_line,
                reason: "unclosed bracket at end of file".to_string(),
            });
        }
        self.finish_line();
        Ok(())
    }

    fn begin_token(&mut self) {
        if self.text.is_empty() {
            self.start_line = self.line;
            if self.at_line_start {
                self.indent = self.column;
            }
            self.at_line_start = false;
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn read_string(&mut self, quote: char) -> Result<(), ScanError> {
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScanError {
                    line: start_line,
                    reason: "unterminated string literal".to_string(),
                });
            };

            match c {
                '\\' => {
                    if self.peek(1) == Some('\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                '\n' if !triple => {
                    return Err(ScanError {
                        line: start_line,
                        reason: "unterminated string literal".to_string(),
                    });
                }
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c == quote => {
                    if !triple {
                        self.pos += 1;
                        break;
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        break;
                    }
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }

        self.text.push(quote);
        self.text.push(quote);
        Ok(())
    }

    fn finish_line(&mut self) {
        let text = self.text.trim().to_string();
        if !text.is_empty() {
            self.lines.push(LogicalLine {
                line: self.start_line,
                indent: self.indent,
                text,
            });
        }
        self.text.clear();
        self.indent = 0;
    }
}
