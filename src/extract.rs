use std::collections::HashSet;

/// Result of scanning model source text for `color()` calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedColors {
    /// Distinct tokens in order of first appearance.
    pub tokens: Vec<String>,
    /// Calls that looked like a literal color but could not be parsed.
    pub malformed: Vec<MalformedColor>,
}

impl ExtractedColors {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A `color()` call that was skipped because its literal was unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedColor {
    pub line: usize,
    pub reason: &'static str,
}

/// Ordered set keyed on the literal token text.
#[derive(Debug, Default)]
struct TokenSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl TokenSet {
    fn insert(&mut self, token: String) {
        if self.seen.insert(token.clone()) {
            self.order.push(token);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Collects the distinct color tokens referenced by `color()` calls.
///
/// Recognized literal forms are quoted names or hex codes (`color("red")`,
/// `color('#ff000080', 0.5)`) and numeric vectors (`color([1, 0, 0])`).
/// Vector tokens are normalized to the way OpenSCAD's `str()` prints them
/// so the renderer-side comparison sees the same text. Calls with a
/// non-literal argument such as `color(c)` are ignored.
pub fn extract_colors(source: &str) -> ExtractedColors {
    let mut scanner = Scanner::new(source);
    let mut tokens = TokenSet::default();
    let mut malformed = Vec::new();

    while let Some(call_start) = scanner.next_color_call() {
        let line = scanner.line_of(call_start);
        match scanner.parse_call_argument() {
            Argument::Literal(token) => tokens.insert(token),
            Argument::NonLiteral => {}
            Argument::Malformed(reason) => {
                log::debug!("skipping malformed color() call on line {line}: {reason}");
                malformed.push(MalformedColor { line, reason });
            }
        }
    }

    ExtractedColors {
        tokens: tokens.into_vec(),
        malformed,
    }
}

enum Argument {
    Literal(String),
    NonLiteral,
    Malformed(&'static str),
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn line_of(&self, offset: usize) -> usize {
        self.bytes[..offset].iter().filter(|b| **b == b'\n').count() + 1
    }

    /// Advances past the next standalone `color` identifier followed by `(`
    /// and returns the identifier's offset.
    fn next_color_call(&mut self) -> Option<usize> {
        while self.pos < self.bytes.len() {
            if self.skip_comment() {
                continue;
            }
            let byte = self.bytes[self.pos];
            if byte == b'"' || byte == b'\'' {
                self.skip_string(byte);
                continue;
            }
            if is_ident_start(byte) {
                let start = self.pos;
                while self.peek().is_some_and(is_ident_char) {
                    self.pos += 1;
                }
                let preceded_by_dot = start > 0 && self.bytes[start - 1] == b'.';
                if &self.src[start..self.pos] == "color" && !preceded_by_dot {
                    self.skip_trivia();
                    if self.peek() == Some(b'(') {
                        self.pos += 1;
                        return Some(start);
                    }
                }
                continue;
            }
            self.pos += 1;
        }
        None
    }

    fn skip_comment(&mut self) -> bool {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(b"//") {
            while self.peek().is_some_and(|b| b != b'\n') {
                self.pos += 1;
            }
            true
        } else if rest.starts_with(b"/*") {
            self.pos = match self.src[self.pos + 2..].find("*/") {
                Some(end) => self.pos + 2 + end + 2,
                None => self.bytes.len(),
            };
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if !self.skip_comment() {
                break;
            }
        }
    }

    /// Skips a string literal outside of a color call. Unterminated strings
    /// run to the end of the line.
    fn skip_string(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(byte) = self.peek() {
            self.pos += 1;
            match byte {
                b'\\' => self.pos += 1,
                b'\n' => return,
                b if b == quote => return,
                _ => {}
            }
        }
    }

    fn parse_call_argument(&mut self) -> Argument {
        self.skip_trivia();
        let argument = match self.peek() {
            Some(quote @ (b'"' | b'\'')) => self.parse_quoted(quote),
            Some(b'[') => self.parse_vector(),
            _ => return Argument::NonLiteral,
        };
        let token = match argument {
            Ok(token) => token,
            Err(reason) => return Argument::Malformed(reason),
        };
        self.skip_trivia();
        match self.peek() {
            Some(b')') | Some(b',') => Argument::Literal(token),
            _ => Argument::Malformed("missing closing parenthesis"),
        }
    }

    fn parse_quoted(&mut self, quote: u8) -> Result<String, &'static str> {
        self.pos += 1;
        let mut token = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                '\n' => break,
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        token.push(escaped);
                    }
                }
                c if c as u32 == quote as u32 => {
                    self.pos += offset + 1;
                    if token.trim().is_empty() {
                        return Err("empty color name");
                    }
                    return Ok(token);
                }
                c => token.push(c),
            }
        }
        Err("unterminated string literal")
    }

    fn parse_vector(&mut self) -> Result<String, &'static str> {
        let open = self.pos;
        let Some(len) = self.src[open..].find(|c: char| c == ']' || c == ')' || c == ';') else {
            self.pos = self.bytes.len();
            return Err("unterminated color vector");
        };
        let close = open + len;
        if self.bytes[close] != b']' {
            self.pos = close;
            return Err("unterminated color vector");
        }
        self.pos = close + 1;

        let mut components = Vec::new();
        for part in self.src[open + 1..close].split(',') {
            let part = part.trim();
            if part.parse::<f64>().is_err() {
                return Err("color vector element is not a number");
            }
            components.push(normalize_number(part));
        }
        if !(3..=4).contains(&components.len()) {
            return Err("color vector must have 3 or 4 elements");
        }
        Ok(format!("[{}]", components.join(", ")))
    }
}

/// Renders a numeric literal the way OpenSCAD's `str()` does for the common
/// cases: integral values lose their fractional part.
fn normalize_number(literal: &str) -> String {
    match literal.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 && value.abs() < 1e15 => format!("{}", value as i64),
        Ok(value) => format!("{value}"),
        Err(_) => literal.to_string(),
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$'
}

fn is_ident_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_names_in_first_seen_order() {
        let colors = extract_colors(r#"color("red") cube(10); color("blue") sphere(5);"#);
        assert_eq!(colors.tokens, vec!["red", "blue"]);
        assert!(colors.malformed.is_empty());
    }

    #[test]
    fn duplicates_keep_first_position() {
        let colors = extract_colors(
            r#"color("red") cube(1); color("green") cube(2); color("red") cube(3);"#,
        );
        assert_eq!(colors.tokens, vec!["red", "green"]);
    }

    #[test]
    fn deduplication_is_case_sensitive() {
        let colors = extract_colors(r#"color("Red") a(); color("red") b();"#);
        assert_eq!(colors.tokens, vec!["Red", "red"]);
    }

    #[test]
    fn accepts_single_quotes_hex_and_alpha_argument() {
        let colors = extract_colors("color('#FF0000') a();\ncolor ( \"#00ff0080\" , 0.5 ) b();");
        assert_eq!(colors.tokens, vec!["#FF0000", "#00ff0080"]);
    }

    #[test]
    fn normalizes_vector_literals() {
        let colors = extract_colors("color([1,0, 0]) a(); color([ 0.5 , 1.0, 0, 1 ]) b();");
        assert_eq!(colors.tokens, vec!["[1, 0, 0]", "[0.5, 1, 0, 1]"]);
    }

    #[test]
    fn ignores_other_identifiers_and_comments() {
        let source = r#"
            // color("commented") cube();
            /* color("blocked") */
            mycolor("nope");
            render_color = "also-nope";
            obj.color("member");
            echo("color(\"quoted\")");
            module color(c) { children(); }
            color(c) cube();
            color("kept") cube();
        "#;
        let colors = extract_colors(source);
        assert_eq!(colors.tokens, vec!["kept"]);
        assert!(colors.malformed.is_empty());
    }

    #[test]
    fn malformed_calls_are_skipped_and_reported() {
        let source = "color(\"red\ncube();\ncolor([1, x, 0]) a();\ncolor([1,0]) b();\ncolor(\"\") c();\ncolor(\"blue\" d();\ncolor(\"green\") e();";
        let colors = extract_colors(source);
        assert_eq!(colors.tokens, vec!["green"]);
        let lines: Vec<usize> = colors.malformed.iter().map(|m| m.line).collect();
        assert_eq!(lines, vec![1, 3, 4, 5, 6]);
    }

    #[test]
    fn no_calls_yields_empty_result() {
        let colors = extract_colors("cube(10);");
        assert!(colors.is_empty());
        assert!(colors.malformed.is_empty());
    }

    #[test]
    fn extraction_is_stable_across_runs() {
        let source = "color(\"c\") a(); color(\"a\") b(); color(\"b\") c(); color(\"a\") d();";
        let first = extract_colors(source);
        for _ in 0..10 {
            assert_eq!(extract_colors(source), first);
        }
        assert_eq!(first.tokens, vec!["c", "a", "b"]);
    }
}
