use std::borrow::Cow;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, ParseError, ParseErrorKind};
use crate::model::Variable;

/// Turns a single line of text into a [`Variable`].
///
/// Implementations return [`Variable::invalid`] for lines that define nothing
/// (blank lines, comments, lines without `=`) and only fail for lines that
/// look like a definition but are corrupt.
pub trait LineParser {
    fn parse_line(&self, line: &str) -> Result<Variable, ParseError>;
}

/// Produces the ordered sequence of variables of a whole source.
///
/// The sequence has one entry per source line, invalid placeholders included.
pub trait Parser {
    fn parse(&self) -> Result<Vec<Variable>, Error>;
}

/// Line parser for the `.env` dialect:
///
/// * `NAME=value`, `export NAME=value`, `"NAME"=value`
/// * `# comment` lines and `value # trailing comment`
/// * `'single'` or `"double"` quoted values, with `\\` and an escaped closing
///   quote as the only escapes; anything after the closing quote is dropped
/// * unquoted values must not contain whitespace
#[derive(Debug, Clone, Copy, Default)]
pub struct DotenvLineParser;

impl LineParser for DotenvLineParser {
    fn parse_line(&self, line: &str) -> Result<Variable, ParseError> {
        let working = line.trim();
        if working.is_empty() || working.starts_with('#') {
            return Ok(Variable::invalid());
        }

        let Some(eq_idx) = working.find('=') else {
            return Ok(Variable::invalid());
        };

        let name = sanitize_name(&working[..eq_idx]);
        if name.is_empty() {
            return Ok(Variable::invalid());
        }

        let value_input = working[eq_idx + 1..].trim_start();
        let value_offset = line.len() - line.trim_start().len() + working.len() - value_input.len();
        let value_column = column_at(value_offset);
        let value = sanitize_value(value_input.trim_end(), &name, value_column)?;

        Variable::new(&name, value).or_else(|_| Ok(Variable::invalid()))
    }
}

/// Parse a single line with the default [`DotenvLineParser`].
pub fn parse_line(line: &str) -> Result<Variable, ParseError> {
    DotenvLineParser.parse_line(line)
}

/// Parse every line of `input` with the default [`DotenvLineParser`].
pub fn parse_str(input: &str) -> Result<Vec<Variable>, Error> {
    StringParser::new(input).parse()
}

/// Parse every line read from `reader` with the default [`DotenvLineParser`].
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Vec<Variable>, Error> {
    parse_lines(Lines::new(reader), &DotenvLineParser)
}

/// Parser over in-memory content.
#[derive(Debug, Clone)]
pub struct StringParser<L = DotenvLineParser> {
    content: String,
    line_parser: L,
}

impl StringParser {
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_line_parser(content, DotenvLineParser)
    }
}

impl<L: LineParser> StringParser<L> {
    pub fn with_line_parser(content: impl Into<String>, line_parser: L) -> Self {
        Self {
            content: content.into(),
            line_parser,
        }
    }
}

impl<L: LineParser> Parser for StringParser<L> {
    fn parse(&self) -> Result<Vec<Variable>, Error> {
        let content = self.content.trim();
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let normalized = normalize_newlines(content);
        normalized
            .split('\n')
            .zip(1u32..)
            .map(|(line, line_num)| {
                self.line_parser
                    .parse_line(line)
                    .map_err(|err| Error::from(err.at_line(line_num)))
            })
            .collect()
    }
}

/// Parser over a file, re-opened on every [`Parser::parse`] call.
#[derive(Debug, Clone)]
pub struct FileParser<L = DotenvLineParser> {
    path: PathBuf,
    line_parser: L,
}

impl FileParser {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_line_parser(path, DotenvLineParser)
    }
}

impl<L: LineParser> FileParser<L> {
    pub fn with_line_parser(path: impl AsRef<Path>, line_parser: L) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            line_parser,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and return its lines.
    ///
    /// The returned iterator is single-pass; call again to read the file anew.
    pub fn lines(&self) -> Result<Lines<BufReader<File>>, Error> {
        if !self.path.is_file() {
            return Err(Error::SourceUnreadable {
                path: self.path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let file = File::open(&self.path).map_err(|source| Error::SourceUnreadable {
            path: self.path.clone(),
            source,
        })?;
        Ok(Lines::new(BufReader::new(file)))
    }
}

impl<L: LineParser> Parser for FileParser<L> {
    fn parse(&self) -> Result<Vec<Variable>, Error> {
        let parsed = parse_lines(self.lines()?, &self.line_parser)?;
        debug!(path = %self.path.display(), lines = parsed.len(), "parsed env file");
        Ok(parsed)
    }
}

fn parse_lines<R, L>(lines: Lines<R>, line_parser: &L) -> Result<Vec<Variable>, Error>
where
    R: BufRead,
    L: LineParser + ?Sized,
{
    let mut parsed = Vec::new();
    for (line, line_num) in lines.zip(1u32..) {
        let line = line?;
        let variable = line_parser
            .parse_line(&line)
            .map_err(|err| err.at_line(line_num))?;
        parsed.push(variable);
    }
    Ok(parsed)
}

/// Single-pass iterator over the lines of a reader.
///
/// `\n`, `\r\n` and lone `\r` all end a line. Once exhausted (or after the
/// first error) the iterator yields nothing more.
#[derive(Debug)]
pub struct Lines<R> {
    reader: R,
    pending: VecDeque<String>,
    done: bool,
}

impl<R: BufRead> Lines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn fill(&mut self) -> Result<bool, Error> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(false);
        }

        let chunk = String::from_utf8(buf)?;
        let chunk = chunk.strip_suffix('\n').unwrap_or(&chunk);
        let chunk = chunk.strip_suffix('\r').unwrap_or(chunk);
        self.pending.extend(chunk.split('\r').map(str::to_owned));
        Ok(true)
    }
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn normalize_newlines(input: &str) -> Cow<'_, str> {
    if !input.contains('\r') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            out.push('\n');
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            continue;
        }
        out.push(ch);
    }

    Cow::Owned(out)
}

// One-based column for a byte offset, saturating on huge lines.
fn column_at(offset: usize) -> u32 {
    u32::try_from(offset)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

fn sanitize_name(raw: &str) -> String {
    let mut name = raw.trim();
    if let Some(rest) = name.strip_prefix("export")
        && rest.starts_with(char::is_whitespace)
    {
        name = rest.trim_start();
    }

    name.chars()
        .filter(|ch| *ch != '\'' && *ch != '"')
        .collect::<String>()
        .trim()
        .to_owned()
}

fn sanitize_value(input: &str, name: &str, column: u32) -> Result<String, ParseError> {
    match input.chars().next() {
        None => Ok(String::new()),
        Some(quote @ ('"' | '\'')) => Ok(sanitize_quoted(input, quote, name)),
        Some(_) => sanitize_unquoted(input, name, column),
    }
}

fn sanitize_quoted(input: &str, quote: char, name: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().skip(1).peekable();
    let mut closed = false;

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some(&next) if next == '\\' || next == quote => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(ch),
            }
            continue;
        }
        if ch == quote {
            closed = true;
            break;
        }
        out.push(ch);
    }

    if !closed {
        debug!(name, "quoted value has no closing quote, keeping it verbatim");
        out.insert(0, quote);
    }

    out.trim().to_owned()
}

fn sanitize_unquoted(input: &str, name: &str, column: u32) -> Result<String, ParseError> {
    let value = input
        .split_once('#')
        .map(|(head, _)| head)
        .unwrap_or(input)
        .trim();

    if value.contains(char::is_whitespace) {
        return Err(ParseError::new(
            1,
            column,
            ParseErrorKind::MalformedValue {
                name: name.to_owned(),
            },
        ));
    }

    Ok(value.to_owned())
}
