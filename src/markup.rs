//! Inline style markup compiled to ANSI escape sequences.
//!
//! Tags look like `<fg 13><bold>Header<reset>` with configurable delimiters.
//! The delimiters are passed in explicitly; there is no process-wide styling
//! state.

use crossterm::style::{Attribute, Color, SetAttribute, SetBackgroundColor, SetForegroundColor};
use crossterm::Command;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MarkupError;

/// Left and right tag delimiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    #[serde(default = "default_left")]
    pub left: String,
    #[serde(default = "default_right")]
    pub right: String,
}

fn default_left() -> String {
    "<".to_string()
}

fn default_right() -> String {
    ">".to_string()
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            left: default_left(),
            right: default_right(),
        }
    }
}

/// Compiler for one set of delimiters.
pub struct Markup {
    tag: Regex,
}

impl Markup {
    /// Builds the tag matcher for `delimiters`.
    pub fn new(delimiters: &Delimiters) -> Result<Self, MarkupError> {
        let pattern = format!(
            "{}(.*?){}",
            regex::escape(&delimiters.left),
            regex::escape(&delimiters.right)
        );
        Ok(Self {
            tag: Regex::new(&pattern)?,
        })
    }

    /// Replaces every tag in `input` with its escape sequence.
    pub fn compile(&self, input: &str) -> Result<String, MarkupError> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in self.tag.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&input[last..whole.start()]);
            write_tag(&mut out, caps.get(1).map_or("", |m| m.as_str()))?;
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }
}

fn write_tag(out: &mut String, tag: &str) -> Result<(), MarkupError> {
    let mut parts = tag.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(MarkupError::UnknownTag(tag.to_string()));
    }

    match (name, arg) {
        ("fg", Some(color)) => SetForegroundColor(parse_color(color)?).write_ansi(out)?,
        ("bg", Some(color)) => SetBackgroundColor(parse_color(color)?).write_ansi(out)?,
        ("nofg", None) => SetForegroundColor(Color::Reset).write_ansi(out)?,
        ("nobg", None) => SetBackgroundColor(Color::Reset).write_ansi(out)?,
        ("bold", None) => SetAttribute(Attribute::Bold).write_ansi(out)?,
        ("nobold", None) => SetAttribute(Attribute::NormalIntensity).write_ansi(out)?,
        ("underline", None) => SetAttribute(Attribute::Underlined).write_ansi(out)?,
        ("nounderline", None) => SetAttribute(Attribute::NoUnderline).write_ansi(out)?,
        ("reverse", None) => SetAttribute(Attribute::Reverse).write_ansi(out)?,
        ("noreverse", None) => SetAttribute(Attribute::NoReverse).write_ansi(out)?,
        ("reset", None) => SetAttribute(Attribute::Reset).write_ansi(out)?,
        _ => return Err(MarkupError::UnknownTag(tag.to_string())),
    }
    Ok(())
}

fn parse_color(value: &str) -> Result<Color, MarkupError> {
    if let Ok(index) = value.parse::<u8>() {
        return Ok(Color::AnsiValue(index));
    }
    let index = match value.to_lowercase().as_str() {
        "black" => 0,
        "red" => 1,
        "green" => 2,
        "yellow" => 3,
        "blue" => 4,
        "magenta" => 5,
        "cyan" => 6,
        "white" => 7,
        _ => return Err(MarkupError::InvalidColor(value.to_string())),
    };
    Ok(Color::AnsiValue(index))
}
