//! Color parsing and text escaping shared by the backends and the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MarkupError;

/// Opaque RGB color, carried on the wire as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const HIGHLIGHT: Color = Color::rgb(0xff, 0xeb, 0x3b);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const COMMENT: Color = Color::rgb(0xff, 0x98, 0x00);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rgb`, `#rrggbb`, or either form without the leading `#`.
    pub fn parse_hex(input: &str) -> Result<Self, MarkupError> {
        let invalid = || MarkupError::InvalidColor(input.to_owned());
        let digits = input.trim().trim_start_matches('#');
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let expanded = match digits.len() {
            3 => digits.chars().flat_map(|c| [c, c]).collect::<String>(),
            6 => digits.to_owned(),
            _ => return Err(invalid()),
        };
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&expanded[range], 16).map_err(|_| invalid())
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = MarkupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::parse_hex(s)
    }
}

impl TryFrom<String> for Color {
    type Error = MarkupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse_hex(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Escapes text for embedding in markup-language output (SVG labels, HTML
/// popovers).
pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_forms() {
        assert_eq!(Color::parse_hex("#ffeb3b").unwrap(), Color::HIGHLIGHT);
        assert_eq!(Color::parse_hex("FFEB3B").unwrap(), Color::HIGHLIGHT);
        assert_eq!(Color::parse_hex("#f00").unwrap(), Color::rgb(255, 0, 0));
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "#", "not-a-hex", "#ff", "#fffff", "#gggggg", "#ffeb3b00"] {
            assert!(Color::parse_hex(input).is_err(), "{input} should not parse");
        }
    }

    #[test]
    fn serializes_as_lowercase_hex() {
        let color: Color = serde_json::from_str("\"#ABC\"").unwrap();
        assert_eq!(serde_json::to_string(&color).unwrap(), "\"#aabbcc\"");
        assert!(serde_json::from_str::<Color>("\"invalid\"").is_err());
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_text(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_text("plain"), "plain");
    }
}
