//! Script classification and look-alike tables for domain inspection.
//!
//! The canonical alphabet for domain names is ASCII. Non-ASCII characters
//! that render like an ASCII character are listed here with the names of
//! the glyphs they imitate.

use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Script {
    Common,
    Latin,
    Greek,
    Cyrillic,
    Armenian,
    Hebrew,
    Arabic,
    Cjk,
    Other,
}

impl Script {
    pub fn of(ch: char) -> Script {
        let code = ch as u32;
        match code {
            0x41..=0x5A | 0x61..=0x7A => Script::Latin,
            0x00..=0x7F => Script::Common,
            0xC0..=0x24F | 0x1E00..=0x1EFF => Script::Latin,
            0x370..=0x3FF | 0x1F00..=0x1FFF => Script::Greek,
            0x400..=0x52F => Script::Cyrillic,
            0x530..=0x58F => Script::Armenian,
            0x590..=0x5FF => Script::Hebrew,
            0x600..=0x6FF => Script::Arabic,
            0x3040..=0x30FF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF => Script::Cjk,
            _ if ch.is_alphabetic() => Script::Other,
            _ => Script::Common,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Script::Common => "Common",
            Script::Latin => "Latin",
            Script::Greek => "Greek",
            Script::Cyrillic => "Cyrillic",
            Script::Armenian => "Armenian",
            Script::Hebrew => "Hebrew",
            Script::Arabic => "Arabic",
            Script::Cjk => "CJK",
            Script::Other => "Other",
        }
    }
}

lazy_static! {
    static ref CONFUSABLES: HashMap<char, &'static [&'static str]> = {
        let mut m: HashMap<char, &'static [&'static str]> = HashMap::new();

        // Cyrillic
        m.insert('а', &["LATIN SMALL LETTER A", "GREEK SMALL LETTER ALPHA"]);
        m.insert('в', &["LATIN SMALL LETTER B"]);
        m.insert('е', &["LATIN SMALL LETTER E", "LATIN SMALL LETTER E WITH DIAERESIS"]);
        m.insert('о', &["LATIN SMALL LETTER O", "GREEK SMALL LETTER OMICRON", "DIGIT ZERO"]);
        m.insert('р', &["LATIN SMALL LETTER P", "GREEK SMALL LETTER RHO"]);
        m.insert('с', &["LATIN SMALL LETTER C", "GREEK LUNATE SIGMA SYMBOL"]);
        m.insert('у', &["LATIN SMALL LETTER Y", "GREEK SMALL LETTER GAMMA"]);
        m.insert('х', &["LATIN SMALL LETTER X", "MULTIPLICATION SIGN"]);
        m.insert('к', &["LATIN SMALL LETTER K", "GREEK SMALL LETTER KAPPA"]);
        m.insert('м', &["LATIN SMALL LETTER M"]);
        m.insert('н', &["LATIN SMALL LETTER H"]);
        m.insert('т', &["LATIN SMALL LETTER T", "GREEK SMALL LETTER TAU"]);
        m.insert('і', &["LATIN SMALL LETTER I", "GREEK SMALL LETTER IOTA", "DIGIT ONE"]);
        m.insert('ј', &["LATIN SMALL LETTER J"]);
        m.insert('ѕ', &["LATIN SMALL LETTER S"]);
        m.insert('ԁ', &["LATIN SMALL LETTER D"]);
        m.insert('һ', &["LATIN SMALL LETTER H"]);
        m.insert('ӏ', &["LATIN SMALL LETTER L", "DIGIT ONE", "LATIN SMALL LETTER I"]);
        m.insert('ԛ', &["LATIN SMALL LETTER Q"]);
        m.insert('ԝ', &["LATIN SMALL LETTER W"]);
        m.insert('ɡ', &["LATIN SMALL LETTER G"]);
        m.insert('ѡ', &["LATIN SMALL LETTER W", "GREEK SMALL LETTER OMEGA"]);
        m.insert('А', &["LATIN CAPITAL LETTER A", "GREEK CAPITAL LETTER ALPHA"]);
        m.insert('В', &["LATIN CAPITAL LETTER B", "GREEK CAPITAL LETTER BETA"]);
        m.insert('Е', &["LATIN CAPITAL LETTER E", "GREEK CAPITAL LETTER EPSILON"]);
        m.insert('К', &["LATIN CAPITAL LETTER K", "GREEK CAPITAL LETTER KAPPA"]);
        m.insert('М', &["LATIN CAPITAL LETTER M", "GREEK CAPITAL LETTER MU"]);
        m.insert('Н', &["LATIN CAPITAL LETTER H", "GREEK CAPITAL LETTER ETA"]);
        m.insert('О', &["LATIN CAPITAL LETTER O", "GREEK CAPITAL LETTER OMICRON", "DIGIT ZERO"]);
        m.insert('Р', &["LATIN CAPITAL LETTER P", "GREEK CAPITAL LETTER RHO"]);
        m.insert('С', &["LATIN CAPITAL LETTER C"]);
        m.insert('Т', &["LATIN CAPITAL LETTER T", "GREEK CAPITAL LETTER TAU"]);
        m.insert('Х', &["LATIN CAPITAL LETTER X", "GREEK CAPITAL LETTER CHI"]);

        // Greek
        m.insert('α', &["LATIN SMALL LETTER A", "LATIN SMALL LETTER ALPHA"]);
        m.insert('ο', &["LATIN SMALL LETTER O", "CYRILLIC SMALL LETTER O", "DIGIT ZERO"]);
        m.insert('ρ', &["LATIN SMALL LETTER P", "CYRILLIC SMALL LETTER ER"]);
        m.insert('ν', &["LATIN SMALL LETTER V"]);
        m.insert('ι', &["LATIN SMALL LETTER I", "CYRILLIC SMALL LETTER BYELORUSSIAN-UKRAINIAN I"]);
        m.insert('κ', &["LATIN SMALL LETTER K", "CYRILLIC SMALL LETTER KA"]);
        m.insert('υ', &["LATIN SMALL LETTER U"]);
        m.insert('τ', &["LATIN SMALL LETTER T"]);
        m.insert('ϲ', &["LATIN SMALL LETTER C", "CYRILLIC SMALL LETTER ES"]);
        m.insert('Α', &["LATIN CAPITAL LETTER A", "CYRILLIC CAPITAL LETTER A"]);
        m.insert('Β', &["LATIN CAPITAL LETTER B", "CYRILLIC CAPITAL LETTER VE"]);
        m.insert('Ε', &["LATIN CAPITAL LETTER E", "CYRILLIC CAPITAL LETTER IE"]);
        m.insert('Ο', &["LATIN CAPITAL LETTER O", "CYRILLIC CAPITAL LETTER O", "DIGIT ZERO"]);

        // Latin look-alikes outside ASCII
        m.insert('ı', &["LATIN SMALL LETTER I"]);
        m.insert('ɑ', &["LATIN SMALL LETTER A", "GREEK SMALL LETTER ALPHA"]);
        m.insert('ℓ', &["LATIN SMALL LETTER L"]);
        m.insert('ⅼ', &["LATIN SMALL LETTER L", "DIGIT ONE"]);
        m.insert('ｏ', &["LATIN SMALL LETTER O"]);
        m.insert('ａ', &["LATIN SMALL LETTER A"]);
        m.insert('ｅ', &["LATIN SMALL LETTER E"]);

        // Armenian
        m.insert('օ', &["LATIN SMALL LETTER O", "DIGIT ZERO"]);
        m.insert('ս', &["LATIN SMALL LETTER U"]);
        m.insert('ո', &["LATIN SMALL LETTER N"]);
        m.insert('հ', &["LATIN SMALL LETTER H"]);

        m
    };
}

/// Reference glyph names a character can be mistaken for, or `None` when
/// the character is in the canonical alphabet or not known to be confusable.
pub fn similar_glyphs(ch: char) -> Option<&'static [&'static str]> {
    if ch.is_ascii() {
        return None;
    }
    CONFUSABLES.get(&ch).copied()
}

/// Distinct scripts used by the letters of `text`, ignoring common
/// characters such as digits, dots and hyphens.
pub fn scripts(text: &str) -> Vec<Script> {
    let mut found: Vec<Script> = text
        .chars()
        .map(Script::of)
        .filter(|script| *script != Script::Common)
        .collect();
    found.sort();
    found.dedup();
    found
}

pub fn is_mixed_script(text: &str) -> bool {
    scripts(text).len() > 1
}
