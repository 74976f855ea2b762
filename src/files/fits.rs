// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Minimal FITS primary-HDU codec.
//!
//! Only what the orchestration core needs: header cards (fixed-format and
//! `HIERARCH`), the structural keywords, and an opaque data unit. Pixel
//! semantics belong to the numerical recipes.
//!
//! # Layout
//!
//! ```text
//! | 80-char cards ... END | pad to 2880 | data bytes | pad to 2880 |
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::errors::FitsError;

pub const CARD_LEN: usize = 80;
pub const BLOCK_LEN: usize = 2880;
const MAX_HEADER_BLOCKS: usize = 512;
const STRUCTURAL_KEYS: [&str; 4] = ["SIMPLE", "BITPIX", "NAXIS", "EXTEND"];

/// Value of a header card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl CardValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CardValue::Int(v) => Some(*v as f64),
            CardValue::Float(v) => Some(*v),
            CardValue::Str(s) => s.trim().parse().ok(),
            CardValue::Bool(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CardValue::Bool(v) => serde_json::Value::Bool(*v),
            CardValue::Int(v) => serde_json::Value::from(*v),
            CardValue::Float(v) => serde_json::Value::from(*v),
            CardValue::Str(v) => serde_json::Value::String(v.clone()),
        }
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Bool(v) => f.write_str(if *v { "T" } else { "F" }),
            CardValue::Int(v) => write!(f, "{v}"),
            CardValue::Float(v) => write!(f, "{v}"),
            CardValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for CardValue {
    fn from(v: bool) -> Self {
        CardValue::Bool(v)
    }
}

impl From<i64> for CardValue {
    fn from(v: i64) -> Self {
        CardValue::Int(v)
    }
}

impl From<f64> for CardValue {
    fn from(v: f64) -> Self {
        CardValue::Float(v)
    }
}

impl From<&str> for CardValue {
    fn from(v: &str) -> Self {
        CardValue::Str(v.to_string())
    }
}

impl From<String> for CardValue {
    fn from(v: String) -> Self {
        CardValue::Str(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: String,
    pub value: CardValue,
    pub comment: Option<String>,
}

/// Ordered set of cards; keys are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CardValue> {
        self.card(key).map(|c| &c.value)
    }

    pub fn card(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.key == key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(CardValue::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.card(key).is_some()
    }

    /// Replace the card in place or append it.
    pub fn set(&mut self, key: &str, value: impl Into<CardValue>, comment: Option<&str>) {
        let card = Card {
            key: key.to_string(),
            value: value.into(),
            comment: comment.map(str::to_string),
        };
        match self.cards.iter_mut().find(|c| c.key == key) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Card> {
        let position = self.cards.iter().position(|c| c.key == key)?;
        Some(self.cards.remove(position))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Read the primary header of a FITS file.
pub fn read_header(path: &Path) -> Result<Header, FitsError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut reader = BufReader::new(file);
    let (header, _) = read_header_from(path, &mut reader)?;
    Ok(header)
}

/// Read the primary header and its data unit as raw bytes.
pub fn read_fits(path: &Path) -> Result<(Header, Vec<u8>), FitsError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut reader = BufReader::new(file);
    let (header, data_len) = read_header_from(path, &mut reader)?;

    let mut data = vec![0u8; data_len];
    reader
        .read_exact(&mut data)
        .map_err(|_| malformed(path, "data unit is truncated"))?;
    Ok((header, data))
}

/// Write `header` plus an 8-bit data unit (empty data writes `NAXIS = 0`).
pub fn write_fits(path: &Path, header: &Header, data: &[u8]) -> Result<(), FitsError> {
    let mut bytes = Vec::with_capacity(BLOCK_LEN * 2 + data.len());

    let mut structural = vec![
        card("SIMPLE", CardValue::Bool(true), "conforms to FITS standard"),
        card("BITPIX", CardValue::Int(8), "array data type"),
    ];
    if data.is_empty() {
        structural.push(card("NAXIS", CardValue::Int(0), "number of array dimensions"));
    } else {
        structural.push(card("NAXIS", CardValue::Int(1), "number of array dimensions"));
        structural.push(card("NAXIS1", CardValue::Int(data.len() as i64), ""));
    }

    for c in structural
        .iter()
        .chain(header.iter().filter(|c| !is_structural(&c.key)))
    {
        bytes.extend_from_slice(format_card(c)?.as_bytes());
    }
    bytes.extend_from_slice(format!("{:<80}", "END").as_bytes());
    pad_to_block(&mut bytes, b' ');

    if !data.is_empty() {
        bytes.extend_from_slice(data);
        pad_to_block(&mut bytes, 0);
    }

    let mut file = File::create(path).map_err(|source| io_error(path, source))?;
    file.write_all(&bytes).map_err(|source| io_error(path, source))?;
    file.sync_all().map_err(|source| io_error(path, source))
}

fn read_header_from<R: Read>(path: &Path, reader: &mut R) -> Result<(Header, usize), FitsError> {
    let mut header = Header::new();
    let mut structural = Header::new();
    let mut block = [0u8; BLOCK_LEN];

    for block_index in 0..MAX_HEADER_BLOCKS {
        reader
            .read_exact(&mut block)
            .map_err(|_| malformed(path, "header ended before END card"))?;

        for (card_index, raw) in block.chunks(CARD_LEN).enumerate() {
            let text: String = raw
                .iter()
                .map(|&b| if b.is_ascii() && b != 0 { b as char } else { '?' })
                .collect();

            if block_index == 0 && card_index == 0 && !text.starts_with("SIMPLE") {
                return Err(malformed(path, "first card is not SIMPLE"));
            }
            if text.trim_end() == "END" {
                return Ok((header, data_length(&structural)));
            }
            if let Some(card) = parse_card(&text) {
                if is_structural(&card.key) {
                    structural.cards.push(card);
                } else {
                    header.cards.push(card);
                }
            }
        }
    }
    Err(malformed(path, "no END card"))
}

fn data_length(structural: &Header) -> usize {
    let naxis = structural.get_f64("NAXIS").unwrap_or(0.0) as usize;
    if naxis == 0 {
        return 0;
    }
    let bitpix = structural.get_f64("BITPIX").unwrap_or(8.0).abs() as usize;
    let pixels: usize = (1..=naxis)
        .map(|i| structural.get_f64(&format!("NAXIS{i}")).unwrap_or(0.0) as usize)
        .product();
    pixels * bitpix / 8
}

fn is_structural(key: &str) -> bool {
    STRUCTURAL_KEYS.contains(&key)
        || (key.starts_with("NAXIS") && key[5..].chars().all(|c| c.is_ascii_digit()))
}

fn is_fixed_format_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 8
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn format_value(value: &CardValue) -> String {
    match value {
        CardValue::Bool(v) => format!("{:>20}", if *v { "T" } else { "F" }),
        CardValue::Int(v) => format!("{:>20}", v),
        CardValue::Float(v) if v.is_finite() => {
            format!("{:>20}", format!("{:?}", v).replace('e', "E"))
        }
        CardValue::Float(v) => format!("'{:<8}'", v),
        CardValue::Str(v) => format!("'{:<8}'", v.replace('\'', "''")),
    }
}

fn format_card(card: &Card) -> Result<String, FitsError> {
    let value = format_value(&card.value);
    let mut line = if is_fixed_format_key(&card.key) {
        format!("{:<8}= {}", card.key, value)
    } else {
        format!("HIERARCH {} = {}", card.key, value)
    };
    if !line.is_ascii() || line.len() > CARD_LEN {
        return Err(FitsError::CardTooLong {
            key: card.key.clone(),
        });
    }

    if let Some(comment) = card.comment.as_deref().filter(|c| !c.is_empty()) {
        line.push_str(" / ");
        line.extend(comment.chars().map(|c| if c.is_ascii() { c } else { '?' }));
        line.truncate(CARD_LEN);
    }
    Ok(format!("{:<80}", line))
}

fn parse_card(text: &str) -> Option<Card> {
    let (key, value_part) = if let Some(rest) = text.strip_prefix("HIERARCH ") {
        let eq = rest.find('=')?;
        (rest[..eq].trim().to_string(), &rest[eq + 1..])
    } else {
        if text.get(8..10) != Some("= ") {
            return None;
        }
        (text[..8].trim().to_string(), &text[10..])
    };
    if key.is_empty() {
        return None;
    }
    let (value, comment) = parse_value(value_part)?;
    Some(Card {
        key,
        value,
        comment,
    })
}

fn parse_value(raw: &str) -> Option<(CardValue, Option<String>)> {
    let raw = raw.trim_start();

    if let Some(body) = raw.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = body.char_indices().peekable();
        let mut end = body.len();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    value.push('\'');
                    chars.next();
                    continue;
                }
                end = i + 1;
                break;
            }
            value.push(c);
        }
        let comment = split_comment(&body[end.min(body.len())..]);
        return Some((CardValue::Str(value.trim_end().to_string()), comment));
    }

    let (token, comment) = match raw.find('/') {
        Some(slash) => (raw[..slash].trim(), split_comment(&raw[slash..])),
        None => (raw.trim(), None),
    };
    let value = match token {
        "" => return None,
        "T" => CardValue::Bool(true),
        "F" => CardValue::Bool(false),
        _ => {
            if let Ok(v) = token.parse::<i64>() {
                CardValue::Int(v)
            } else if let Ok(v) = token.replace('D', "E").parse::<f64>() {
                CardValue::Float(v)
            } else {
                CardValue::Str(token.to_string())
            }
        }
    };
    Some((value, comment))
}

fn split_comment(rest: &str) -> Option<String> {
    let slash = rest.find('/')?;
    let comment = rest[slash + 1..].trim();
    (!comment.is_empty()).then(|| comment.to_string())
}

fn card(key: &str, value: CardValue, comment: &str) -> Card {
    Card {
        key: key.to_string(),
        value,
        comment: (!comment.is_empty()).then(|| comment.to_string()),
    }
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let remainder = bytes.len() % BLOCK_LEN;
    if remainder != 0 {
        bytes.resize(bytes.len() + BLOCK_LEN - remainder, fill);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FitsError {
    FitsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn malformed(path: &Path, reason: &str) -> FitsError {
    FitsError::Malformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_and_payload_survive_a_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2400123o_pp.fits");

        let mut header = Header::new();
        header.set("OBSTYPE", "OBJECT", Some("Observation type"));
        header.set("MJDMID", 59400.512345678, None);
        header.set("NEXP", 4i64, None);
        header.set("QCC_ALL", true, Some("all QC passed"));
        header.set("OBJECT", "Gl 699's twin", None);
        header.set("ESO DPR TYPE", "DARK", None);

        write_fits(&path, &header, b"payload").unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() % BLOCK_LEN, 0);

        let (read, data) = read_fits(&path).unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(read.get_str("OBSTYPE").as_deref(), Some("OBJECT"));
        assert_eq!(read.get_f64("MJDMID"), Some(59400.512345678));
        assert_eq!(read.get("NEXP"), Some(&CardValue::Int(4)));
        assert_eq!(read.get("QCC_ALL"), Some(&CardValue::Bool(true)));
        assert_eq!(read.get_str("OBJECT").as_deref(), Some("Gl 699's twin"));
        assert_eq!(read.get_str("ESO DPR TYPE").as_deref(), Some("DARK"));
        assert_eq!(
            read.card("OBSTYPE").and_then(|c| c.comment.clone()).as_deref(),
            Some("Observation type")
        );
        assert!(!read.contains("SIMPLE"));
        assert!(!read.contains("NAXIS1"));
    }

    #[test]
    fn test_parses_instrument_style_cards() {
        let card = parse_card(&format!("{:<80}", "SBCCAS_P= 'pos_pk  '           / SPIRou Cassegrain Fiber Position"))
            .unwrap();
        assert_eq!(card.key, "SBCCAS_P");
        assert_eq!(card.value, CardValue::Str("pos_pk".into()));
        assert_eq!(card.comment.as_deref(), Some("SPIRou Cassegrain Fiber Position"));

        let card = parse_card(&format!("{:<80}", "EXPTIME =              5.57D+0 / [sec]")).unwrap();
        assert_eq!(card.value, CardValue::Float(5.57));

        let card = parse_card(&format!("{:<80}", "HIERARCH ESO DPR CATG = 'CALIB' / category")).unwrap();
        assert_eq!(card.key, "ESO DPR CATG");
        assert_eq!(card.value, CardValue::Str("CALIB".into()));

        assert!(parse_card(&format!("{:<80}", "COMMENT nothing to see")).is_none());
    }

    #[test]
    fn test_overlong_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut header = Header::new();
        header.set("LONGSTR", "x".repeat(90), None);
        let result = write_fits(&dir.path().join("bad.fits"), &header, &[]);
        assert!(matches!(result, Err(FitsError::CardTooLong { .. })));
    }

    #[test]
    fn test_non_fits_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.fits");
        std::fs::write(&path, vec![b'x'; BLOCK_LEN]).unwrap();
        assert!(matches!(read_header(&path), Err(FitsError::Malformed { .. })));
    }

    #[test]
    fn test_set_replaces_existing_card_in_place() {
        let mut header = Header::new();
        header.set("A", 1i64, None);
        header.set("B", 2i64, None);
        header.set("A", 3i64, None);
        let keys: Vec<&str> = header.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(header.get("A"), Some(&CardValue::Int(3)));
    }
}
