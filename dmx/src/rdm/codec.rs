// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Format-string driven parameter-data codec.
//!
//! Every registered PID carries a request and a response format string
//! (`"bb$"`, `"b$"`, `"w$"`, `"bwa"`, ...) describing the layout of its
//! parameter data. `b`/`w`/`d` are big-endian byte/word/dword fields, `u` is
//! a 6-byte UID, `a` is ASCII running to the end of the PDL, and `x` is a
//! reserved byte that is consumed but not surfaced. A trailing `$` means
//! the format is fixed-length and must consume the buffer exactly;
//! omitting it allows the fields before it to repeat for as long as data
//! remains, producing a list of records (used by parameters like
//! SUPPORTED_PARAMETERS that return an array of same-shaped entries).

use crate::uid::Uid;
use heapless::{String, Vec};

pub const MAX_FIELDS_PER_RECORD: usize = 8;
pub const MAX_RECORDS: usize = 40;
pub const MAX_ASCII_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FormatError {
    UnknownLetter,
    TooManyFields,
    BufferTooShort,
    TrailingBytes,
    TooManyRecords,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Byte(u8),
    Word(u16),
    Dword(u32),
    Uid(Uid),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Letter {
    Byte,
    Word,
    Dword,
    Uid,
    Ascii,
    Reserved,
}

fn parse(format: &str) -> Result<(Vec<Letter, MAX_FIELDS_PER_RECORD>, bool), FormatError> {
    let mut letters = Vec::new();
    let mut fixed = false;
    for (i, c) in format.chars().enumerate() {
        let letter = match c {
            'b' => Letter::Byte,
            'w' => Letter::Word,
            'd' => Letter::Dword,
            'u' => Letter::Uid,
            'a' => Letter::Ascii,
            'x' => Letter::Reserved,
            '$' if i == format.len() - 1 => {
                fixed = true;
                continue;
            }
            _ => return Err(FormatError::UnknownLetter),
        };
        letters.push(letter).map_err(|_| FormatError::TooManyFields)?;
    }
    Ok((letters, fixed))
}

fn letter_size(letter: Letter, remaining: usize) -> usize {
    match letter {
        Letter::Byte | Letter::Reserved => 1,
        Letter::Word => 2,
        Letter::Dword => 4,
        Letter::Uid => 6,
        Letter::Ascii => remaining,
    }
}

/// A single decoded record: one pass through the format's fields.
pub type Record = Vec<FieldValue, MAX_FIELDS_PER_RECORD>;

/// Decodes `buf` against `format`, producing one or more records. A
/// non-`$`-terminated format repeats until the buffer is exhausted.
pub fn decode(format: &str, buf: &[u8]) -> Result<Vec<Record, MAX_RECORDS>, FormatError> {
    let (letters, fixed) = parse(format)?;
    let mut records = Vec::new();
    let mut pos = 0;
    loop {
        if pos == buf.len() {
            break;
        }
        let mut record = Record::new();
        for (i, &letter) in letters.iter().enumerate() {
            let remaining = buf.len() - pos;
            let is_last_field = i == letters.len() - 1;
            let size = if letter == Letter::Ascii && !is_last_field {
                return Err(FormatError::UnknownLetter);
            } else {
                letter_size(letter, remaining)
            };
            if size > remaining {
                return Err(FormatError::BufferTooShort);
            }
            let field = &buf[pos..pos + size];
            let value = match letter {
                Letter::Byte => FieldValue::Byte(field[0]),
                Letter::Word => FieldValue::Word(u16::from_be_bytes([field[0], field[1]])),
                Letter::Dword => FieldValue::Dword(u32::from_be_bytes(field.try_into().unwrap())),
                Letter::Uid => FieldValue::Uid(Uid::from_be_bytes(field.try_into().unwrap())),
                Letter::Reserved => {
                    pos += size;
                    continue;
                }
                Letter::Ascii => {
                    // ASCII fields aren't surfaced as a FieldValue (no fixed
                    // capacity large enough for every parameter); callers
                    // needing the text use `decode_ascii_tail` instead.
                    pos += size;
                    continue;
                }
            };
            record.push(value).map_err(|_| FormatError::TooManyFields)?;
            pos += size;
        }
        records.push(record).map_err(|_| FormatError::TooManyRecords)?;
        if fixed {
            break;
        }
    }
    if pos != buf.len() {
        return Err(FormatError::TrailingBytes);
    }
    Ok(records)
}

/// Decodes the ASCII tail of a format ending in `a` (e.g. `"bwa"`), since
/// [`decode`] can't return a variable-length string through a fixed-size
/// [`FieldValue`].
pub fn decode_ascii_tail(format: &str, buf: &[u8]) -> Result<String<MAX_ASCII_LEN>, FormatError> {
    let (letters, _) = parse(format)?;
    if letters.last() != Some(&Letter::Ascii) {
        return Err(FormatError::UnknownLetter);
    }
    let mut pos = 0;
    for &letter in &letters[..letters.len() - 1] {
        pos += letter_size(letter, buf.len() - pos);
    }
    if pos > buf.len() {
        return Err(FormatError::BufferTooShort);
    }
    let tail = &buf[pos..];
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len()).min(MAX_ASCII_LEN);
    let mut s = String::new();
    for &b in &tail[..len] {
        s.push(b as char).map_err(|_| FormatError::BufferTooShort)?;
    }
    Ok(s)
}

/// Encodes a single record against `format` into `out`, returning the
/// number of bytes written. ASCII fields, if present, must be the last
/// field and are taken from `ascii`.
pub fn encode(format: &str, fields: &[FieldValue], ascii: &str, out: &mut [u8]) -> Result<usize, FormatError> {
    let (letters, _) = parse(format)?;
    let mut pos = 0;
    let mut field_idx = 0;
    for (i, &letter) in letters.iter().enumerate() {
        let is_last = i == letters.len() - 1;
        match letter {
            Letter::Byte => {
                let FieldValue::Byte(v) = fields[field_idx] else { return Err(FormatError::UnknownLetter) };
                out[pos] = v;
                pos += 1;
                field_idx += 1;
            }
            Letter::Word => {
                let FieldValue::Word(v) = fields[field_idx] else { return Err(FormatError::UnknownLetter) };
                out[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
                pos += 2;
                field_idx += 1;
            }
            Letter::Dword => {
                let FieldValue::Dword(v) = fields[field_idx] else { return Err(FormatError::UnknownLetter) };
                out[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
                pos += 4;
                field_idx += 1;
            }
            Letter::Uid => {
                let FieldValue::Uid(v) = fields[field_idx] else { return Err(FormatError::UnknownLetter) };
                out[pos..pos + 6].copy_from_slice(&v.to_be_bytes());
                pos += 6;
                field_idx += 1;
            }
            Letter::Reserved => {
                out[pos] = 0;
                pos += 1;
            }
            Letter::Ascii => {
                if !is_last {
                    return Err(FormatError::UnknownLetter);
                }
                let bytes = ascii.as_bytes();
                out[pos..pos + bytes.len()].copy_from_slice(bytes);
                pos += bytes.len();
            }
        }
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fixed_word_field() {
        // DMX_START_ADDRESS response format "w$".
        let records = decode("w$", &[0x00, 0x64]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][0], FieldValue::Word(100));
    }

    #[test]
    fn rejects_trailing_bytes_on_fixed_format() {
        assert_eq!(decode("b$", &[1, 2]), Err(FormatError::TrailingBytes));
    }

    #[test]
    fn repeats_unterminated_format_across_buffer() {
        // Three repeated byte pairs, no '$'.
        let records = decode("bb", &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2][0], FieldValue::Byte(5));
        assert_eq!(records[2][1], FieldValue::Byte(6));
    }

    #[test]
    fn decodes_ascii_tail() {
        let mut buf = Vec::<u8, 64>::new();
        buf.extend_from_slice(&[1, 0, 4]).unwrap();
        buf.extend_from_slice(b"Dimmer").unwrap();
        let text = decode_ascii_tail("bwa", &buf).unwrap();
        assert_eq!(text.as_str(), "Dimmer");
    }

    #[test]
    fn encode_round_trips_with_decode() {
        let fields = [FieldValue::Byte(1), FieldValue::Word(512)];
        let mut out = [0u8; 3];
        let len = encode("bw$", &fields, "", &mut out).unwrap();
        assert_eq!(len, 3);
        let records = decode("bw$", &out).unwrap();
        assert_eq!(records[0].as_slice(), &fields);
    }
}
