//! Streaming event parser.
//!
//! Parsing is two passes. The scan pass walks the JSON once with a
//! `DeserializeSeed` visitor, validating every field and flattening it into
//! a tagged byte stream (type byte, little-endian length, raw bytes) while
//! counting tags, tag values, and text bytes. The byte stream is always
//! smaller than the source, so one buffer sized to the input suffices. The
//! build pass replays the stream into an event with exact-capacity pools.
//!
//! Unknown keys are skipped structurally at any depth, duplicate keys are
//! rejected, and every failure names the offending field.

use std::borrow::Cow;
use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

use crate::error::{EventField, ParseError};
use crate::event::{extract_tag_refs, Event};
use crate::record::{RelSlice, TextPool};

const TYPE_ID: u8 = 0x01;
const TYPE_PUBKEY: u8 = 0x02;
const TYPE_SIG: u8 = 0x03;
const TYPE_KIND: u8 = 0x04;
const TYPE_CREATED_AT: u8 = 0x05;
const TYPE_CONTENT: u8 = 0x06;
const TYPE_TAG: u8 = 0x07;
const TYPE_TAG_VAL: u8 = 0x08;
const TYPE_LONG: u8 = 0x80;

const FLAG_ID: u8 = 0x01;
const FLAG_PUBKEY: u8 = 0x02;
const FLAG_SIG: u8 = 0x04;
const FLAG_KIND: u8 = 0x08;
const FLAG_CREATED_AT: u8 = 0x10;
const FLAG_CONTENT: u8 = 0x20;
const FLAG_TAGS: u8 = 0x40;
// content and tags default to empty when absent; their flags exist only
// for duplicate detection
const FLAGS_REQUIRED: u8 = FLAG_ID | FLAG_PUBKEY | FLAG_SIG | FLAG_KIND | FLAG_CREATED_AT;

fn write_record(buf: &mut Vec<u8>, ty: u8, value: &[u8]) {
    if value.len() < (1 << 16) {
        buf.push(ty);
        buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    } else {
        buf.push(ty | TYPE_LONG);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    }
    buf.extend_from_slice(value);
}

struct RecordIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<(u8, &'a [u8])> {
        let ty = *self.buf.get(self.pos)?;
        self.pos += 1;
        let len = if ty & TYPE_LONG == 0 {
            let bytes = self.buf.get(self.pos..self.pos + 2)?;
            self.pos += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        } else {
            let bytes = self.buf.get(self.pos..self.pos + 4)?;
            self.pos += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };
        let value = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some((ty & !TYPE_LONG, value))
    }
}

/// Scan-pass output: the flattened byte stream plus the exact sizes the
/// build pass needs.
#[derive(Default)]
struct Scan {
    stream: Vec<u8>,
    num_tags: usize,
    num_tag_values: usize,
    text_len: usize,
    flags: u8,
    err: Option<ParseError>,
}

impl Scan {
    /// Stashes the classified error before surfacing a serde error, so the
    /// driver can report the specific reason instead of a serde string.
    fn fail<E: de::Error>(&mut self, err: ParseError) -> E {
        let message = err.to_string();
        self.err = Some(err);
        E::custom(message)
    }

    fn mark<E: de::Error>(&mut self, flag: u8, field: EventField) -> Result<(), E> {
        if self.flags & flag != 0 {
            return Err(self.fail(ParseError::DuplicateField(field)));
        }
        self.flags |= flag;
        Ok(())
    }
}

/// A JSON string that borrows from the input when it has no escapes.
pub(crate) struct JsonStr<'de>(pub(crate) Cow<'de, str>);

impl<'de> de::Deserialize<'de> for JsonStr<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<JsonStr<'de>, D::Error> {
        struct JsonStrVisitor;

        impl<'de> Visitor<'de> for JsonStrVisitor {
            type Value = JsonStr<'de>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string")
            }

            fn visit_borrowed_str<E>(self, v: &'de str) -> Result<JsonStr<'de>, E> {
                Ok(JsonStr(Cow::Borrowed(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<JsonStr<'de>, E> {
                Ok(JsonStr(Cow::Owned(v.to_owned())))
            }

            fn visit_string<E>(self, v: String) -> Result<JsonStr<'de>, E> {
                Ok(JsonStr(Cow::Owned(v)))
            }
        }

        deserializer.deserialize_str(JsonStrVisitor)
    }
}

struct ScanSeed<'a>(&'a mut Scan);

impl<'de, 'a> DeserializeSeed<'de> for ScanSeed<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(ScanVisitor(self.0))
    }
}

struct ScanVisitor<'a>(&'a mut Scan);

impl<'de, 'a> Visitor<'de> for ScanVisitor<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an event object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let scan = self.0;

        while let Some(key) = map.next_key::<Cow<str>>()? {
            match key.as_ref() {
                "id" => {
                    scan.mark(FLAG_ID, EventField::Id)?;
                    let bytes = hex_value::<32, A>(&mut map, scan, EventField::Id)?;
                    write_record(&mut scan.stream, TYPE_ID, &bytes);
                }
                "pubkey" => {
                    scan.mark(FLAG_PUBKEY, EventField::Pubkey)?;
                    let bytes = hex_value::<32, A>(&mut map, scan, EventField::Pubkey)?;
                    write_record(&mut scan.stream, TYPE_PUBKEY, &bytes);
                }
                "sig" => {
                    scan.mark(FLAG_SIG, EventField::Sig)?;
                    let bytes = hex_value::<64, A>(&mut map, scan, EventField::Sig)?;
                    write_record(&mut scan.stream, TYPE_SIG, &bytes);
                }
                "kind" => {
                    scan.mark(FLAG_KIND, EventField::Kind)?;
                    let value = match map.next_value::<u64>() {
                        Ok(v) if v <= u32::MAX as u64 => v as u32,
                        _ => return Err(scan.fail(ParseError::InvalidField(EventField::Kind))),
                    };
                    write_record(&mut scan.stream, TYPE_KIND, &value.to_le_bytes());
                }
                "created_at" => {
                    scan.mark(FLAG_CREATED_AT, EventField::CreatedAt)?;
                    let value = match map.next_value::<u64>() {
                        Ok(v) => v,
                        Err(_) => {
                            return Err(
                                scan.fail(ParseError::InvalidField(EventField::CreatedAt))
                            )
                        }
                    };
                    write_record(&mut scan.stream, TYPE_CREATED_AT, &value.to_le_bytes());
                }
                "content" => {
                    scan.mark(FLAG_CONTENT, EventField::Content)?;
                    // null content is tolerated as empty
                    let value = match map.next_value::<Option<JsonStr>>() {
                        Ok(v) => v,
                        Err(_) => {
                            return Err(scan.fail(ParseError::InvalidField(EventField::Content)))
                        }
                    };
                    if let Some(JsonStr(s)) = value {
                        scan.text_len += s.len();
                        write_record(&mut scan.stream, TYPE_CONTENT, s.as_bytes());
                    }
                }
                "tags" => {
                    scan.mark(FLAG_TAGS, EventField::Tags)?;
                    map.next_value_seed(TagsSeed(scan))?;
                }
                _ => {
                    // unknown key, skip the whole value
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

fn hex_value<'de, const N: usize, A: MapAccess<'de>>(
    map: &mut A,
    scan: &mut Scan,
    field: EventField,
) -> Result<[u8; N], A::Error> {
    let value = match map.next_value::<JsonStr>() {
        Ok(JsonStr(s)) => s,
        Err(_) => return Err(scan.fail(ParseError::InvalidField(field))),
    };
    let mut bytes = [0u8; N];
    if value.len() != 2 * N || hex::decode_to_slice(value.as_ref(), &mut bytes).is_err() {
        return Err(scan.fail(ParseError::InvalidField(field)));
    }
    Ok(bytes)
}

struct TagsSeed<'a>(&'a mut Scan);

impl<'de, 'a> DeserializeSeed<'de> for TagsSeed<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(TagsVisitor(self.0))
    }
}

struct TagsVisitor<'a>(&'a mut Scan);

impl<'de, 'a> Visitor<'de> for TagsVisitor<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of tags or null")
    }

    // null tags tolerated as no tags
    fn visit_unit<E>(self) -> Result<(), E> {
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while seq.next_element_seed(TagSeed(self.0))?.is_some() {
            self.0.num_tags += 1;
        }
        Ok(())
    }
}

struct TagSeed<'a>(&'a mut Scan);

impl<'de, 'a> DeserializeSeed<'de> for TagSeed<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(TagVisitor(self.0))
    }
}

struct TagVisitor<'a>(&'a mut Scan);

impl<'de, 'a> Visitor<'de> for TagVisitor<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a tag (array of strings)")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let scan = self.0;
        let mut first = true;
        loop {
            let element = match seq.next_element::<JsonStr>() {
                Ok(v) => v,
                Err(_) => return Err(scan.fail(ParseError::InvalidField(EventField::Tags))),
            };
            let Some(JsonStr(value)) = element else { break };
            let ty = if first { TYPE_TAG } else { TYPE_TAG_VAL };
            write_record(&mut scan.stream, ty, value.as_bytes());
            scan.text_len += value.len();
            scan.num_tag_values += 1;
            first = false;
        }
        if first {
            // an empty tag carries no type marker
            return Err(scan.fail(ParseError::InvalidField(EventField::Tags)));
        }
        Ok(())
    }
}

fn build_event(scan: &Scan) -> Event {
    let mut event = Event {
        text: TextPool::with_capacity(scan.text_len),
        tags: Vec::with_capacity(scan.num_tags),
        tag_values: Vec::with_capacity(scan.num_tag_values),
        ..Event::default()
    };

    for (ty, value) in (RecordIter {
        buf: &scan.stream,
        pos: 0,
    }) {
        match ty {
            TYPE_ID if value.len() == 32 => event.id.0.copy_from_slice(value),
            TYPE_PUBKEY if value.len() == 32 => event.pubkey.0.copy_from_slice(value),
            TYPE_SIG if value.len() == 64 => event.sig.0.copy_from_slice(value),
            TYPE_KIND if value.len() == 4 => {
                event.kind = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            }
            TYPE_CREATED_AT if value.len() == 8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(value);
                event.created_at = u64::from_le_bytes(bytes);
            }
            TYPE_CONTENT => {
                event.content = event.text.push_bytes(value);
            }
            TYPE_TAG => {
                event.tags.push(RelSlice {
                    start: event.tag_values.len() as u32,
                    len: 1,
                });
                let handle = event.text.push_bytes(value);
                event.tag_values.push(handle);
            }
            TYPE_TAG_VAL => {
                if let Some(row) = event.tags.last_mut() {
                    row.len += 1;
                    let handle = event.text.push_bytes(value);
                    event.tag_values.push(handle);
                }
            }
            _ => {}
        }
    }

    extract_tag_refs(&mut event);
    event
}

fn first_missing_field(flags: u8) -> EventField {
    for (flag, field) in [
        (FLAG_ID, EventField::Id),
        (FLAG_PUBKEY, EventField::Pubkey),
        (FLAG_KIND, EventField::Kind),
        (FLAG_CREATED_AT, EventField::CreatedAt),
        (FLAG_SIG, EventField::Sig),
    ] {
        if flags & flag == 0 {
            return field;
        }
    }
    EventField::Id
}

/// Parses one serialized event. The result is structurally sound but not
/// yet validated; run [`crate::event::validate`] on it.
pub fn event_parse(input: &str) -> Result<Event, ParseError> {
    let mut scan = Scan {
        // the flattened stream is strictly smaller than its JSON source
        stream: Vec::with_capacity(input.len()),
        ..Scan::default()
    };

    let mut deserializer = serde_json::Deserializer::from_str(input);
    let outcome = ScanSeed(&mut scan)
        .deserialize(&mut deserializer)
        .and_then(|_| deserializer.end());

    if outcome.is_err() {
        return Err(scan.err.take().unwrap_or(ParseError::InvalidJson));
    }
    if scan.flags & FLAGS_REQUIRED != FLAGS_REQUIRED {
        return Err(ParseError::MissingField(first_missing_field(scan.flags)));
    }

    Ok(build_event(&scan))
}
