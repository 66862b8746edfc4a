//! Profile records parsed from kind-0 event content.
//!
//! The content parser is deliberately tolerant: unknown keys are skipped at
//! any depth and a known key with a non-string value is ignored rather than
//! rejected, because profiles in the wild carry all sorts of junk.

use std::borrow::Cow;
use std::fmt;

use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

use crate::error::ParseError;
use crate::event::{Event, KIND_PROFILE};
use crate::keys::{EventId, Pubkey};
use crate::record::{RelStr, TextPool};

/// A user profile. One relocatable record per pubkey; replacement is
/// wholesale, never field-by-field.
#[derive(Clone, Debug)]
pub struct Profile {
    pub pubkey: Pubkey,
    pub event_id: EventId,
    pub created_at: u64,
    name: Option<RelStr>,
    display_name: Option<RelStr>,
    picture: Option<RelStr>,
    website: Option<RelStr>,
    banner: Option<RelStr>,
    nip05: Option<RelStr>,
    about: Option<RelStr>,
    lud16: Option<RelStr>,
    text: TextPool,
}

macro_rules! field_accessor {
    ($name:ident) => {
        pub fn $name(&self) -> Option<&str> {
            self.$name.map(|handle| handle.get(&self.text))
        }
    };
}

impl Profile {
    field_accessor!(name);
    field_accessor!(display_name);
    field_accessor!(picture);
    field_accessor!(website);
    field_accessor!(banner);
    field_accessor!(nip05);
    field_accessor!(about);
    field_accessor!(lud16);

    /// The best available display string for this profile.
    pub fn display(&self) -> Option<&str> {
        self.display_name().or_else(|| self.name())
    }
}

/// A JSON value reduced to "a string, or something we ignore".
struct LenientStr<'de>(Option<Cow<'de, str>>);

impl<'de> Deserialize<'de> for LenientStr<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<LenientStr<'de>, D::Error> {
        struct LenientVisitor;

        impl<'de> Visitor<'de> for LenientVisitor {
            type Value = LenientStr<'de>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_borrowed_str<E>(self, v: &'de str) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(Some(Cow::Borrowed(v))))
            }

            fn visit_str<E>(self, v: &str) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(Some(Cow::Owned(v.to_owned()))))
            }

            fn visit_string<E>(self, v: String) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(Some(Cow::Owned(v))))
            }

            fn visit_bool<E>(self, _: bool) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(None))
            }

            fn visit_i64<E>(self, _: i64) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(None))
            }

            fn visit_u64<E>(self, _: u64) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(None))
            }

            fn visit_f64<E>(self, _: f64) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(None))
            }

            fn visit_unit<E>(self) -> Result<LenientStr<'de>, E> {
                Ok(LenientStr(None))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<LenientStr<'de>, A::Error> {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(LenientStr(None))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<LenientStr<'de>, A::Error> {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(LenientStr(None))
            }
        }

        deserializer.deserialize_any(LenientVisitor)
    }
}

#[derive(Default)]
struct ProfileFields<'de> {
    name: Option<Cow<'de, str>>,
    display_name: Option<Cow<'de, str>>,
    picture: Option<Cow<'de, str>>,
    website: Option<Cow<'de, str>>,
    banner: Option<Cow<'de, str>>,
    nip05: Option<Cow<'de, str>>,
    about: Option<Cow<'de, str>>,
    lud16: Option<Cow<'de, str>>,
}

impl<'de> Deserialize<'de> for ProfileFields<'de> {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<ProfileFields<'de>, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = ProfileFields<'de>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a profile object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<ProfileFields<'de>, A::Error> {
                let mut fields = ProfileFields::default();
                while let Some(key) = map.next_key::<Cow<str>>()? {
                    let slot = match key.as_ref() {
                        "name" => &mut fields.name,
                        "display_name" => &mut fields.display_name,
                        "picture" => &mut fields.picture,
                        "website" => &mut fields.website,
                        "banner" => &mut fields.banner,
                        "nip05" => &mut fields.nip05,
                        "about" => &mut fields.about,
                        "lud16" => &mut fields.lud16,
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                            continue;
                        }
                    };
                    if let LenientStr(Some(value)) = map.next_value::<LenientStr>()? {
                        *slot = Some(value);
                    }
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// Parses a profile record from a kind-0 event's content.
pub fn profile_parse(event: &Event) -> Result<Profile, ParseError> {
    if event.kind != KIND_PROFILE {
        return Err(ParseError::UnexpectedShape);
    }

    let fields: ProfileFields =
        serde_json::from_str(event.content()).map_err(|_| ParseError::InvalidJson)?;

    // sizing pass over the collected fields
    let text_len = [
        &fields.name,
        &fields.display_name,
        &fields.picture,
        &fields.website,
        &fields.banner,
        &fields.nip05,
        &fields.about,
        &fields.lud16,
    ]
    .iter()
    .filter_map(|f| f.as_deref())
    .map(str::len)
    .sum();

    let mut text = TextPool::with_capacity(text_len);
    let mut push = |value: &Option<Cow<str>>| value.as_deref().map(|s| text.push_str(s));

    let name = push(&fields.name);
    let display_name = push(&fields.display_name);
    let picture = push(&fields.picture);
    let website = push(&fields.website);
    let banner = push(&fields.banner);
    let nip05 = push(&fields.nip05);
    let about = push(&fields.about);
    let lud16 = push(&fields.lud16);

    Ok(Profile {
        pubkey: event.pubkey,
        event_id: event.id,
        created_at: event.created_at,
        name,
        display_name,
        picture,
        website,
        banner,
        nip05,
        about,
        lud16,
        text,
    })
}
