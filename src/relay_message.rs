//! Parser for inbound relay messages.
//!
//! Relay messages are JSON arrays tagged by their first element. The event
//! inside an `EVENT` message is captured as a raw substring and handed to
//! the event parser separately, so a bad event cannot fail the framing.

use std::borrow::Cow;
use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ParseError;
use crate::keys::EventId;
use crate::parse::JsonStr;

/// Longest subscription id the engine will accept.
pub const SUB_ID_MAX_LEN: usize = 64;

/// One parsed relay-to-client message.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayMessage<'a> {
    Auth {
        challenge: Cow<'a, str>,
    },
    Count {
        subscription_id: Cow<'a, str>,
        count: u64,
    },
    Eose {
        subscription_id: Cow<'a, str>,
    },
    Event {
        subscription_id: Cow<'a, str>,
        /// The raw JSON of the embedded event, unparsed.
        event_json: &'a str,
    },
    Notice {
        message: Cow<'a, str>,
    },
    Ok {
        event_id: EventId,
        accepted: bool,
        message: Cow<'a, str>,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CountPayload {
    count: u64,
}

struct MessageSeed<'a> {
    err: &'a mut Option<ParseError>,
}

impl<'a> MessageSeed<'a> {
    fn fail<E: de::Error>(&mut self, err: ParseError) -> E {
        let message = err.to_string();
        *self.err = Some(err);
        E::custom(message)
    }

    fn next_str<'de, A: SeqAccess<'de>>(
        &mut self,
        seq: &mut A,
    ) -> Result<Cow<'de, str>, A::Error> {
        match seq.next_element::<JsonStr>() {
            Ok(Some(JsonStr(s))) => Ok(s),
            _ => Err(self.fail(ParseError::UnexpectedShape)),
        }
    }

    fn next_sub_id<'de, A: SeqAccess<'de>>(
        &mut self,
        seq: &mut A,
    ) -> Result<Cow<'de, str>, A::Error> {
        let sub_id = self.next_str(seq)?;
        if sub_id.len() > SUB_ID_MAX_LEN {
            return Err(self.fail(ParseError::SubscriptionIdTooLong));
        }
        Ok(sub_id)
    }
}

impl<'de, 'a> DeserializeSeed<'de> for MessageSeed<'a> {
    type Value = RelayMessage<'de>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<RelayMessage<'de>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'a> Visitor<'de> for MessageSeed<'a> {
    type Value = RelayMessage<'de>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a relay message array")
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut seq: A) -> Result<RelayMessage<'de>, A::Error> {
        let tag = self.next_str(&mut seq)?;

        let message = match tag.as_ref() {
            "AUTH" => RelayMessage::Auth {
                challenge: self.next_str(&mut seq)?,
            },
            "COUNT" => {
                let subscription_id = self.next_sub_id(&mut seq)?;
                let payload = match seq.next_element::<CountPayload>() {
                    Ok(Some(p)) => p,
                    _ => return Err(self.fail(ParseError::UnexpectedShape)),
                };
                RelayMessage::Count {
                    subscription_id,
                    count: payload.count,
                }
            }
            "EOSE" => RelayMessage::Eose {
                subscription_id: self.next_sub_id(&mut seq)?,
            },
            "EVENT" => {
                let subscription_id = self.next_sub_id(&mut seq)?;
                let raw = match seq.next_element::<&RawValue>() {
                    Ok(Some(raw)) => raw,
                    _ => return Err(self.fail(ParseError::UnexpectedShape)),
                };
                RelayMessage::Event {
                    subscription_id,
                    event_json: raw.get(),
                }
            }
            "NOTICE" => RelayMessage::Notice {
                message: self.next_str(&mut seq)?,
            },
            "OK" => {
                let id_hex = self.next_str(&mut seq)?;
                let Some(event_id) = EventId::from_hex(&id_hex) else {
                    return Err(self.fail(ParseError::InvalidEventId));
                };
                let accepted = match seq.next_element::<bool>() {
                    Ok(Some(b)) => b,
                    _ => return Err(self.fail(ParseError::UnexpectedShape)),
                };
                RelayMessage::Ok {
                    event_id,
                    accepted,
                    message: self.next_str(&mut seq)?,
                }
            }
            _ => return Err(self.fail(ParseError::UnknownMessageType)),
        };

        // trailing elements are ignored
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(message)
    }
}

/// Parses one relay message frame.
pub fn relay_message_parse(input: &str) -> Result<RelayMessage<'_>, ParseError> {
    let mut err = None;
    let mut deserializer = serde_json::Deserializer::from_str(input);
    let outcome = MessageSeed { err: &mut err }
        .deserialize(&mut deserializer)
        .and_then(|message| {
            deserializer.end()?;
            Ok(message)
        });

    outcome.map_err(|_| err.take().unwrap_or(ParseError::InvalidJson))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth() {
        let parsed = relay_message_parse(r#"["AUTH","challenge-string"]"#).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Auth {
                challenge: "challenge-string".into()
            }
        );
    }

    #[test]
    fn parses_count() {
        let parsed = relay_message_parse(r#"["COUNT","sub1",{"count":42}]"#).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Count {
                subscription_id: "sub1".into(),
                count: 42
            }
        );
    }

    #[test]
    fn count_rejects_unknown_payload_keys() {
        let result = relay_message_parse(r#"["COUNT","sub1",{"count":42,"extra":1}]"#);
        assert_eq!(result, Err(ParseError::UnexpectedShape));
    }

    #[test]
    fn parses_eose() {
        let parsed = relay_message_parse(r#"["EOSE","sub1"]"#).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Eose {
                subscription_id: "sub1".into()
            }
        );
    }

    #[test]
    fn event_captures_raw_substring() {
        let input = r#"["EVENT","sub1",{"kind":1,"content":"x","tags":[]}]"#;
        let parsed = relay_message_parse(input).unwrap();
        match parsed {
            RelayMessage::Event {
                subscription_id,
                event_json,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event_json, r#"{"kind":1,"content":"x","tags":[]}"#);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn parses_notice_and_ok() {
        let parsed = relay_message_parse(r#"["NOTICE","slow down"]"#).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Notice {
                message: "slow down".into()
            }
        );

        let id_hex = "ef".repeat(32);
        let input = format!(r#"["OK","{id_hex}",true,"stored"]"#);
        let parsed = relay_message_parse(&input).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Ok {
                event_id: EventId::from_hex(&id_hex).unwrap(),
                accepted: true,
                message: "stored".into()
            }
        );
    }

    #[test]
    fn ok_rejects_bad_event_id() {
        let result = relay_message_parse(r#"["OK","nothex",true,"msg"]"#);
        assert_eq!(result, Err(ParseError::InvalidEventId));
    }

    #[test]
    fn rejects_unknown_type_and_shape() {
        assert_eq!(
            relay_message_parse(r#"["PING"]"#),
            Err(ParseError::UnknownMessageType)
        );
        assert_eq!(
            relay_message_parse(r#"{"not":"an array"}"#),
            Err(ParseError::InvalidJson)
        );
        assert_eq!(
            relay_message_parse(r#"["EOSE"]"#),
            Err(ParseError::UnexpectedShape)
        );
    }

    #[test]
    fn bounds_subscription_ids() {
        let long_id = "s".repeat(SUB_ID_MAX_LEN + 1);
        let input = format!(r#"["EOSE","{long_id}"]"#);
        assert_eq!(
            relay_message_parse(&input),
            Err(ParseError::SubscriptionIdTooLong)
        );
    }

    #[test]
    fn ignores_trailing_elements() {
        let parsed = relay_message_parse(r#"["EOSE","sub1","extra",42]"#).unwrap();
        assert_eq!(
            parsed,
            RelayMessage::Eose {
                subscription_id: "sub1".into()
            }
        );
    }
}
