//! Content tokenizer.
//!
//! Splits event content into text spans, URLs, hashtags, `#[n]` mentions,
//! and `nostr:` entities. Token spans are handles into the event's own text
//! pool, so a tokenized event stays relocatable. Special tokens only start
//! at the beginning of the content or right after whitespace; everything
//! else accumulates into text tokens.

use crate::entity::Entity;
use crate::event::Event;
use crate::record::RelStr;

/// One token of event content. Spans resolve through [`Event::span`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentToken {
    Text(RelStr),
    Url(RelStr),
    /// Span excludes the leading `#`.
    Hashtag(RelStr),
    /// A `#[n]` reference to the event's tag table.
    Mention { span: RelStr, tag_index: u32 },
    /// A `nostr:` entity; the index points into the event's entity table.
    Entity { span: RelStr, entity_index: u32 },
}

const URL_TRAILING_STRIP: &[u8] = b"!?).,;";

/// Tokenizes the event's content in place. Runs after decryption for
/// direct messages, directly for plain events.
pub fn parse_content(event: &mut Event) {
    let base = event.content.off;
    let content = event.content().to_owned();
    let (tokens, entities) = tokenize(&content, base);
    event.set_tokens(tokens, entities);
}

fn tokenize(content: &str, base: u32) -> (Vec<ContentToken>, Vec<Entity>) {
    let mut tokens = Vec::new();
    let mut entities = Vec::new();
    let bytes = content.as_bytes();

    let span = |start: usize, end: usize| RelStr {
        off: base + start as u32,
        len: (end - start) as u32,
    };

    let mut text_start = 0usize;
    let mut pos = 0usize;

    while pos < bytes.len() {
        let at_boundary = pos == 0 || bytes[pos - 1].is_ascii_whitespace();
        if !at_boundary {
            pos += 1;
            continue;
        }

        let matched = match bytes[pos] {
            b'#' => parse_mention(content, pos)
                .map(|(end, tag_index)| {
                    (
                        end,
                        ContentToken::Mention {
                            span: span(pos, end),
                            tag_index,
                        },
                    )
                })
                .or_else(|| {
                    parse_hashtag(content, pos)
                        .map(|end| (end, ContentToken::Hashtag(span(pos + 1, end))))
                }),
            b'h' | b'H' => {
                parse_url(content, pos).map(|end| (end, ContentToken::Url(span(pos, end))))
            }
            b'n' => parse_entity(content, pos).map(|(end, entity)| {
                entities.push(entity);
                (
                    end,
                    ContentToken::Entity {
                        span: span(pos, end),
                        entity_index: (entities.len() - 1) as u32,
                    },
                )
            }),
            _ => None,
        };

        match matched {
            Some((end, token)) => {
                if pos > text_start {
                    tokens.push(ContentToken::Text(span(text_start, pos)));
                }
                tokens.push(token);
                pos = end;
                text_start = end;
            }
            None => pos += 1,
        }
    }

    if bytes.len() > text_start {
        tokens.push(ContentToken::Text(span(text_start, bytes.len())));
    }

    (tokens, entities)
}

/// `#[n]` with one to three digits.
fn parse_mention(content: &str, pos: usize) -> Option<(usize, u32)> {
    let rest = content.get(pos..)?.as_bytes();
    if rest.len() < 4 || rest[0] != b'#' || rest[1] != b'[' {
        return None;
    }
    let mut index = 0u32;
    let mut digits = 0usize;
    for &byte in &rest[2..] {
        if byte.is_ascii_digit() && digits < 3 {
            index = index * 10 + (byte - b'0') as u32;
            digits += 1;
        } else if byte == b']' && digits > 0 {
            return Some((pos + 2 + digits + 1, index));
        } else {
            return None;
        }
    }
    None
}

/// `#` followed by at least one alphanumeric char; stops at the first
/// non-alphanumeric boundary.
fn parse_hashtag(content: &str, pos: usize) -> Option<usize> {
    let rest = content.get(pos + 1..)?;
    let mut end = pos + 1;
    for (offset, ch) in rest.char_indices() {
        if ch.is_alphanumeric() {
            end = pos + 1 + offset + ch.len_utf8();
        } else {
            break;
        }
    }
    (end > pos + 1).then_some(end)
}

/// `http://` or `https://` up to the next whitespace, with trailing
/// punctuation stripped.
fn parse_url(content: &str, pos: usize) -> Option<usize> {
    let rest = content.get(pos..)?;
    let lower_len = {
        let rest_bytes = rest.as_bytes();
        if rest_bytes.len() >= 4 && rest_bytes[..4].eq_ignore_ascii_case(b"http") {
            if rest_bytes.len() >= 5 && rest_bytes[4].eq_ignore_ascii_case(&b's') {
                5
            } else {
                4
            }
        } else {
            return None;
        }
    };
    if !rest.as_bytes().get(lower_len..lower_len + 3)?.eq(b"://") {
        return None;
    }

    let mut end = pos + lower_len + 3;
    for &byte in content.as_bytes().get(end..).unwrap_or(&[]) {
        if byte.is_ascii_whitespace() {
            break;
        }
        end += 1;
    }

    while end > pos + lower_len + 3 && URL_TRAILING_STRIP.contains(&content.as_bytes()[end - 1]) {
        end -= 1;
    }
    Some(end)
}

/// `nostr:` followed by a bech32 run that actually decodes.
fn parse_entity(content: &str, pos: usize) -> Option<(usize, Entity)> {
    let rest = content.get(pos..)?;
    if !rest.starts_with("nostr:") {
        return None;
    }

    let run_start = pos + 6;
    let mut end = run_start;
    for &byte in content.as_bytes().get(run_start..).unwrap_or(&[]) {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            end += 1;
        } else {
            break;
        }
    }
    if end == run_start {
        return None;
    }

    let entity = Entity::decode(&content[run_start..end]).ok()?;
    Some((end, entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::entity::EntityKind;
    use crate::keys::Pubkey;

    fn tokenized(content: &str) -> Event {
        let mut event = EventBuilder::new().content(content).build();
        parse_content(&mut event);
        event
    }

    fn token_text(event: &Event, token: &ContentToken) -> String {
        let span = match token {
            ContentToken::Text(span)
            | ContentToken::Url(span)
            | ContentToken::Hashtag(span)
            | ContentToken::Mention { span, .. }
            | ContentToken::Entity { span, .. } => *span,
        };
        event.span(span).to_owned()
    }

    #[test]
    fn mixed_content_scenario() {
        let event = tokenized("check #[0] and https://example.com/a.");
        let tokens = event.tokens();
        assert_eq!(tokens.len(), 5);

        assert!(matches!(tokens[0], ContentToken::Text(_)));
        assert_eq!(token_text(&event, &tokens[0]), "check ");

        match tokens[1] {
            ContentToken::Mention { tag_index, .. } => assert_eq!(tag_index, 0),
            other => panic!("wrong token: {:?}", other),
        }
        assert_eq!(token_text(&event, &tokens[1]), "#[0]");

        assert_eq!(token_text(&event, &tokens[2]), " and ");

        assert!(matches!(tokens[3], ContentToken::Url(_)));
        assert_eq!(token_text(&event, &tokens[3]), "https://example.com/a");

        // the stripped period stays behind as text
        assert_eq!(token_text(&event, &tokens[4]), ".");
    }

    #[test]
    fn hashtag_excludes_the_hash() {
        let event = tokenized("tagged #nostr!");
        let tokens = event.tokens();
        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[1], ContentToken::Hashtag(_)));
        assert_eq!(token_text(&event, &tokens[1]), "nostr");
        assert_eq!(token_text(&event, &tokens[2]), "!");
    }

    #[test]
    fn url_requires_a_boundary() {
        let event = tokenized("ahttps://example.com");
        assert_eq!(event.tokens().len(), 1);
        assert!(matches!(event.tokens()[0], ContentToken::Text(_)));
    }

    #[test]
    fn url_scheme_is_case_insensitive() {
        let event = tokenized("HTTPS://example.com done");
        assert!(matches!(event.tokens()[0], ContentToken::Url(_)));
        assert_eq!(token_text(&event, &event.tokens()[0]), "HTTPS://example.com");
    }

    #[test]
    fn entity_token_decodes() {
        let npub = Entity::npub(Pubkey([0x5a; 32])).encode().unwrap();
        let event = tokenized(&format!("meet nostr:{npub} ok"));
        let tokens = event.tokens();

        let entity_token = tokens
            .iter()
            .find(|t| matches!(t, ContentToken::Entity { .. }))
            .copied()
            .unwrap();
        match entity_token {
            ContentToken::Entity { entity_index, .. } => {
                let entity = &event.entities()[entity_index as usize];
                assert_eq!(entity.kind, EntityKind::Npub);
                assert_eq!(entity.pubkey, Some(Pubkey([0x5a; 32])));
            }
            _ => unreachable!(),
        }
        assert_eq!(token_text(&event, &entity_token), format!("nostr:{npub}"));
    }

    #[test]
    fn undecodable_entity_falls_back_to_text() {
        let event = tokenized("see nostr:notanentity1 here");
        assert!(event
            .tokens()
            .iter()
            .all(|t| matches!(t, ContentToken::Text(_))));
        assert!(event.entities().is_empty());
    }

    #[test]
    fn mention_needs_digits_and_bracket() {
        let event = tokenized("#[] #[12345] #[7]");
        let mentions: Vec<_> = event
            .tokens()
            .iter()
            .filter(|t| matches!(t, ContentToken::Mention { .. }))
            .collect();
        assert_eq!(mentions.len(), 1);
        match mentions[0] {
            ContentToken::Mention { tag_index, .. } => assert_eq!(*tag_index, 7),
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_content_has_no_tokens() {
        let event = tokenized("");
        assert!(event.tokens().is_empty());
    }
}
