//! Content sanitizer: untrusted message content in, canonical
//! `SanitizedContent` or a tagged content error out. Pure and deterministic —
//! no I/O, callable outside any transaction, and safe to re-run idempotently
//! (sanitizing already-sanitized content yields the same content back).

use serde_json::Value;

use crate::error::ChitterError;
use crate::ids::AttachmentId;
use crate::model::{Embed, Facet, FacetType, SanitizedContent};

pub fn sanitize(input: &Value) -> Result<SanitizedContent, ChitterError> {
    let obj = input
        .as_object()
        .ok_or(ChitterError::InvalidContentStructure)?;

    let text = obj
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if text.is_empty() {
        return Err(ChitterError::InvalidTextContent);
    }
    let text_len = text.chars().count() as u64;

    let facets = match obj.get("facets") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|facet| coerce_and_validate_facet(facet, text_len))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) | None => Vec::new(),
    };

    let embed = match obj.get("embed") {
        Some(Value::Object(fields)) => Some(build_embed(fields)?),
        Some(Value::Null) | None => None,
        Some(_) => return Err(ChitterError::InvalidEmbed),
    };

    let attachment_ids = match obj.get("attachmentIds") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|s| s.parse::<uuid::Uuid>().ok())
            .map(AttachmentId)
            .collect(),
        Some(_) | None => Vec::new(),
    };

    Ok(SanitizedContent {
        text,
        facets,
        embed,
        attachment_ids,
    })
}

fn coerce_and_validate_facet(
    facet: &serde_json::Map<String, Value>,
    text_len: u64,
) -> Result<Facet, ChitterError> {
    let kind = match facet.get("type").and_then(Value::as_str) {
        Some("mention") => FacetType::Mention,
        Some("link") => FacetType::Link,
        Some("code") => FacetType::Code,
        _ => return Err(ChitterError::InvalidFacet),
    };

    let start = facet
        .get("start")
        .and_then(Value::as_u64)
        .ok_or(ChitterError::InvalidFacet)?;
    let end = facet
        .get("end")
        .and_then(Value::as_u64)
        .ok_or(ChitterError::InvalidFacet)?;
    if !(start < end && end <= text_len) {
        return Err(ChitterError::InvalidFacet);
    }

    let value = match facet.get("value") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(_) => return Err(ChitterError::InvalidFacet),
    };

    Ok(Facet {
        kind,
        start: start as u32,
        end: end as u32,
        value,
    })
}

fn build_embed(fields: &serde_json::Map<String, Value>) -> Result<Embed, ChitterError> {
    let has_message_shape = fields.contains_key("messageId") && fields.contains_key("roomId");
    let has_external_shape =
        fields.contains_key("uri") && fields.contains_key("title") && fields.contains_key("description");

    if has_message_shape {
        let allowed: &[&str] = &["messageId", "roomId"];
        if fields.keys().any(|k| !allowed.contains(&k.as_str())) {
            return Err(ChitterError::InvalidEmbed);
        }
        let message_id = fields
            .get("messageId")
            .and_then(Value::as_str)
            .filter(|s| uuid::Uuid::parse_str(s).is_ok())
            .ok_or(ChitterError::InvalidEmbed)?;
        let room_id = fields
            .get("roomId")
            .and_then(Value::as_str)
            .filter(|s| uuid::Uuid::parse_str(s).is_ok())
            .ok_or(ChitterError::InvalidEmbed)?;
        Ok(Embed::Message {
            message_id: message_id.to_string(),
            room_id: room_id.to_string(),
        })
    } else if has_external_shape {
        let allowed: &[&str] = &["uri", "title", "description", "thumb"];
        if fields.keys().any(|k| !allowed.contains(&k.as_str())) {
            return Err(ChitterError::InvalidEmbed);
        }
        let uri = fields
            .get("uri")
            .and_then(Value::as_str)
            .ok_or(ChitterError::InvalidEmbed)?;
        let title = fields
            .get("title")
            .and_then(Value::as_str)
            .ok_or(ChitterError::InvalidEmbed)?;
        let description = fields
            .get("description")
            .and_then(Value::as_str)
            .ok_or(ChitterError::InvalidEmbed)?;
        let thumb = match fields.get("thumb") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(ChitterError::InvalidEmbed),
        };
        Ok(Embed::External {
            uri: uri.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            thumb,
        })
    } else {
        Err(ChitterError::InvalidEmbed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_object_input_is_invalid_structure() {
        let err = sanitize(&json!("not an object")).unwrap_err();
        assert_eq!(err, ChitterError::InvalidContentStructure);
    }

    #[test]
    fn empty_text_is_invalid() {
        let err = sanitize(&json!({"text": ""})).unwrap_err();
        assert_eq!(err, ChitterError::InvalidTextContent);
    }

    #[test]
    fn missing_text_is_invalid() {
        let err = sanitize(&json!({})).unwrap_err();
        assert_eq!(err, ChitterError::InvalidTextContent);
    }

    #[test]
    fn minimal_valid_content() {
        let content = sanitize(&json!({"text": "hello", "facets": []})).unwrap();
        assert_eq!(content.text, "hello");
        assert!(content.facets.is_empty());
        assert!(content.embed.is_none());
        assert!(content.attachment_ids.is_empty());
    }

    #[test]
    fn facet_start_equal_end_is_invalid() {
        let err = sanitize(&json!({
            "text": "hello",
            "facets": [{"type": "mention", "start": 2, "end": 2}]
        }))
        .unwrap_err();
        assert_eq!(err, ChitterError::InvalidFacet);
    }

    #[test]
    fn facet_end_equal_text_len_is_accepted() {
        let content = sanitize(&json!({
            "text": "hello",
            "facets": [{"type": "link", "start": 0, "end": 5}]
        }))
        .unwrap();
        assert_eq!(content.facets.len(), 1);
        assert_eq!(content.facets[0].end, 5);
    }

    #[test]
    fn facet_end_beyond_text_len_is_invalid() {
        let err = sanitize(&json!({
            "text": "hi",
            "facets": [{"type": "code", "start": 0, "end": 5}]
        }))
        .unwrap_err();
        assert_eq!(err, ChitterError::InvalidFacet);
    }

    #[test]
    fn facet_unknown_type_is_invalid() {
        let err = sanitize(&json!({
            "text": "hi",
            "facets": [{"type": "bogus", "start": 0, "end": 1}]
        }))
        .unwrap_err();
        assert_eq!(err, ChitterError::InvalidFacet);
    }

    #[test]
    fn non_mapping_facet_entries_are_skipped() {
        let content = sanitize(&json!({
            "text": "hi",
            "facets": ["not a mapping", 5, null]
        }))
        .unwrap();
        assert!(content.facets.is_empty());
    }

    #[test]
    fn external_embed_accepted() {
        let content = sanitize(&json!({
            "text": "hi",
            "embed": {"uri": "https://x", "title": "t", "description": "d"}
        }))
        .unwrap();
        match content.embed.unwrap() {
            Embed::External { uri, .. } => assert_eq!(uri, "https://x"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn external_embed_with_extra_key_rejected() {
        let err = sanitize(&json!({
            "text": "hi",
            "embed": {"uri": "https://x", "title": "t", "description": "d", "bogus": 1}
        }))
        .unwrap_err();
        assert_eq!(err, ChitterError::InvalidEmbed);
    }

    #[test]
    fn message_embed_requires_uuid_fields() {
        let err = sanitize(&json!({
            "text": "hi",
            "embed": {"messageId": "not-a-uuid", "roomId": "also-not"}
        }))
        .unwrap_err();
        assert_eq!(err, ChitterError::InvalidEmbed);
    }

    #[test]
    fn message_embed_with_valid_uuids_accepted() {
        let mid = uuid::Uuid::new_v4().to_string();
        let rid = uuid::Uuid::new_v4().to_string();
        let content = sanitize(&json!({
            "text": "hi",
            "embed": {"messageId": mid, "roomId": rid}
        }))
        .unwrap();
        assert!(matches!(content.embed, Some(Embed::Message { .. })));
    }

    #[test]
    fn attachment_ids_keeps_only_uuid_strings() {
        let valid = uuid::Uuid::new_v4().to_string();
        let content = sanitize(&json!({
            "text": "hi",
            "attachmentIds": [valid.clone(), "not-a-uuid", 5, null]
        }))
        .unwrap();
        assert_eq!(content.attachment_ids.len(), 1);
        assert_eq!(content.attachment_ids[0].0.to_string(), valid);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let input = json!({"text": "hello world", "facets": [{"type": "link", "start": 0, "end": 5}]});
        let first = sanitize(&input).unwrap();
        let reencoded = serde_json::to_value(&first).unwrap();
        let second = sanitize(&reencoded).unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.facets.len(), second.facets.len());
    }
}
