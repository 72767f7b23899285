use std::str::FromStr;

use axum::extract::State;
use axum::http::header;
use axum::routing::{delete, post};
use axum::{Json, Router};
use axum_extra::extract::Multipart;
use chitter_shared::ids::AttachmentId;
use chitter_shared::model::AttachmentType;
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;

const MAX_FILE_NAME_LEN: usize = 255;

/// Strip path separators and control characters from a client-supplied
/// file name before it's ever used as part of a path or response header.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\' && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

fn extension_of(file_name: &str) -> Option<&str> {
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Sniff the attachment kind from the leading bytes, ignoring whatever MIME
/// type the client claims. Only image, video, and a fixed set of
/// application signatures are recognized; anything else is `None` so the
/// caller can reject it rather than silently storing it as `File`.
fn sniff_attachment_type(bytes: &[u8]) -> Option<AttachmentType> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const GIF87A: &[u8] = b"GIF87a";
    const GIF89A: &[u8] = b"GIF89a";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const WEBP_RIFF: &[u8] = b"RIFF";
    const WEBP_TAG: &[u8] = b"WEBP";
    const MP4_FTYP: &[u8] = b"ftyp";
    const WEBM: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
    const PDF: &[u8] = b"%PDF-";
    const ZIP: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
    const GZIP: &[u8] = &[0x1F, 0x8B];

    if bytes.starts_with(PNG) || bytes.starts_with(GIF87A) || bytes.starts_with(GIF89A) {
        return Some(AttachmentType::Image);
    }
    if bytes.starts_with(JPEG) {
        return Some(AttachmentType::Image);
    }
    if bytes.len() >= 12 && bytes.starts_with(WEBP_RIFF) && &bytes[8..12] == WEBP_TAG {
        return Some(AttachmentType::Image);
    }
    if bytes.len() >= 12 && &bytes[4..8] == MP4_FTYP {
        return Some(AttachmentType::Video);
    }
    if bytes.starts_with(WEBM) {
        return Some(AttachmentType::Video);
    }
    if bytes.starts_with(PDF) || bytes.starts_with(ZIP) || bytes.starts_with(GZIP) {
        return Some(AttachmentType::File);
    }
    None
}

/// Read width/height out of a PNG IHDR chunk, GIF logical screen descriptor,
/// or JPEG SOFn marker. Returns `None` for anything else, or malformed
/// headers — dimensions are best-effort metadata, never load-bearing.
fn sniff_image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() >= 24 && bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        return Some((width, height));
    }
    if bytes.len() >= 10 && (bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")) {
        let width = u16::from_le_bytes(bytes[6..8].try_into().ok()?) as u32;
        let height = u16::from_le_bytes(bytes[8..10].try_into().ok()?) as u32;
        return Some((width, height));
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        let mut offset = 2usize;
        while offset + 9 < bytes.len() {
            if bytes[offset] != 0xFF {
                offset += 1;
                continue;
            }
            let marker = bytes[offset + 1];
            let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
            if is_sof {
                let height = u16::from_be_bytes(bytes[offset + 5..offset + 7].try_into().ok()?);
                let width = u16::from_be_bytes(bytes[offset + 7..offset + 9].try_into().ok()?);
                return Some((width as u32, height as u32));
            }
            let segment_len = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into().ok()?);
            offset += 2 + segment_len as usize;
        }
    }
    None
}

struct ParsedUpload {
    bytes: Vec<u8>,
    file_name: String,
}

async fn parse_upload_multipart(
    multipart: &mut Multipart,
    max_size: u64,
) -> Result<ParsedUpload, ServerError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty() && n.len() <= MAX_FILE_NAME_LEN)
            .unwrap_or_else(|| "upload".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|_| ServerError::validation("failed to read file data"))?;
        if data.len() as u64 > max_size {
            return Err(payload_too_large(max_size));
        }
        bytes = Some(data.to_vec());
        file_name = Some(name);
    }

    Ok(ParsedUpload {
        bytes: bytes.ok_or_else(|| ServerError::validation("missing file field"))?,
        file_name: file_name.ok_or_else(|| ServerError::validation("missing file field"))?,
    })
}

fn check_content_length(
    headers: &axum::http::HeaderMap,
    max_size: u64,
) -> Result<(), ServerError> {
    if let Some(content_length) = headers.get(header::CONTENT_LENGTH) {
        if let Ok(len) = content_length
            .to_str()
            .unwrap_or_default()
            .parse::<u64>()
        {
            if len > max_size {
                return Err(payload_too_large(max_size));
            }
        }
    }
    Ok(())
}

fn payload_too_large(max_size: u64) -> ServerError {
    ServerError::validation(format!("file exceeds maximum size of {max_size} bytes"))
}

async fn upload_attachment(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    headers: axum::http::HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, ServerError> {
    check_content_length(&headers, state.config.max_upload_bytes)?;
    let parsed = parse_upload_multipart(&mut multipart, state.config.max_upload_bytes).await?;

    let kind = sniff_attachment_type(&parsed.bytes)
        .ok_or(chitter_shared::error::ChitterError::InvalidFileType)?;
    let (width, height) = if kind == AttachmentType::Image {
        match sniff_image_dimensions(&parsed.bytes) {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    let extension = extension_of(&parsed.file_name).unwrap_or("bin");
    let stored_name = format!("{}.{extension}", uuid::Uuid::new_v4());
    let disk_path = state.upload_dir.join(&stored_name);

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create upload directory");
            ServerError::Service(chitter_shared::error::ChitterError::UnknownServerError)
        })?;
    tokio::fs::write(&disk_path, &parsed.bytes).await.map_err(|e| {
        tracing::error!(error = %e, "failed to write uploaded file to disk");
        ServerError::Service(chitter_shared::error::ChitterError::UnknownServerError)
    })?;

    let path_string = disk_path.to_string_lossy().into_owned();

    let result = state
        .service
        .upload_attachment(&token, kind, parsed.file_name, path_string, width, height)
        .await;

    match result {
        Ok(attachment) => Ok(envelope::ok(attachment)),
        Err(err) => {
            let path = disk_path.clone();
            tokio::spawn(async move {
                if let Err(del_err) = tokio::fs::remove_file(&path).await {
                    tracing::error!(error = %del_err, "failed to clean up orphan attachment file");
                }
            });
            Err(err.into())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveAttachmentBody {
    pub attachment_id: String,
}

async fn remove_attachment(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<RemoveAttachmentBody>,
) -> Result<Json<Value>, ServerError> {
    let attachment_id = AttachmentId::from_str(&body.attachment_id)
        .map_err(|_| ServerError::validation("attachmentId must be a valid attachment id"))?;
    state.service.remove_attachment(&token, attachment_id).await?;
    Ok(envelope::ok_empty())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/uploadAttachment", post(upload_attachment))
        .route("/api/removeAttachment", delete(remove_attachment))
}
