use axum::{
    Extension,
    body::Body,
    extract::{Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::AppState;
use crate::api::error::AppError;
use crate::api::middleware::request_id::RequestId;
use crate::services::conversion::ConversionError;
use crate::utils::validation::{
    sanitize_asset_name, sanitize_filename, validate_file_size, validate_saber_filename,
};
use crate::utils::workspace::RequestWorkspace;

const FALLBACK_SABER_NAME: &str = "saber";

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ConvertUpload {
    /// The `.saber` bundle to convert
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// A `.saber` upload written to its request workspace.
struct StagedUpload {
    workspace: RequestWorkspace,
    display_name: String,
    saber_name: String,
    size: usize,
}

#[utoipa::path(
    post,
    path = "/convert",
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "ReeSabers ZIP archive", content_type = "application/zip"),
        (status = 400, description = "Missing file, wrong extension or empty upload"),
        (status = 413, description = "Upload exceeds the configured size limit"),
        (status = 422, description = "Bundle is corrupt or in an unsupported format"),
        (status = 500, description = "Packaging failed")
    ),
    tag = "convert"
)]
pub async fn convert_saber(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut staged: Option<StagedUpload> = None;
    if let Err(e) = receive_upload(&state, &request_id, &mut multipart, &mut staged).await {
        if let Some(upload) = staged {
            upload.workspace.discard().await;
        }
        return Err(e);
    }

    let staged = staged.ok_or(AppError::BadRequest("No file provided".to_string()))?;
    info!(
        "📨 Received '{}' ({} bytes) as request {}",
        staged.display_name, staged.size, request_id
    );

    // 3. Convert on the blocking pool. The workspace moves into the task
    //    and is removed there, including when the conversion panics.
    let pipeline = state.pipeline.clone();
    let StagedUpload {
        workspace,
        display_name,
        saber_name,
        ..
    } = staged;
    let result = tokio::task::spawn_blocking(move || {
        let archive_path = workspace.archive_path(&saber_name);
        let converted = pipeline
            .convert(
                &workspace.upload_path(),
                &saber_name,
                &workspace.staging_dir(),
                &archive_path,
            )
            .and_then(|outcome| {
                let bytes = std::fs::read(&outcome.archive_path)?;
                Ok((outcome, bytes))
            });
        if let Err(e) = workspace.close() {
            warn!("Failed to remove request workspace: {}", e);
        }
        converted
    })
    .await
    .map_err(|e| AppError::Internal(format!("Conversion task failed: {}", e)))?;

    let (outcome, archive) = result?;
    info!(
        "✅ Converted '{}': {} mesh(es), {} texture(s), {} byte archive",
        outcome.saber_name,
        outcome.meshes.len(),
        outcome.textures.len(),
        archive.len()
    );

    Ok(zip_response(&format!("{}.zip", display_name), archive))
}

/// Reads the multipart body, staging the single `file` field into `staged`.
///
/// A workspace left in `staged` when this fails belongs to the caller.
async fn receive_upload(
    state: &AppState,
    request_id: &str,
    multipart: &mut Multipart,
    staged: &mut Option<StagedUpload>,
) -> Result<(), AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        if staged.is_some() {
            return Err(invalid_input("Only one file may be uploaded per request"));
        }

        // 1. Validate the name before anything touches the disk
        let original_filename = field.file_name().unwrap_or_default().to_string();
        let filename = sanitize_filename(&original_filename)
            .map_err(|e| invalid_input(e.to_string()))?;
        let display_name =
            validate_saber_filename(&filename).map_err(|e| invalid_input(e.to_string()))?;
        let saber_name = match sanitize_asset_name(&display_name) {
            name if name.is_empty() => FALLBACK_SABER_NAME.to_string(),
            name => name,
        };

        // 2. Stream into a fresh workspace
        let workspace = RequestWorkspace::create(&state.config.temp_root, request_id)
            .map_err(|e| AppError::Internal(format!("Failed to create workspace: {}", e)))?;
        let max_size = state.config.max_file_size;
        let streamed = stream_field(&mut field, &workspace.upload_path(), max_size)
            .await
            .and_then(|size| {
                validate_file_size(size, max_size).map_err(|e| invalid_input(e.to_string()))?;
                Ok(size)
            });
        let size = match streamed {
            Ok(size) => size,
            Err(e) => {
                workspace.discard().await;
                return Err(e);
            }
        };

        *staged = Some(StagedUpload {
            workspace,
            display_name,
            saber_name,
            size,
        });
    }
    Ok(())
}

fn invalid_input(message: impl Into<String>) -> AppError {
    AppError::Conversion(ConversionError::InvalidInput(message.into()))
}

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE || err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

/// Copies one multipart field to `path`, enforcing `max_size` as it goes.
async fn stream_field(
    field: &mut axum::extract::multipart::Field<'_>,
    path: &Path,
    max_size: usize,
) -> Result<usize, AppError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))?;
    let mut written = 0usize;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        if written > max_size {
            return Err(AppError::PayloadTooLarge(format!(
                "File exceeds the maximum allowed {} bytes ({} MB)",
                max_size,
                max_size / 1024 / 1024
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stage upload: {}", e)))?;
    Ok(written)
}

fn zip_response(filename: &str, archive: Vec<u8>) -> Response {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() || ascii_filename == ".zip" {
        "saber.zip"
    } else {
        &ascii_filename
    };

    // RFC 5987 percent-encoding for UTF-8 filename
    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();
    let content_disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition),
            (header::CONTENT_LENGTH, archive.len().to_string()),
        ],
        Body::from(archive),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_response_headers() {
        let response = zip_response("Neon Blade.zip", vec![1, 2, 3]);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/zip"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Neon Blade.zip\"; filename*=UTF-8''Neon%20Blade%2Ezip"
        );
    }

    #[test]
    fn test_zip_response_non_ascii_name() {
        let response = zip_response("剣.zip", Vec::new());
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"saber.zip\""));
        assert!(disposition.contains("filename*=UTF-8''%E5%89%A3%2Ezip"));
    }
}
