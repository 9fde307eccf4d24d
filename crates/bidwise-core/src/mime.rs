//! MIME type resolution for documents sent to the analysis service.

/// Resolve the MIME type to send alongside a document.
///
/// Magic bytes win when `infer` recognises them. Otherwise the stored
/// `file_type` is used: either a full MIME type (`application/pdf`) or a bare
/// extension (`pdf`, `.docx`). Unknown inputs resolve to
/// `application/octet-stream`.
pub fn detect_mime_type(file_type: &str, file_path: &str, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    let declared = file_type.trim().to_lowercase();
    if declared.contains('/') {
        return declared;
    }

    let ext = if declared.is_empty() {
        file_path.rsplit('.').next().unwrap_or("").to_lowercase()
    } else {
        declared.trim_start_matches('.').to_string()
    };

    mime_from_extension(&ext)
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}
