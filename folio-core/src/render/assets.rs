use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::RenderError;

/// Read an image from disk and return it as a `data:` URI so the renderer
/// never has to fetch anything.
pub async fn inline_asset(path: &Path) -> Result<String, RenderError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        RenderError::SourceData(format!(
            "asset {} could not be read: {err}",
            path.display()
        ))
    })?;
    if bytes.is_empty() {
        return Err(RenderError::SourceData(format!(
            "asset {} is empty",
            path.display()
        )));
    }

    Ok(format!("data:{};base64,{}", mime_for(path), STANDARD.encode(&bytes)))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn png_is_inlined_as_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.PNG");
        tokio::fs::write(&path, b"\x89PNG").await.unwrap();

        let uri = inline_asset(&path).await.unwrap();
        assert_eq!(uri, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn missing_asset_is_a_source_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = inline_asset(&dir.path().join("nope.jpg")).await.unwrap_err();
        assert_eq!(err.kind(), "source_data");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(mime_for(Path::new("logo.bin")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("logo.jpeg")), "image/jpeg");
    }
}
