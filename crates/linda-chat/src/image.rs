//! Image attachments sent inline with a chat request.

use std::path::Path;

use base64::Engine as _;

use crate::errors::ChatError;

/// Largest accepted image, in bytes.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// An image ready to be sent as `image_base64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Where the image came from; stored as the user message's `image_ref`.
    pub source: String,
    pub mime: String,
    /// `data:<mime>;base64,<payload>`
    pub data_url: String,
}

impl ImageAttachment {
    pub fn from_bytes(
        source: impl Into<String>,
        mime: &str,
        bytes: &[u8],
    ) -> Result<Self, ChatError> {
        if !mime.starts_with("image/") {
            return Err(ChatError::Validation(
                "Hanya file gambar (JPEG, PNG, WEBP) yang didukung.".into(),
            ));
        }
        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return Err(too_large());
        }
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self {
            source: source.into(),
            mime: mime.to_string(),
            data_url: format!("data:{mime};base64,{payload}"),
        })
    }

    /// Reads an image file. The type is taken from the extension and the size
    /// is checked before the file is read.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let mime = mime_for_path(path).ok_or_else(|| {
            ChatError::Validation("Hanya file gambar (JPEG, PNG, WEBP) yang didukung.".into())
        })?;
        let meta = std::fs::metadata(path)
            .map_err(|e| ChatError::Storage(format!("cannot read {}: {e}", path.display())))?;
        if meta.len() > MAX_IMAGE_BYTES {
            return Err(too_large());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| ChatError::Storage(format!("cannot read {}: {e}", path.display())))?;
        Self::from_bytes(path.display().to_string(), mime, &bytes)
    }
}

fn too_large() -> ChatError {
    ChatError::Validation("File terlalu besar. Maksimal 5MB.".into())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime)
}
