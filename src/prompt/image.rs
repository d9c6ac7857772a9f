use std::path::Path;
use chat_channel::ImageRef;

use super::PromptError;
use crate::{
    flow::context::StepContext,
    util::{is_image_mime, mime_from_extension},
};

/// Turns an image reference into something the transport can deliver.
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, image: ImageRef, ctx: &StepContext) -> Result<ImageRef, PromptError>;
}

/// Accepts references the transport can send as a photo and rejects the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultImageResolver;

fn image_extension(path: &Path) -> Result<(), PromptError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| PromptError::Image(format!("'{}' has no file extension", path.display())))?;
    let mime = mime_from_extension(ext);
    if is_image_mime(mime) {
        Ok(())
    } else {
        Err(PromptError::Image(format!("unsupported content type {mime} for '{}'", path.display())))
    }
}

impl ImageResolver for DefaultImageResolver {
    fn resolve(&self, image: ImageRef, _ctx: &StepContext) -> Result<ImageRef, PromptError> {
        match &image {
            ImageRef::Url(url) => match url.scheme() {
                "http" | "https" => {}
                other => return Err(PromptError::Image(format!("unsupported url scheme '{other}'"))),
            },
            ImageRef::Path(path) => image_extension(path)?,
            ImageRef::FileId(id) => {
                if id.trim().is_empty() {
                    return Err(PromptError::Image("empty file id".into()));
                }
            }
            ImageRef::Bytes { file_name, data } => {
                if data.is_empty() {
                    return Err(PromptError::Image(format!("'{file_name}' has no data")));
                }
                image_extension(Path::new(file_name))?;
            }
        }
        Ok(image)
    }
}
