//! Image duplication payload.

use serde::Deserialize;

/// Payload of a `copyPicture` custom step.
///
/// Pasting a picture between documents must not share the binary, so the
/// image service is asked to duplicate the original under the new id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageCopy {
    /// Id for the new copy.
    #[serde(rename = "imageId", default)]
    pub image_id: String,

    /// Id of the original image.
    #[serde(rename = "originalId", default)]
    pub original_id: String,
}
