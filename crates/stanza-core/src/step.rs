//! Step classification and the typed shapes behind it.
//!
//! Steps are opaque to the collaboration protocol - they are stored and
//! rebroadcast untouched - but a few shapes carry side effects the server
//! must project (links, comments, image copies). Classification scans the
//! encoded step for well-known marker tokens and only then decodes the full
//! matched shape; the scan is cheap and the markers are produced verbatim by
//! the editor's serializer.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::link::{Link, LinkKind};

/// Closed classification of an opaque step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// A mark was added to a range (`stepType: "addMark"`).
    AddMark,
    /// A mark was removed from a range (`stepType: "removeMark"`).
    RemoveMark,
    /// Custom comment operation (`stepType: "comment"`).
    CommentCustom,
    /// Custom picture operation (`stepType: "picture"`).
    PictureCustom,
    /// Content replacement carrying a slice (`stepType: "replace"`).
    ReplaceSlice,
    /// Anything else; no side effects to project.
    Other,
}

/// Classify an encoded step by marker token.
///
/// `"stepType":"replace"` also matches `replaceAround`, which carries a
/// slice in the same position and projects identically.
pub fn classify(step: &str) -> StepKind {
    if step.contains(r#""stepType":"addMark""#) {
        StepKind::AddMark
    } else if step.contains(r#""stepType":"removeMark""#) {
        StepKind::RemoveMark
    } else if step.contains(r#""stepType":"comment""#) {
        StepKind::CommentCustom
    } else if step.contains(r#""stepType":"picture""#) {
        StepKind::PictureCustom
    } else if step.contains(r#""stepType":"replace""#) {
        StepKind::ReplaceSlice
    } else {
        StepKind::Other
    }
}

/// A mark applied to or removed from a document range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkStep {
    /// `addMark` or `removeMark`.
    #[serde(rename = "stepType", default)]
    pub step_type: String,

    /// Range start.
    #[serde(default)]
    pub from: i64,

    /// Range end.
    #[serde(default)]
    pub to: i64,

    /// The mark itself.
    #[serde(default)]
    pub mark: Mark,
}

/// A mark and the attributes the projector cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mark {
    /// Mark type: `file`, `weblink`, `process`, `comment`, ...
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Mark attributes.
    #[serde(default)]
    pub attrs: MarkAttrs,
}

/// Attributes of a link-style mark.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkAttrs {
    /// Stable id of the linked artifact.
    #[serde(default)]
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Target url.
    #[serde(default)]
    pub url: String,

    /// Process id; used as the display name for `process` marks.
    #[serde(rename = "processId", default)]
    pub process_id: String,
}

/// A custom step: the editor's escape hatch for non-content operations.
///
/// `stepType` names the family (`comment`, `picture`); `type` selects the
/// operation within it and `payload` carries its arguments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomStep {
    /// Operation discriminant, e.g. `addComment` or `copyPicture`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Operation arguments, decoded by the operation's handler.
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

/// A replace step; only the slice content is of interest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplaceStep {
    /// Inserted content.
    #[serde(default)]
    pub slice: Slice,
}

/// The slice of a replace step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Slice {
    /// Top-level content nodes.
    #[serde(default)]
    pub content: Vec<StepContent>,
}

/// One content node inside a replace slice.
///
/// Attributes beyond the pdf/picture ids are not decoded; the walk only
/// needs block ids and link-style marks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepContent {
    /// Node type: `pdf`, `picture`, `paragraph`, ...
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Node attributes.
    #[serde(default)]
    pub attrs: ContentAttrs,

    /// Marks on this node.
    #[serde(default)]
    pub marks: Vec<Mark>,

    /// Nested content.
    #[serde(default)]
    pub content: Vec<StepContent>,
}

/// Attributes of pdf and picture blocks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentAttrs {
    /// Pdf blocks: the embedded document id.
    #[serde(rename = "documentId", default)]
    pub document_id: String,

    /// Pdf blocks: original file name.
    #[serde(rename = "fileName", default)]
    pub file_name: String,

    /// Picture blocks: the image id.
    #[serde(rename = "imageId", default)]
    pub image_id: String,
}

impl ReplaceStep {
    /// Collect every link the inserted slice embeds.
    ///
    /// Top-level `pdf` blocks (with a non-empty document id) and `picture`
    /// blocks become pdf/image links; every other node is walked recursively
    /// for link-style marks. The map is keyed so duplicates collapse.
    pub fn collect_links(&self) -> BTreeMap<String, Link> {
        let mut links = BTreeMap::new();

        for content in &self.slice.content {
            match content.kind.as_str() {
                "pdf" => {
                    // pdf blocks without a document id are still uploading
                    if content.attrs.document_id.is_empty() {
                        continue;
                    }
                    let id = content.attrs.document_id.clone();
                    links.insert(format!("pdf-{id}"), Link {
                        url: format!("/download/process/{id}"),
                        name: content.attrs.file_name.clone(),
                        kind: LinkKind::Pdf,
                        id,
                    });
                },
                "picture" => {
                    let id = content.attrs.image_id.clone();
                    links.insert(format!("image-{id}"), Link {
                        url: format!("/image/process/{id}"),
                        name: String::new(),
                        kind: LinkKind::Image,
                        id,
                    });
                },
                _ => extract_marks(content, &mut links),
            }
        }

        links
    }
}

/// Recursively pull link-style marks out of a content node.
fn extract_marks(content: &StepContent, links: &mut BTreeMap<String, Link>) {
    for mark in &content.marks {
        if let Some(kind) = LinkKind::from_mark_type(&mark.kind) {
            links.entry(mark.attrs.id.clone()).or_insert_with(|| Link {
                id: mark.attrs.id.clone(),
                kind,
                url: mark.attrs.url.clone(),
                name: mark.attrs.name.clone(),
            });
        }
    }

    for child in &content.content {
        extract_marks(child, links);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_marker_tokens() {
        assert_eq!(classify(r#"{"stepType":"addMark","mark":{}}"#), StepKind::AddMark);
        assert_eq!(classify(r#"{"stepType":"removeMark","mark":{}}"#), StepKind::RemoveMark);
        assert_eq!(classify(r#"{"stepType":"comment","type":"addComment"}"#), StepKind::CommentCustom);
        assert_eq!(classify(r#"{"stepType":"picture","type":"copyPicture"}"#), StepKind::PictureCustom);
        assert_eq!(classify(r#"{"stepType":"replace","slice":{}}"#), StepKind::ReplaceSlice);
        assert_eq!(classify(r#"{"stepType":"replaceAround","slice":{}}"#), StepKind::ReplaceSlice);
        assert_eq!(classify(r#"{"stepType":"addNodeMark"}"#), StepKind::Other);
    }

    #[test]
    fn mark_step_decodes_link_attrs() {
        let raw = r#"{
            "stepType": "addMark",
            "from": 4,
            "to": 9,
            "mark": {
                "type": "weblink",
                "attrs": {"id": "l-1", "name": "docs", "url": "https://example.org"}
            }
        }"#;

        let step: MarkStep = serde_json::from_str(raw).expect("decode failed");
        assert_eq!(step.mark.kind, "weblink");
        assert_eq!(step.mark.attrs.id, "l-1");
        assert_eq!(step.mark.attrs.url, "https://example.org");
        assert_eq!((step.from, step.to), (4, 9));
    }

    #[test]
    fn replace_step_collects_blocks_and_nested_marks() {
        let raw = r#"{
            "stepType": "replace",
            "slice": {"content": [
                {"type": "pdf", "attrs": {"documentId": "pdf-doc", "fileName": "spec.pdf"}},
                {"type": "pdf", "attrs": {"documentId": "", "fileName": "pending.pdf"}},
                {"type": "picture", "attrs": {"imageId": "img-1"}},
                {"type": "paragraph", "content": [
                    {"type": "text", "marks": [
                        {"type": "file", "attrs": {"id": "f-1", "url": "/f/1", "name": "notes"}},
                        {"type": "bold"}
                    ]}
                ]}
            ]}
        }"#;

        let step: ReplaceStep = serde_json::from_str(raw).expect("decode failed");
        let links = step.collect_links();

        assert_eq!(links.len(), 3);

        let pdf = &links["pdf-pdf-doc"];
        assert_eq!(pdf.kind, LinkKind::Pdf);
        assert_eq!(pdf.url, "/download/process/pdf-doc");
        assert_eq!(pdf.name, "spec.pdf");

        let image = &links["image-img-1"];
        assert_eq!(image.kind, LinkKind::Image);
        assert_eq!(image.url, "/image/process/img-1");

        let file = &links["f-1"];
        assert_eq!(file.kind, LinkKind::File);
        assert_eq!(file.name, "notes");
    }

    #[test]
    fn duplicate_marks_collapse_to_one_link() {
        let raw = r#"{
            "slice": {"content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "marks": [{"type": "weblink", "attrs": {"id": "w", "url": "/a"}}]},
                    {"type": "text", "marks": [{"type": "weblink", "attrs": {"id": "w", "url": "/b"}}]}
                ]}
            ]}
        }"#;

        let step: ReplaceStep = serde_json::from_str(raw).expect("decode failed");
        let links = step.collect_links();

        assert_eq!(links.len(), 1);
        // First occurrence wins.
        assert_eq!(links["w"].url, "/a");
    }
}
