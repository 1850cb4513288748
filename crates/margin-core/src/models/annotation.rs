//! Annotation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for an annotation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    /// Create a new unique annotation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AnnotationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Rectangle in PDF page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Point in PDF page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One freehand pen stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub width: f64,
}

/// Type-specific annotation data, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum AnnotationKind {
    /// Text highlight over one or more line rectangles
    Highlight {
        rects: Vec<Rect>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_text: Option<String>,
    },
    /// Freehand drawing
    Drawing { strokes: Vec<Stroke> },
    /// AI explanation anchored to a selected passage
    Explanation {
        rects: Vec<Rect>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl AnnotationKind {
    /// Wire name of the kind
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Highlight { .. } => "highlight",
            Self::Drawing { .. } => "drawing",
            Self::Explanation { .. } => "explanation",
        }
    }
}

/// An annotation on a PDF page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Unique identifier
    pub id: AnnotationId,
    /// Document the annotation belongs to
    pub document_id: String,
    /// 1-based page number
    pub page_number: u32,
    /// Highlight rects, drawing strokes, or explanation anchor
    #[serde(flatten)]
    pub kind: AnnotationKind,
    /// Free text: comment body or AI explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Display color (e.g. `#ffd54f`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), the last-writer-wins marker
    pub updated_at: i64,
}

impl Annotation {
    /// Create a new annotation of the given kind
    #[must_use]
    pub fn new(document_id: impl Into<String>, page_number: u32, kind: AnnotationKind) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: AnnotationId::new(),
            document_id: document_id.into(),
            page_number,
            kind,
            content: None,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a highlight over the given rectangles
    #[must_use]
    pub fn highlight(document_id: impl Into<String>, page_number: u32, rects: Vec<Rect>) -> Self {
        Self::new(
            document_id,
            page_number,
            AnnotationKind::Highlight {
                rects,
                selected_text: None,
            },
        )
    }

    /// Create a freehand drawing
    #[must_use]
    pub fn drawing(document_id: impl Into<String>, page_number: u32, strokes: Vec<Stroke>) -> Self {
        Self::new(document_id, page_number, AnnotationKind::Drawing { strokes })
    }

    /// Create an AI explanation anchored to the given rectangles
    #[must_use]
    pub fn explanation(
        document_id: impl Into<String>,
        page_number: u32,
        rects: Vec<Rect>,
        explanation: impl Into<String>,
    ) -> Self {
        Self::new(
            document_id,
            page_number,
            AnnotationKind::Explanation {
                rects,
                prompt: None,
            },
        )
        .with_content(explanation)
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Apply a partial update in place.
    ///
    /// Geometry fields must match the annotation kind: `rects` applies to
    /// highlights and explanations, `strokes` only to drawings.
    pub fn apply_patch(&mut self, patch: &AnnotationPatch) -> Result<()> {
        match (&mut self.kind, &patch.rects, &patch.strokes) {
            (_, Some(_), Some(_)) => {
                return Err(Error::InvalidInput(
                    "patch cannot set both rects and strokes".into(),
                ));
            }
            (
                AnnotationKind::Highlight { rects, .. } | AnnotationKind::Explanation { rects, .. },
                Some(new_rects),
                None,
            ) => rects.clone_from(new_rects),
            (AnnotationKind::Drawing { strokes }, None, Some(new_strokes)) => {
                strokes.clone_from(new_strokes);
            }
            (kind, Some(_), None) => {
                return Err(Error::InvalidInput(format!(
                    "rects do not apply to a {} annotation",
                    kind.name()
                )));
            }
            (kind, None, Some(_)) => {
                return Err(Error::InvalidInput(format!(
                    "strokes do not apply to a {} annotation",
                    kind.name()
                )));
            }
            (_, None, None) => {}
        }

        if let Some(page_number) = patch.page_number {
            self.page_number = page_number;
        }
        if let Some(content) = &patch.content {
            self.content = Some(content.clone());
        }
        if let Some(color) = &patch.color {
            self.color = Some(color.clone());
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
        Ok(())
    }
}

/// Partial update payload for an annotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rects: Option<Vec<Rect>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strokes: Option<Vec<Stroke>>,
    /// Marker of the local edit that produced this patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl AnnotationPatch {
    /// Check whether the patch changes anything besides the marker
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.page_number.is_none()
            && self.content.is_none()
            && self.color.is_none()
            && self.rects.is_none()
            && self.strokes.is_none()
    }
}
