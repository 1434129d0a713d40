//! Non-fatal problems found while extracting a file.

use serde::Serialize;

/// What went wrong with a part that was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A worksheet references a drawing but has no relationship descriptor.
    MissingRelationships,
    MalformedRelationships,
    /// A drawing, worksheet, shared-strings or styles part could not be parsed.
    MalformedPart,
    /// The drawing relationship points at a part that is not in the package.
    MissingDrawing,
    /// A picture's `r:embed` id is not declared by the drawing.
    UnresolvedPicture,
    /// A picture's media part is not in the package.
    MissingMedia,
    /// A picture without a usable anchor was placed on the catch-all row.
    UnanchoredPicture,
    /// Media bytes could not be inflated.
    UnreadableMedia,
    /// The name column lies beyond the sheet's declared dimension.
    ColumnOutsideDimension,
    /// A worksheet listed by the workbook is not in the package.
    MissingWorksheet,
}

/// A logged, non-fatal extraction problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            sheet: None,
            part: None,
            detail: detail.into(),
        }
    }

    pub fn with_sheet(mut self, sheet: &str) -> Self {
        self.sheet = Some(sheet.to_string());
        self
    }

    pub fn with_part(mut self, part: &str) -> Self {
        self.part = Some(part.to_string());
        self
    }

    /// Emit the diagnostic through `tracing`.
    pub fn log(&self, file: &str) {
        let sheet = self.sheet.as_deref().unwrap_or("");
        let part = self.part.as_deref().unwrap_or("");
        match self.kind {
            DiagnosticKind::UnanchoredPicture | DiagnosticKind::ColumnOutsideDimension => {
                tracing::debug!(file, sheet, part, kind = ?self.kind, "{}", self.detail)
            }
            _ => tracing::warn!(file, sheet, part, kind = ?self.kind, "{}", self.detail),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.sheet, &self.part) {
            (Some(sheet), Some(part)) => write!(f, "[{}] {}: {}", sheet, part, self.detail),
            (Some(sheet), None) => write!(f, "[{}] {}", sheet, self.detail),
            (None, Some(part)) => write!(f, "{}: {}", part, self.detail),
            (None, None) => f.write_str(&self.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_json() {
        let diag = Diagnostic::new(DiagnosticKind::MissingRelationships, "no relationship descriptor")
            .with_sheet("Parts")
            .with_part("xl/worksheets/_rels/sheet2.xml.rels");
        assert_eq!(
            diag.to_string(),
            "[Parts] xl/worksheets/_rels/sheet2.xml.rels: no relationship descriptor"
        );

        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "missing_relationships");
        assert_eq!(json["sheet"], "Parts");

        let bare = serde_json::to_value(Diagnostic::new(DiagnosticKind::MissingMedia, "gone")).unwrap();
        assert!(bare.get("sheet").is_none());
    }
}
