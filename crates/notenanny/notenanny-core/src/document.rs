use std::time::SystemTime;

/// A note as read from a store. The first line is the title and is never
/// handed to the block parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub modified: SystemTime,
    pub trashed: bool,
}

impl Document {
    pub fn from_text(id: impl Into<String>, text: &str, modified: SystemTime) -> Self {
        let (title, body) = text.split_once('\n').unwrap_or((text, ""));
        Self {
            id: id.into(),
            title: title.to_string(),
            body: body.to_string(),
            modified,
            trashed: false,
        }
    }

    pub fn text(&self) -> String {
        self.full_text(&self.body)
    }

    /// Re-attach the title to a reconciled body.
    pub fn full_text(&self, body: &str) -> String {
        format!("{}\n{}", self.title, body)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.title.contains(needle) || self.body.contains(needle)
    }
}

/// Editor cursor target: 1-based document line (the title is line 1) and
/// 0-based character column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: usize,
    pub column: usize,
}

impl CursorPosition {
    /// `body_line` is 0-based and counted from the first body line.
    pub fn from_body_line(body_line: usize, column: usize) -> Self {
        Self {
            line: body_line + 2,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_split_from_body() {
        let doc = Document::from_text("n1", "Title\n```meta\n```", SystemTime::UNIX_EPOCH);
        assert_eq!(doc.title, "Title");
        assert_eq!(doc.body, "```meta\n```");
        assert_eq!(doc.text(), "Title\n```meta\n```");
        assert_eq!(doc.full_text("x"), "Title\nx");
    }

    #[test]
    fn title_only_document_has_empty_body() {
        let doc = Document::from_text("n2", "Only a title", SystemTime::UNIX_EPOCH);
        assert_eq!(doc.title, "Only a title");
        assert!(doc.body.is_empty());
    }

    #[test]
    fn body_lines_map_below_the_title() {
        assert_eq!(
            CursorPosition::from_body_line(0, 3),
            CursorPosition { line: 2, column: 3 }
        );
    }
}
