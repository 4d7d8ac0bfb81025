//! Fence splitting and segment classification.
//!
//! A body is split on every fence delimiter. Segments at even positions lie
//! outside any fence; odd positions are fence contents whose kind follows
//! from their header line. Joining the segments again reproduces the body.

pub const FENCE: &str = "```";
pub const META_TAG: &str = "meta";
pub const OUTPUT_TAG: &str = "output";
pub const ERRORS_TAG: &str = "errors";

pub fn split(body: &str) -> Vec<String> {
    body.split(FENCE).map(str::to_string).collect()
}

pub fn join(segments: &[String]) -> String {
    segments.join(FENCE)
}

/// Tag carried on an `output` header line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTag {
    /// `output`
    Absent,
    /// `output ` with nothing after the space
    Empty,
    Present(String),
}

impl OutputTag {
    fn parse(header: &str) -> Option<Self> {
        let rest = header.strip_prefix(OUTPUT_TAG)?;
        if rest.is_empty() {
            return Some(Self::Absent);
        }
        let tag = rest.strip_prefix(' ')?;
        let tag = tag.trim();
        if tag.is_empty() {
            Some(Self::Empty)
        } else if tag.contains(char::is_whitespace) {
            None
        } else {
            Some(Self::Present(tag.to_string()))
        }
    }

    pub fn is_current(&self, fingerprint: &str) -> bool {
        matches!(self, Self::Present(tag) if tag == fingerprint)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Outside any fence.
    Prose,
    /// Whitespace-only fence contents.
    Blank,
    Meta { body: &'a str },
    /// Document-level settings block, handled by the config loader.
    Config { body: &'a str },
    Output { tag: OutputTag, body: &'a str },
    Errors { body: &'a str },
    Code { tag: &'a str, code: &'a str },
    /// Inline spans and unterminated fences.
    Ignored,
}

pub fn classify<'a>(segments: &'a [String], index: usize, config_tag: &str) -> Segment<'a> {
    let Some(text) = segments.get(index) else {
        return Segment::Ignored;
    };
    if index % 2 == 0 {
        return Segment::Prose;
    }
    if index + 1 == segments.len() {
        // no closing fence
        return Segment::Ignored;
    }
    if text.trim().is_empty() {
        return Segment::Blank;
    }
    let (header, body, has_newline) = match text.split_once('\n') {
        Some((header, body)) => (header.trim_end_matches('\r'), body, true),
        None => (text.as_str(), "", false),
    };
    let header_word = header.trim();
    if header_word == META_TAG {
        return Segment::Meta { body };
    }
    if !config_tag.is_empty() && header_word == config_tag {
        return Segment::Config { body };
    }
    if header_word == ERRORS_TAG {
        return Segment::Errors { body };
    }
    if let Some(tag) = OutputTag::parse(header.trim_start()) {
        return Segment::Output { tag, body };
    }
    if matches!(
        header_word.split_whitespace().next(),
        Some(OUTPUT_TAG | ERRORS_TAG)
    ) {
        // malformed result header, never code
        return Segment::Ignored;
    }
    if has_newline {
        Segment::Code {
            tag: header_word,
            code: body,
        }
    } else {
        Segment::Ignored
    }
}

pub fn header_line(segment: &str) -> &str {
    segment.split_once('\n').map_or(segment, |(header, _)| header)
}

/// Outside-fence text allowed between a code block and its output.
pub fn is_gap(segment: &str) -> bool {
    segment.trim().is_empty()
}

pub fn render_output(tag: &str, body: &str) -> String {
    format!("{OUTPUT_TAG} {tag}\n{body}")
}

pub fn render_errors(body: &str) -> String {
    format!("{ERRORS_TAG}\n{body}")
}

/// Empty stays empty; anything else ends with exactly one line break.
pub fn normalize_stream(text: &str) -> String {
    let trimmed = text.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(body: &str) -> Vec<String> {
        let segments = split(body);
        (0..segments.len())
            .map(|idx| match classify(&segments, idx, "notenanny") {
                Segment::Prose => "prose".to_string(),
                Segment::Blank => "blank".to_string(),
                Segment::Meta { .. } => "meta".to_string(),
                Segment::Config { .. } => "config".to_string(),
                Segment::Output { tag, .. } => format!("output:{tag:?}"),
                Segment::Errors { .. } => "errors".to_string(),
                Segment::Code { tag, .. } => format!("code:{tag}"),
                Segment::Ignored => "ignored".to_string(),
            })
            .collect()
    }

    #[test]
    fn classifies_a_full_document() {
        let body = indoc! {"
            Some prose with `inline` code.
            ```meta
            saveas: /tmp/x.py
            ```
            ```python
            print(1)
            ```
            ```errors
            boom
            ```
            ```output 1427ch48p0qqa
            1
            ```
            ```notenanny
            RunTrigger: <<<
            ```
            ```
            ```
            ``` inline ```
        "};
        assert_eq!(
            kinds(body),
            vec![
                "prose",
                "meta",
                "prose",
                "code:python",
                "prose",
                "errors",
                "prose",
                "output:Present(\"1427ch48p0qqa\")",
                "prose",
                "config",
                "prose",
                "blank",
                "prose",
                "ignored",
                "prose",
            ]
        );
    }

    #[test]
    fn split_and_join_round_trip() {
        let body = "a```b\n```\n```output\n```tail";
        assert_eq!(join(&split(body)), body);
    }

    #[test]
    fn output_tag_forms() {
        assert_eq!(OutputTag::parse("output"), Some(OutputTag::Absent));
        assert_eq!(OutputTag::parse("output "), Some(OutputTag::Empty));
        assert_eq!(
            OutputTag::parse("output abc"),
            Some(OutputTag::Present("abc".into()))
        );
        assert_eq!(OutputTag::parse("outputs"), None);
        assert!(!OutputTag::Absent.is_current("45h"));
        assert!(!OutputTag::Empty.is_current(""));
        assert!(OutputTag::Present("45h".into()).is_current("45h"));
    }

    #[test]
    fn unterminated_fence_is_ignored() {
        assert_eq!(kinds("```python\nprint(1)\n"), vec!["prose", "ignored"]);
    }

    #[test]
    fn malformed_result_headers_are_not_code() {
        assert_eq!(
            kinds("```output a b\nx\n```\n```errors x\ny\n```\n```output\tz\n```"),
            vec!["prose", "ignored", "prose", "ignored", "prose", "ignored", "prose"]
        );
        assert_eq!(kinds("```outputs\nx\n```"), vec!["prose", "code:outputs", "prose"]);
    }

    #[test]
    fn empty_tag_code_is_still_code() {
        assert_eq!(kinds("```\nls\n```"), vec!["prose", "code:", "prose"]);
    }

    #[test]
    fn streams_end_with_one_newline() {
        assert_eq!(normalize_stream(""), "");
        assert_eq!(normalize_stream("\n\n"), "");
        assert_eq!(normalize_stream("1"), "1\n");
        assert_eq!(normalize_stream("1\n\n\n"), "1\n");
    }
}
