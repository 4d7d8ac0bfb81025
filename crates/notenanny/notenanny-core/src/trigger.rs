/// Result of scanning code text for the configured markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detection {
    pub run: bool,
    pub format: bool,
    pub stripped: String,
}

impl Detection {
    pub fn fired(&self) -> bool {
        self.run || self.format
    }
}

/// 0-based line and character column of a marker inside a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MarkerLocation {
    pub line: usize,
    pub column: usize,
}

/// Report which markers occur in `text`. When either does, every occurrence
/// of both is removed from the returned text. Empty markers never fire.
pub fn detect(text: &str, run_marker: &str, format_marker: &str) -> Detection {
    let run = !run_marker.is_empty() && text.contains(run_marker);
    let format = !format_marker.is_empty() && text.contains(format_marker);
    let stripped = if run || format {
        strip_markers(text, &[run_marker, format_marker])
    } else {
        text.to_string()
    };
    Detection {
        run,
        format,
        stripped,
    }
}

/// Remove all occurrences of `markers`. A line that held nothing but markers
/// and whitespace disappears; trailing whitespace left behind on other lines
/// is trimmed.
pub fn strip_markers(text: &str, markers: &[&str]) -> String {
    let mut markers: Vec<&str> = markers.iter().copied().filter(|m| !m.is_empty()).collect();
    if markers.is_empty() {
        return text.to_string();
    }
    markers.sort_by_key(|m| std::cmp::Reverse(m.len()));
    markers.dedup();

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let (content, newline) = match line.strip_suffix('\n') {
            Some(content) => (content, "\n"),
            None => (line, ""),
        };
        let cleaned = remove_all(content, &markers);
        if cleaned.len() == content.len() {
            out.push_str(line);
            continue;
        }
        let cleaned = cleaned.trim_end();
        if cleaned.is_empty() {
            continue;
        }
        out.push_str(cleaned);
        out.push_str(newline);
    }
    // markers spanning a line break
    remove_all(&out, &markers)
}

fn remove_all(text: &str, markers: &[&str]) -> String {
    let mut current = text.to_string();
    while let Some(marker) = markers.iter().find(|m| current.contains(**m)) {
        current = current.replace(marker, "");
    }
    current
}

/// Position of the first occurrence of `marker` in `segment`, scanning line
/// by line.
pub fn locate(segment: &str, marker: &str) -> Option<MarkerLocation> {
    if marker.is_empty() {
        return None;
    }
    segment.lines().enumerate().find_map(|(line, text)| {
        text.find(marker).map(|byte| MarkerLocation {
            line,
            column: text[..byte].chars().count(),
        })
    })
}
