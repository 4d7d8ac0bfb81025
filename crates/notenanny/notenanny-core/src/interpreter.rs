use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::meta::MetaState;

const FALLBACK_EXTENSION: &str = "txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interpreter {
    pub program: &'static str,
    pub extension: &'static str,
    /// Text the interpreter requires in front of the code.
    pub prelude: &'static str,
}

impl Interpreter {
    const fn new(program: &'static str, extension: &'static str) -> Self {
        Self {
            program,
            extension,
            prelude: "",
        }
    }
}

static INTERPRETERS: Lazy<HashMap<&'static str, Interpreter>> = Lazy::new(|| {
    let python = Interpreter::new("python3", "py");
    let ruby = Interpreter::new("ruby", "rb");
    let perl = Interpreter::new("perl", "pl");
    let node = Interpreter::new("node", "js");
    HashMap::from([
        ("swift", Interpreter::new("swift", "swift")),
        (
            "php",
            Interpreter {
                program: "php",
                extension: "php",
                prelude: "<?php\n",
            },
        ),
        ("python", python),
        ("python3", python),
        ("py", python),
        ("ruby", ruby),
        ("rb", ruby),
        ("perl", perl),
        ("pl", perl),
        ("sh", Interpreter::new("sh", "sh")),
        ("bash", Interpreter::new("bash", "sh")),
        ("zsh", Interpreter::new("zsh", "sh")),
        ("js", node),
        ("javascript", node),
        ("node", node),
        ("lua", Interpreter::new("lua", "lua")),
    ])
});

pub fn lookup(tag: &str) -> Option<&'static Interpreter> {
    INTERPRETERS.get(tag.to_ascii_lowercase().as_str())
}

/// Prelude for a language tag; empty for tags without one.
pub fn prelude_for(tag: &str) -> &'static str {
    lookup(tag).map_or("", |interpreter| interpreter.prelude)
}

/// Resolved command line for one code segment; the script path is appended
/// as the final argument when the command is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub extension: String,
}

/// `run` from meta wins over the tag table. Returns `None` when the segment
/// has no way to be executed.
pub fn resolve(tag: &str, meta: &MetaState) -> Option<Invocation> {
    if let Some(run) = meta.run() {
        let mut words = run.split_whitespace().map(str::to_string);
        let program = words.next()?;
        let extension = override_extension(tag, &program, meta);
        return Some(Invocation {
            program,
            args: words.collect(),
            extension,
        });
    }
    let interpreter = lookup(tag)?;
    Some(Invocation {
        program: interpreter.program.to_string(),
        args: Vec::new(),
        extension: meta
            .ext()
            .map_or_else(|| interpreter.extension.to_string(), clean_extension),
    })
}

fn override_extension(tag: &str, program: &str, meta: &MetaState) -> String {
    if let Some(ext) = meta.ext() {
        return clean_extension(ext);
    }
    let program_name = Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    lookup(&program_name)
        .or_else(|| lookup(tag))
        .map(|interpreter| interpreter.extension.to_string())
        .or_else(|| (!tag.is_empty()).then(|| clean_extension(tag)))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

fn clean_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(lines: &[&str]) -> MetaState {
        let mut meta = MetaState::new();
        for line in lines {
            meta.ingest_line(line);
        }
        meta
    }

    #[test]
    fn tag_table_resolves_known_languages() {
        let invocation = resolve("Python", &MetaState::new()).unwrap();
        assert_eq!(invocation.program, "python3");
        assert!(invocation.args.is_empty());
        assert_eq!(invocation.extension, "py");
        assert_eq!(prelude_for("php"), "<?php\n");
        assert_eq!(prelude_for("swift"), "");
        assert!(resolve("cobol", &MetaState::new()).is_none());
    }

    #[test]
    fn run_override_splits_words_and_guesses_extension() {
        let invocation = resolve("", &meta(&["run: /usr/local/bin/python3 -u"])).unwrap();
        assert_eq!(invocation.program, "/usr/local/bin/python3");
        assert_eq!(invocation.args, vec!["-u".to_string()]);
        assert_eq!(invocation.extension, "py");

        let invocation = resolve("ruby", &meta(&["run: bundle exec"])).unwrap();
        assert_eq!(invocation.extension, "rb");

        let invocation = resolve("awk", &meta(&["run: awk -f"])).unwrap();
        assert_eq!(invocation.extension, "awk");

        let invocation = resolve("", &meta(&["run: mytool"])).unwrap();
        assert_eq!(invocation.extension, "txt");
    }

    #[test]
    fn meta_ext_wins() {
        let invocation = resolve("", &meta(&["run: deno run", "ext: .ts"])).unwrap();
        assert_eq!(invocation.extension, "ts");
    }
}
