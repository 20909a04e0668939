//! Language detection from file extensions.
//!
//! Tags are lowercase canonical names (`markdown`, `rust`, `cpp`, ...).
//! Anything unrecognised is `text`, which is stored by the ingestor but
//! never chunked or embedded.

pub const MARKDOWN: &str = "markdown";
pub const TEXT: &str = "text";

const EXTENSIONS: &[(&str, &str)] = &[
    ("md", MARKDOWN),
    ("markdown", MARKDOWN),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("py", "python"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("rb", "ruby"),
    ("php", "php"),
    ("scala", "scala"),
    ("hs", "haskell"),
    ("lua", "lua"),
    ("sh", "shell"),
    ("bash", "bash"),
    ("ps1", "powershell"),
];

const CODE_LANGS: &[&str] = &[
    "typescript",
    "javascript",
    "python",
    "java",
    "go",
    "rust",
    "c",
    "cpp",
    "csharp",
    "kotlin",
    "swift",
    "ruby",
    "php",
    "scala",
    "haskell",
    "lua",
    "shell",
    "bash",
    "powershell",
];

/// Detect the language tag of a repository path.
pub fn detect(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return TEXT;
    };
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
        .unwrap_or(TEXT)
}

pub fn is_markdown(lang: &str) -> bool {
    lang.eq_ignore_ascii_case(MARKDOWN)
}

pub fn is_code(lang: &str) -> bool {
    CODE_LANGS.iter().any(|l| l.eq_ignore_ascii_case(lang))
}

/// Files eligible for chunking and embedding.
pub fn is_code_or_markdown(lang: &str) -> bool {
    is_markdown(lang) || is_code(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_common_extensions() {
        assert_eq!(detect("README.md"), "markdown");
        assert_eq!(detect("src/main.rs"), "rust");
        assert_eq!(detect("web/App.TSX"), "typescript");
        assert_eq!(detect("lib/util.cc"), "cpp");
        assert_eq!(detect("scripts/deploy.sh"), "shell");
    }

    #[test]
    fn test_detect_unknown_is_text() {
        assert_eq!(detect("LICENSE"), "text");
        assert_eq!(detect("package.json"), "text");
        assert_eq!(detect(".github/workflows/ci.yml"), "text");
        assert_eq!(detect("dir.with.dots/Makefile"), "text");
    }

    #[test]
    fn test_selection() {
        assert!(is_code_or_markdown("markdown"));
        assert!(is_code_or_markdown("Rust"));
        assert!(!is_code_or_markdown("text"));
    }
}
