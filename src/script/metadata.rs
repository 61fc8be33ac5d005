/// Metadata block parser
///
/// Extracts the `binscript-begin` / `binscript-end` block embedded in a script's
/// comments and validates it into a [`ScriptMetadata`] value.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use super::cache::STATUS_FILE_NAME;
use super::scaffold::resolve_within;

/// Marker opening the metadata block
pub const BEGIN_MARKER: &str = "binscript-begin";

/// Marker closing the metadata block
pub const END_MARKER: &str = "binscript-end";

/// Errors produced while extracting or validating the metadata block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no `{BEGIN_MARKER}` ... `{END_MARKER}` metadata block found")]
    MissingBlock,

    #[error("malformed metadata block: {0}")]
    Malformed(String),

    #[error("metadata key `{0}` is missing or empty")]
    MissingField(&'static str),

    #[error("files entry #{index} is missing `{field}`")]
    InvalidFileEntry { index: usize, field: &'static str },

    #[error("path `{0}` is declared more than once")]
    DuplicatePath(String),

    #[error("path `{0}` is reserved for cache bookkeeping")]
    ReservedPath(String),
}

/// Auxiliary file materialized next to the script in the scaffold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryFile {
    pub path: String,
    pub content: String,
}

/// Zero-based line span of the metadata block, both marker lines included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub begin_line: usize,
    pub end_line: usize,
}

impl BlockSpan {
    pub fn contains(&self, line: usize) -> bool {
        line >= self.begin_line && line <= self.end_line
    }
}

/// Validated build configuration embedded in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMetadata {
    /// Relative path of the primary source inside the scaffold
    pub script_src: String,
    /// Shell command that produces `target_bin`
    pub build_cmd: String,
    /// Relative path of the produced executable
    pub target_bin: String,
    /// Extra project files, in declaration order
    pub files: Vec<AuxiliaryFile>,
    /// Runs before `build_cmd` only when the scaffold is created or on a full rebuild
    pub build_once_cmd: Option<String>,
    /// Replacement for a leading `#!` line in the scaffold copy
    pub replace_shebang_with: Option<String>,
    /// Command prefix used to launch the target (e.g. `java -jar`)
    pub target_interpreter: Option<String>,
    pub block: BlockSpan,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetadata {
    script_src: Option<String>,
    build_cmd: Option<String>,
    target_bin: Option<String>,
    files: Option<Vec<RawFile>>,
    build_once_cmd: Option<String>,
    replace_shebang_with: Option<String>,
    target_interpreter: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    path: Option<String>,
    content: Option<String>,
}

/// Parse the metadata block out of raw script bytes.
///
/// Only the block itself has to be UTF-8; the rest of the file is opaque.
pub fn parse_metadata(script_body: &[u8]) -> Result<ScriptMetadata, ParseError> {
    let (body, block) = extract_block(script_body)?;

    if body.trim().is_empty() {
        return Err(ParseError::MissingField("script_src"));
    }

    let raw: RawMetadata =
        serde_yaml::from_str(&body).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let metadata = validate(raw, block)?;
    debug!(
        script_src = %metadata.script_src,
        target_bin = %metadata.target_bin,
        files = metadata.files.len(),
        "metadata block parsed"
    );
    Ok(metadata)
}

/// Locate the block and return its body with the comment prefix removed
fn extract_block(script_body: &[u8]) -> Result<(String, BlockSpan), ParseError> {
    let mut body_lines: Vec<String> = Vec::new();
    let mut prefix_len: Option<usize> = None;
    let mut span: Option<BlockSpan> = None;
    let mut begin_line = 0;

    for (line_num, raw_line) in script_body.split(|b| *b == b'\n').enumerate() {
        let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);

        match prefix_len {
            None => {
                let Some(pos) = find_bytes(raw_line, BEGIN_MARKER.as_bytes()) else {
                    continue;
                };
                if span.is_some() {
                    return Err(ParseError::Malformed(format!(
                        "second `{BEGIN_MARKER}` marker on line {}",
                        line_num + 1
                    )));
                }
                prefix_len = Some(pos);
                begin_line = line_num;
            }
            Some(width) => {
                let line = std::str::from_utf8(raw_line).map_err(|_| {
                    ParseError::Malformed(format!("line {} is not valid UTF-8", line_num + 1))
                })?;
                let stripped = strip_prefix_width(line, width);
                if stripped.trim_start().starts_with(END_MARKER) {
                    span = Some(BlockSpan {
                        begin_line,
                        end_line: line_num,
                    });
                    prefix_len = None;
                } else {
                    body_lines.push(stripped.to_string());
                }
            }
        }
    }

    // Keep the final line break so a trailing `|` block keeps its newline
    span.map(|span| (body_lines.join("\n") + "\n", span))
        .ok_or(ParseError::MissingBlock)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Drop the first `width` bytes of a line, backing off to a char boundary
fn strip_prefix_width(line: &str, width: usize) -> &str {
    let mut cut = width.min(line.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    &line[cut..]
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ParseError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ParseError::MissingField(key)),
    }
}

fn validate(raw: RawMetadata, block: BlockSpan) -> Result<ScriptMetadata, ParseError> {
    let script_src = required(raw.script_src, "script_src")?;
    let build_cmd = required(raw.build_cmd, "build_cmd")?;
    let target_bin = required(raw.target_bin, "target_bin")?;

    check_relative(&script_src, "script_src")?;
    check_relative(&target_bin, "target_bin")?;

    if normalize(&script_src) == STATUS_FILE_NAME {
        return Err(ParseError::ReservedPath(script_src));
    }

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(normalize(&script_src));

    let mut files = Vec::new();
    for (index, entry) in raw.files.unwrap_or_default().into_iter().enumerate() {
        let path = match entry.path {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => return Err(ParseError::InvalidFileEntry { index, field: "path" }),
        };
        let content = entry.content.ok_or(ParseError::InvalidFileEntry {
            index,
            field: "content",
        })?;

        if normalize(&path) == STATUS_FILE_NAME {
            return Err(ParseError::ReservedPath(path));
        }
        if !seen.insert(normalize(&path)) {
            return Err(ParseError::DuplicatePath(path));
        }

        files.push(AuxiliaryFile { path, content });
    }

    Ok(ScriptMetadata {
        script_src,
        build_cmd,
        target_bin,
        files,
        build_once_cmd: raw.build_once_cmd.filter(|c| !c.trim().is_empty()),
        replace_shebang_with: raw.replace_shebang_with,
        target_interpreter: raw.target_interpreter.filter(|c| !c.trim().is_empty()),
        block,
    })
}

/// Both the script copy and the produced binary must live inside the scaffold
fn check_relative(path: &str, key: &'static str) -> Result<(), ParseError> {
    resolve_within(Path::new(""), path)
        .map(|_| ())
        .map_err(|e| ParseError::Malformed(format!("`{}`: {}", key, e)))
}

/// `./a/b` and `a/b` name the same scaffold file
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
