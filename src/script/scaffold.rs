/// Scaffold materialization
///
/// Writes the throwaway build project (primary script plus auxiliary files)
/// into a cache entry directory.
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use super::metadata::ScriptMetadata;

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("failed to materialize {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScaffoldError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ScaffoldError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// What happens to the metadata block in the scaffold copy of the script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataPolicy {
    /// Copy the script verbatim
    #[default]
    Retain,
    /// Blank out the block lines, keeping line numbers stable
    Strip,
}

impl MetadataPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataPolicy::Retain => "retain",
            MetadataPolicy::Strip => "strip",
        }
    }
}

impl FromStr for MetadataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retain" => Ok(MetadataPolicy::Retain),
            "strip" => Ok(MetadataPolicy::Strip),
            _ => Err(format!(
                "Invalid metadata policy: {}. Use: retain, strip",
                s
            )),
        }
    }
}

/// Writes scaffolds for one metadata policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaffoldWriter {
    policy: MetadataPolicy,
}

impl ScaffoldWriter {
    pub fn new(policy: MetadataPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MetadataPolicy {
        self.policy
    }

    /// Materialize the scaffold in `dir`.
    ///
    /// Files whose content already matches are left untouched, so re-running on a
    /// populated directory is a no-op. Returns the number of files written.
    pub fn write(
        &self,
        dir: &Path,
        metadata: &ScriptMetadata,
        script_body: &[u8],
    ) -> Result<usize, ScaffoldError> {
        fs::create_dir_all(dir).map_err(|e| ScaffoldError::io(dir, e))?;

        let mut written = 0;

        let script = self.render_script(metadata, script_body);
        if write_if_changed(dir, &metadata.script_src, &script)? {
            written += 1;
        }

        for file in &metadata.files {
            if write_if_changed(dir, &file.path, file.content.as_bytes())? {
                written += 1;
            }
        }

        debug!(
            scaffold = %dir.display(),
            written,
            total = metadata.files.len() + 1,
            "scaffold materialized"
        );

        Ok(written)
    }

    /// Script bytes as they should appear in the scaffold
    pub fn render_script<'a>(
        &self,
        metadata: &ScriptMetadata,
        script_body: &'a [u8],
    ) -> Cow<'a, [u8]> {
        let replace = metadata
            .replace_shebang_with
            .as_deref()
            .filter(|_| script_body.starts_with(b"#!"));

        if replace.is_none() && self.policy == MetadataPolicy::Retain {
            return Cow::Borrowed(script_body);
        }

        let lines: Vec<&[u8]> = script_body
            .split(|b| *b == b'\n')
            .enumerate()
            .map(|(num, line)| {
                if num == 0 {
                    if let Some(replacement) = replace {
                        return replacement.as_bytes();
                    }
                }
                if self.policy == MetadataPolicy::Strip && metadata.block.contains(num) {
                    return &[][..];
                }
                line
            })
            .collect();

        Cow::Owned(lines.join(&b'\n'))
    }
}

/// Resolve a scaffold-relative path, refusing anything that leaves `root`
pub fn resolve_within(root: &Path, relative: &str) -> io::Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path `{}` escapes the scaffold directory", relative),
                ));
            }
        }
    }

    if depth == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path `{}` does not name a file", relative),
        ));
    }

    Ok(resolved)
}

fn write_if_changed(root: &Path, relative: &str, data: &[u8]) -> Result<bool, ScaffoldError> {
    let path = resolve_within(root, relative).map_err(|e| ScaffoldError::io(root.join(relative), e))?;

    if let Ok(existing) = fs::read(&path) {
        if existing == data {
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ScaffoldError::io(parent, e))?;
    }

    debug!("Writing {} bytes to {}", data.len(), path.display());
    fs::write(&path, data).map_err(|e| ScaffoldError::io(&path, e))?;

    Ok(true)
}
