use std::collections::HashMap;

use tracing::warn;

/// Default page size assumed when the manifest does not record one.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Plain,
    BerkeleyStore,
}

/// Per-file metadata recorded by the serializer in the manifest block.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub filename: String,
    /// 0 means unknown; consumers fall back to [`DEFAULT_PAGE_SIZE`].
    pub page_size: u32,
    /// Advisory; no page checksum algorithm is defined on this side of the
    /// pipeline.
    pub checksums: bool,
    pub sparse: bool,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn plain(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            page_size: 0,
            checksums: false,
            sparse: false,
            kind: FileKind::Plain,
        }
    }

    pub fn page_size_or_default(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE as usize
        } else {
            self.page_size as usize
        }
    }
}

/// Everything learned from the `MANIFEST` block.
#[derive(Debug, Default)]
pub struct ManifestSummary {
    pub files: HashMap<String, FileInfo>,
    /// Set by `SupportFilesOnly`; a sources-only archive needs no
    /// recovery pass.
    pub support_files_only: bool,
    /// The serializer may have renamed the primary configuration file; this
    /// records the name to restore it under.
    pub orig_lrl_name: Option<String>,
    /// Tokens forwarded verbatim to the external recovery command.
    pub options: Vec<String>,
}

/// Decode the manifest text into per-file metadata and run directives.
///
/// Unknown directives and malformed `File` lines are logged and skipped:
/// the manifest format grows over time and an old restore binary must keep
/// working against a newer serializer. Keys repeat with last-write-wins
/// semantics, matching the directive-override behavior of the source format.
pub fn parse_manifest(text: &str) -> ManifestSummary {
    let mut summary = ManifestSummary::default();

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = strip_comment(raw_line);
        let mut tokens = line.split_whitespace();
        let Some(directive) = tokens.next() else {
            continue;
        };

        match directive {
            "File" => match parse_file_attrs(&mut tokens) {
                Some(info) => {
                    summary.files.insert(info.filename.clone(), info);
                }
                None => {
                    warn!("bad File directive on line {} of MANIFEST", lineno);
                }
            },
            "SupportFilesOnly" => {
                summary.support_files_only = true;
            }
            "OrigLrlFile" => match tokens.next() {
                Some(name) => summary.orig_lrl_name = Some(name.to_string()),
                None => warn!("OrigLrlFile directive without a name on line {}", lineno),
            },
            "Option" => {
                summary.options.extend(tokens.map(str::to_string));
            }
            other => {
                warn!(
                    "unknown directive '{}' on line {} of MANIFEST",
                    other, lineno
                );
            }
        }
    }

    summary
}

/// Parse the attribute tail of a `File`/`New`/`Updated` directive:
/// `<name> [Type plain|berkdb] [PageSize <n>] [Checksums] [Sparse]`.
/// Returns `None` when the attributes are not coherent.
pub fn parse_file_attrs<'a, I>(tokens: &mut I) -> Option<FileInfo>
where
    I: Iterator<Item = &'a str>,
{
    let mut info = FileInfo::plain(tokens.next()?);

    while let Some(attr) = tokens.next() {
        match attr {
            "Type" => {
                info.kind = match tokens.next()? {
                    "plain" => FileKind::Plain,
                    "berkdb" => FileKind::BerkeleyStore,
                    _ => return None,
                };
            }
            "PageSize" => {
                info.page_size = tokens.next()?.parse().ok()?;
            }
            "Checksums" => info.checksums = true,
            "Sparse" => info.sparse = true,
            _ => return None,
        }
    }

    Some(info)
}

/// Classify a raw database file name and return the table (or queue) it
/// belongs to. The extension is everything after the FIRST dot, so
/// `fstblk.dta` is the `dta` file of table `fstblk` and never a `dta*`
/// match for some other stem.
pub fn recognize_data_file(filename: &str) -> Option<&str> {
    let dot = filename.find('.')?;
    let (stem, ext) = (&filename[..dot], &filename[dot + 1..]);
    if stem.is_empty() {
        return None;
    }
    if ext.starts_with("dta")
        || ext.starts_with("ix")
        || ext.starts_with("blob")
        || ext.starts_with("queuedb")
        || ext.starts_with("queue")
    {
        Some(stem)
    } else {
        None
    }
}

pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}
