use std::path::PathBuf;

use tracing::warn;

use crate::config::RestoreOptions;
use crate::context::RestoreContext;
use crate::error::{Result, ThawError};
use crate::manifest::strip_comment;
use crate::platform::paths::{base_name, make_abs};

/// Rewrite the serialized configuration file so every path points at the
/// destination layout.
///
/// Side effects on the context: the database name and data directory are
/// pinned from their first occurrence (when the caller did not pin them),
/// and every `table` directive's name is recorded.
///
/// Referencing `table`/`resource`/`spfile`/`timepartitions` before the data
/// directory is resolved is a format error; without a directory there is
/// nothing to rewrite the path against.
pub fn rewrite_lrl(
    filename: &str,
    text: &str,
    opts: &RestoreOptions,
    ctx: &mut RestoreContext,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = rewrite_line(filename, raw_line, lineno, opts, ctx)?;
        out.push_str(&line);
        out.push('\n');
    }

    Ok(out)
}

fn rewrite_line(
    filename: &str,
    raw_line: &str,
    lineno: usize,
    opts: &RestoreOptions,
    ctx: &mut RestoreContext,
) -> Result<String> {
    let err = |msg: &str| ThawError::Lrl {
        file: filename.to_string(),
        line: lineno,
        msg: msg.to_string(),
    };

    let bare = strip_comment(raw_line);
    let mut tokens = bare.split_whitespace();
    let Some(directive) = tokens.next() else {
        return Ok(raw_line.to_string());
    };

    match directive {
        "name" => {
            let name = tokens.next().ok_or_else(|| err("missing database name"))?;
            match &ctx.db_name {
                None => ctx.db_name = Some(name.to_string()),
                Some(current) if current != name => {
                    warn!(
                        "{}:{}: repeated name directive '{}' ignored, keeping '{}'",
                        filename, lineno, name, current
                    );
                }
                Some(_) => {}
            }
            Ok(raw_line.to_string())
        }

        "dir" => {
            let dir = tokens
                .next()
                .ok_or_else(|| err("missing database directory"))?;
            match &ctx.data_dir {
                None => {
                    ctx.data_dir = Some(PathBuf::from(dir.trim_end_matches('/')));
                }
                Some(current) if current.to_string_lossy() != dir.trim_end_matches('/') => {
                    warn!(
                        "{}:{}: dir directive '{}' ignored, destination is {}",
                        filename,
                        lineno,
                        dir,
                        current.display()
                    );
                }
                Some(_) => {}
            }
            // ctx.data_dir is always Some here.
            let dest = ctx.data_dir.as_ref().unwrap();
            Ok(format!("dir {}", dest.display()))
        }

        "table" => {
            let name = tokens.next().ok_or_else(|| err("missing table name"))?;
            let schema_path = tokens
                .next()
                .ok_or_else(|| err("missing table schema path"))?;
            let dbnum = tokens.next();

            // Schema files keep their base name; `.lrl` schemas live with
            // the configuration, everything else with the data. The suffix
            // test uses the last dot, so `v1.2/tbl.csc2` is a `csc2` file.
            let suffix = schema_path.rsplit('.').next().unwrap_or("");
            let base = base_name(schema_path);
            let new_path = if suffix == "lrl" {
                let lrl_dir = ctx
                    .lrl_dir
                    .as_ref()
                    .or(ctx.data_dir.as_ref())
                    .ok_or_else(|| err("table directive before dir; cannot infer data directory"))?;
                make_abs(lrl_dir, base)
            } else {
                let data_dir = ctx
                    .data_dir
                    .as_ref()
                    .ok_or_else(|| err("table directive before dir; cannot infer data directory"))?;
                make_abs(data_dir, base)
            };

            ctx.tables.insert(name.to_string());

            Ok(match dbnum {
                Some(n) => format!("table {} {} {}", name, new_path, n),
                None => format!("table {} {}", name, new_path),
            })
        }

        "resource" => {
            let name = tokens.next().ok_or_else(|| err("missing resource name"))?;
            let path = tokens.next().ok_or_else(|| err("missing resource path"))?;
            let data_dir = ctx
                .data_dir
                .as_ref()
                .ok_or_else(|| err("resource directive before dir; cannot infer data directory"))?;
            Ok(format!(
                "resource {} {}",
                name,
                make_abs(data_dir, base_name(path))
            ))
        }

        "spfile" | "timepartitions" => {
            let path = tokens
                .next()
                .ok_or_else(|| err(&format!("missing {} path", directive)))?;
            let data_dir = ctx.data_dir.as_ref().ok_or_else(|| {
                err(&format!(
                    "{} directive before dir; cannot infer data directory",
                    directive
                ))
            })?;
            Ok(format!(
                "{} {}",
                directive,
                make_abs(data_dir, base_name(path))
            ))
        }

        "cluster" if opts.strip_cluster_info && tokens.next() == Some("nodes") => {
            // Commented out rather than deleted so diagnostics keep their
            // line numbers.
            Ok(format!("# {}", raw_line))
        }

        mut tok if opts.strip_consumer_info => {
            if tok == "if" {
                // `if <machine-type> <directive> ...`: test the real
                // directive behind the conditional prefix.
                tokens.next();
                tok = match tokens.next() {
                    Some(t) => t,
                    None => return Ok(raw_line.to_string()),
                };
            }
            if tok == "queue"
                || tok == "procedure"
                || tok == "consumer"
                || tok.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("ssl"))
            {
                Ok(format!("# {}", raw_line))
            } else {
                Ok(raw_line.to_string())
            }
        }

        _ => Ok(raw_line.to_string()),
    }
}
