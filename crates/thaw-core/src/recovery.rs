use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{Result, ThawError};

/// Invoke the external full-recovery command against the restored instance.
///
/// Blocks until the command finishes; recovery has its own process model
/// and no timeout applies here. A non-zero exit fails the whole restore.
pub fn run_full_recovery(
    task: &str,
    db_name: &str,
    lrl_path: &Path,
    options: &[String],
) -> Result<()> {
    let mut cmd = Command::new(task);
    cmd.arg(db_name)
        .arg("-lrl")
        .arg(lrl_path)
        .arg("-fullrecovery")
        .args(options);

    let rendered = render(task, db_name, lrl_path, options);
    info!("running full recovery: {}", rendered);

    let status = cmd.status().map_err(|e| {
        ThawError::Other(format!("could not run recovery command '{}': {}", rendered, e))
    })?;

    if !status.success() {
        return Err(ThawError::Recovery {
            command: rendered,
            code: status.code().unwrap_or(-1),
        });
    }
    info!("full recovery successful");
    Ok(())
}

fn render(task: &str, db_name: &str, lrl_path: &Path, options: &[String]) -> String {
    let mut out = format!(
        "{} {} -lrl {} -fullrecovery",
        task,
        db_name,
        lrl_path.display()
    );
    for opt in options {
        out.push(' ');
        out.push_str(opt);
    }
    out
}
