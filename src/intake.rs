//! Upload intake: validate a client file and copy it into the input
//! directory, producing the `input_reference` a job is submitted with.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::IntakeError;

const CSV_EXTENSION: &str = ".csv";

/// Suffixed names tried after the plain one is taken.
const NAME_ATTEMPTS: usize = 8;

/// Copy `src` into `input_dir` under a sanitized name and return the stored
/// path. An existing file of the same name is never overwritten; the new
/// copy gets a short unique suffix instead.
pub async fn accept(src: &Path, input_dir: &Path) -> Result<PathBuf, IntakeError> {
    let raw_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if raw_name.is_empty() {
        return Err(IntakeError::Missing(src.to_path_buf()));
    }
    if !raw_name.ends_with(CSV_EXTENSION) {
        return Err(IntakeError::NotCsv(raw_name));
    }
    let mut source = match File::open(src).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(IntakeError::Missing(src.to_path_buf())),
        Err(e) => return Err(e.into()),
    };

    let name = sanitize_file_name(&raw_name);
    let stem = name.strip_suffix(CSV_EXTENSION).unwrap_or(&name);
    if stem.is_empty() || stem.chars().all(|c| c == '_') {
        return Err(IntakeError::EmptyName);
    }

    tokio::fs::create_dir_all(input_dir).await?;
    let (target, mut stored) = create_target(input_dir, &name, stem).await?;

    let copied = async {
        tokio::io::copy(&mut source, &mut stored).await?;
        stored.flush().await
    }
    .await;
    if let Err(e) = copied {
        drop(stored);
        if let Err(cleanup) = tokio::fs::remove_file(&target).await {
            tracing::warn!(stored = %target.display(), error = %cleanup, "failed to remove partial upload");
        }
        return Err(e.into());
    }

    tracing::info!(src = %src.display(), stored = %target.display(), "accepted upload");
    Ok(target)
}

/// Create the stored file exclusively, so two uploads of the same name
/// never share a target.
async fn create_target(input_dir: &Path, name: &str, stem: &str) -> Result<(PathBuf, File), IntakeError> {
    let mut target = input_dir.join(name);
    let mut last = None;
    for _ in 0..=NAME_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => return Ok((target, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                target = input_dir.join(format!("{stem}-{}{CSV_EXTENSION}", &suffix[..8]));
                last = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last
        .unwrap_or_else(|| std::io::Error::from(ErrorKind::AlreadyExists))
        .into())
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_` and drop leading dots.
pub fn sanitize_file_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_start_matches('.').to_string()
}
