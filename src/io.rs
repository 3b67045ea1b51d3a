use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::common::CategoryId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

fn map_io_error(error: std::io::Error, path: &Path) -> AppError {
    AppError::Io(format!("I/O error at path '{}': {}", path.display(), error))
}

async fn write_file_async(fpath: &Path, data: &[u8]) -> AppResult<()> {
    let mut file = File::create(fpath)
        .await
        .map_err(|e| map_io_error(e, fpath))?;
    file.write_all(data)
        .await
        .map_err(|e| map_io_error(e, fpath))?;
    file.sync_all()
        .await
        .map_err(|e| map_io_error(e, fpath))?;

    Ok(())
}

fn temp_path_for(fpath: &Path) -> PathBuf {
    let mut name = fpath
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".tmp");
    fpath.with_file_name(name)
}

/// Writes to a sibling temp file and renames it over `fpath`, so readers see
/// either the old file or the complete new one.
pub async fn write_atomic(fpath: &Path, data: &[u8]) -> AppResult<()> {
    let tmp = temp_path_for(fpath);
    if let Err(e) = write_file_async(&tmp, data).await {
        if fs::try_exists(&tmp).await.unwrap_or(false) {
            let _ = fs::remove_file(&tmp).await;
        }
        return Err(e);
    }
    fs::rename(&tmp, fpath)
        .await
        .map_err(|e| map_io_error(e, fpath))
}

/// Reads the category seed file: one integer per line, blank lines ignored.
/// Any other content is an error naming the offending line.
pub async fn read_category_ids(fpath: &Path) -> AppResult<Vec<CategoryId>> {
    let content = fs::read_to_string(fpath).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::seed_file(fpath, 0, "file not found")
        } else {
            map_io_error(e, fpath)
        }
    })?;

    parse_category_ids(fpath, &content)
}

pub fn parse_category_ids(fpath: &Path, content: &str) -> AppResult<Vec<CategoryId>> {
    let mut ids = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id = trimmed.parse::<CategoryId>().map_err(|_| {
            AppError::seed_file(
                fpath,
                idx + 1,
                format!("'{}' is not a valid category id", trimmed),
            )
        })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Reads a one-name-per-line file. A missing file is an empty list. Lines
/// are kept verbatim apart from the line terminator; empty lines are dropped.
pub async fn read_name_list(fpath: &Path) -> AppResult<Vec<String>> {
    match fs::read_to_string(fpath).await {
        Ok(content) => Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log(
                LogLevel::Info,
                &format!("Name file '{}' does not exist yet.", fpath.display()),
            );
            Ok(Vec::new())
        }
        Err(e) => Err(map_io_error(e, fpath)),
    }
}

pub async fn write_sorted_lines<T: ToString>(fpath: &Path, items: &BTreeSet<T>) -> AppResult<()> {
    let mut body = String::new();
    for item in items {
        body.push_str(&item.to_string());
        body.push('\n');
    }
    write_atomic(fpath, body.as_bytes()).await
}
