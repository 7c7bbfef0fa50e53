//! 原子写入工具。
//!
//! 先把归档或明文写入同目录下的临时文件，全部成功后再 rename 替换目标文件。
//! 解密途中认证失败时，目标文件保持原样，不会留下半截明文。

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::Result;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 临时文件守卫：未提交即被丢弃时删除临时文件
struct TmpFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for TmpFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// 原子写文件。
///
/// 流程：
/// 1. 在目标目录创建临时文件；
/// 2. 调用 `write_fn` 写入完整内容；
/// 3. flush + fsync 后 rename 替换目标文件。
///
/// 任一步失败都会删除临时文件并返回错误。
pub fn write_atomic<F>(target: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "目标路径没有父目录，无法执行原子写入",
            )
            .into());
        }
    };

    fs::create_dir_all(parent)?;

    let mut tmp = TmpFile {
        path: build_tmp_path(parent, target.file_name()),
        committed: false,
    };
    let mut writer = BufWriter::new(File::create(&tmp.path)?);

    write_fn(&mut writer)?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    // Windows 上 rename 不会覆盖已存在的文件
    if cfg!(windows) && target.exists() {
        fs::remove_file(target)?;
    }
    fs::rename(&tmp.path, target)?;
    tmp.committed = true;

    debug!(target = %target.display(), "output committed");
    Ok(())
}

fn build_tmp_path(parent: &Path, file_name: Option<&std::ffi::OsStr>) -> PathBuf {
    let base_name = file_name
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("archive-output");

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);

    parent.join(format!(
        ".{base_name}.tmp-{}-{timestamp}-{counter}",
        std::process::id()
    ))
}
