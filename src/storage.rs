// ==========================================
// 文件数据仓储 (FDW) - 文件存储
// ==========================================
// 职责: 上传文件与导出文件的落盘（相对 base_dir 的路径约定）
// 约定:
// - 上传: project/media/dataset/<Mon-YYYY>/<name>_<5 位 hex><ext>
// - 导出: project/media/downloads/<files|templates|columns>/<Mon-YYYY>/<name> - <ts>.<fmt>
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DATASET_MEDIA_DIR: &str = "project/media/dataset";
pub const DOWNLOAD_MEDIA_DIR: &str = "project/media/downloads";

/// 导出文件分类目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFolder {
    Files,
    Templates,
    Columns,
}

impl DownloadFolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFolder::Files => "files",
            DownloadFolder::Templates => "templates",
            DownloadFolder::Columns => "columns",
        }
    }
}

/// 数据集名 → 文件名前缀（去尾部空白，空格换下划线，小写）
pub fn filename_prefix(dataset_name: &str) -> String {
    dataset_name.trim_end().replace(' ', "_").to_lowercase()
}

/// 上传文件的相对目录与存储文件名
///
/// `ext` 带或不带前导点均可，统一为小写。
pub fn upload_location(dataset_name: &str, ext: &str, now: DateTime<Utc>) -> (PathBuf, String) {
    let ext = ext.trim_start_matches('.').to_lowercase();
    let hex = Uuid::new_v4().simple().to_string();
    let uuid_filename = format!("{}_{}.{}", filename_prefix(dataset_name), &hex[..5], ext);
    let dir = Path::new(DATASET_MEDIA_DIR).join(now.format("%b-%Y").to_string());
    (dir, uuid_filename)
}

/// 人工建表时资源描述的相对路径（无数据文件）
pub fn manual_resource_location(dataset_name: &str, now: DateTime<Utc>) -> PathBuf {
    let hex = Uuid::new_v4().simple().to_string();
    Path::new(DATASET_MEDIA_DIR)
        .join(now.format("%b-%Y").to_string())
        .join(format!(
            "{}_{}{}",
            filename_prefix(dataset_name),
            &hex[..5],
            crate::importer::schema_resource::RESOURCE_SUFFIX
        ))
}

/// 导出文件的相对目录与文件名
pub fn download_location(
    folder: DownloadFolder,
    dataset_name: &str,
    extension: &str,
    now: DateTime<Utc>,
) -> (PathBuf, String) {
    let dir = Path::new(DOWNLOAD_MEDIA_DIR)
        .join(folder.as_str())
        .join(now.format("%b-%Y").to_string());
    let filename = format!(
        "{} - {}.{}",
        dataset_name,
        now.format("%Y%m%d%H%M%S"),
        extension
    );
    (dir, filename)
}

// ==========================================
// FileStorage Trait
// ==========================================
// 实现者: LocalFileStorage
pub trait FileStorage: Send + Sync {
    /// 存储根目录
    fn base_dir(&self) -> &Path;

    /// 相对路径 → 绝对路径
    fn resolve(&self, relative: &Path) -> PathBuf {
        self.base_dir().join(relative)
    }

    /// 写入流（自动创建父目录），返回写入字节数
    fn save(&self, relative: &Path, reader: &mut dyn Read) -> ImportResult<u64>;

    /// 确保相对目录存在，返回绝对路径
    fn ensure_dir(&self, relative: &Path) -> ImportResult<PathBuf>;

    fn exists(&self, relative: &Path) -> bool {
        self.resolve(relative).exists()
    }
}

// ==========================================
// LocalFileStorage - 本地磁盘
// ==========================================
pub struct LocalFileStorage {
    base_dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl FileStorage for LocalFileStorage {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn save(&self, relative: &Path, reader: &mut dyn Read) -> ImportResult<u64> {
        let target = self.resolve(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ImportError::FileWriteError(format!("{}: {}", parent.display(), e)))?;
        }

        let file = File::create(&target)
            .map_err(|e| ImportError::FileWriteError(format!("{}: {}", target.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let written = std::io::copy(reader, &mut writer)
            .map_err(|e| ImportError::FileWriteError(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| ImportError::FileWriteError(e.to_string()))?;

        tracing::debug!(path = %target.display(), bytes = written, "文件已保存");
        Ok(written)
    }

    fn ensure_dir(&self, relative: &Path) -> ImportResult<PathBuf> {
        let dir = self.resolve(relative);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ImportError::FileWriteError(format!("{}: {}", dir.display(), e)))?;
        Ok(dir)
    }
}
