//! 字节源：文件或内存
//!
//! 同一个字节源可以被重复打开，每个解码器拿到独立的读取流

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::io::MediaSource;

use super::decoder::DecodeError;

/// 音频数据来源
#[derive(Clone)]
pub enum ByteSource {
    File(PathBuf),
    Memory { name: String, bytes: Arc<[u8]> },
}

impl ByteSource {
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// 内存源，`name` 的扩展名用于格式探测
    pub fn memory(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory { name, .. } => name.clone(),
        }
    }

    /// 小写扩展名
    pub fn extension(&self) -> Option<String> {
        let ext = match self {
            Self::File(path) => path.extension().and_then(|e| e.to_str()),
            Self::Memory { name, .. } => Path::new(name).extension().and_then(|e| e.to_str()),
        };
        ext.map(str::to_lowercase)
    }

    /// 打开一个新的读取流
    pub fn open(&self) -> Result<Box<dyn MediaSource>, DecodeError> {
        match self {
            Self::File(path) => {
                let file = File::open(path).map_err(DecodeError::FileOpen)?;
                Ok(Box::new(file))
            }
            Self::Memory { bytes, .. } => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }

    /// 读取全部字节（无头 PCM 使用）
    pub fn read_all(&self) -> Result<Arc<[u8]>, DecodeError> {
        match self {
            Self::File(path) => {
                let bytes = std::fs::read(path).map_err(DecodeError::FileOpen)?;
                Ok(bytes.into())
            }
            Self::Memory { bytes, .. } => Ok(Arc::clone(bytes)),
        }
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Memory { name, bytes } => f
                .debug_struct("Memory")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}
