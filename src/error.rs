use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    #[error("data store free space below threshold")]
    DataNoSpace,

    #[error("index store free space below threshold")]
    IndexNoSpace,

    #[error("key already exists")]
    KeyExists,

    #[error("name already exists")]
    NameExists,

    #[error("not exists")]
    NotExists,

    #[error("head magic not match in {path}")]
    HeadMagic { path: String },

    #[error("head version not match in {path}")]
    HeadVersion { path: String },

    #[error("block magic not match")]
    BlockMagic,

    #[error("block sizes not match")]
    BlockSizes,

    #[error("block buffer too short")]
    BlockShort,

    #[error("index block offset out of order")]
    BlockOffset,

    #[error("index block size out of range")]
    BlockSize,

    #[error("file closed")]
    FileClosed,

    #[error("volume closed")]
    VolumeClosed,

    #[error("clock moved backwards, refusing for {0} milliseconds")]
    ClockBackwards(u64),

    #[error("machine id out of range: {0}")]
    MachineId(u64),

    #[error("batch count out of range: {0}")]
    BatchCount(usize),

    #[error("volume id overflow: {0}")]
    VolumeIdOverflow(u64),

    #[error("file already locked by ({0})")]
    Locked(String),
}

impl Error {
    /// Attach the offending path to an OS error.
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Error {
        Error::Io {
            source,
            path: path.display().to_string(),
        }
    }
}
