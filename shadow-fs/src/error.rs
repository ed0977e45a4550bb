//! 原型实现混用 0/-1 与空指针多种失败约定，这里统一为单一的结果类型。
//! 所有错误只报告、不重试；失败现场另以日志记录诊断信息。

use core::fmt;

pub type FsResult<T> = Result<T, FsError>;

/// 文件系统各层的错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 活动目录中不存在该文件名
    NotFound,
    /// 同名文件已处于打开状态
    AlreadyOpen,
    /// 打开文件表已满
    FdTableFull,
    /// inode 表已满
    InodeTableFull,
    /// 活动目录已满
    DirectoryFull,
    /// 数据区没有空闲块
    NoFreeBlock,
    /// 直接与间接指针均已用尽
    PointerListExhausted,
    /// 文件名为空或超长
    InvalidName,
    /// 描述符越界或未打开
    BadDescriptor,
    /// 影子槽位编号越界
    InvalidSnapshot,
    /// 目标位置所在块不存在，或越过文件末尾
    InvalidSeek,
    /// 磁盘镜像校验失败
    Corrupted,
    /// 块设备读写失败
    Io,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NotFound => "file does not exist",
            Self::AlreadyOpen => "file already open",
            Self::FdTableFull => "file descriptor table is full",
            Self::InodeTableFull => "no free inodes",
            Self::DirectoryFull => "directory is full",
            Self::NoFreeBlock => "no free blocks",
            Self::PointerListExhausted => "out of block pointers",
            Self::InvalidName => "invalid file name",
            Self::BadDescriptor => "invalid file descriptor",
            Self::InvalidSnapshot => "invalid shadow index",
            Self::InvalidSeek => "seek location does not exist",
            Self::Corrupted => "file system image is corrupted",
            Self::Io => "block device error",
        };
        write!(f, "{message}")
    }
}
