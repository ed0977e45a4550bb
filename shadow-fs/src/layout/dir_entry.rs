use core::mem::size_of;
use core::str;

use super::BlockRepr;
use crate::BLOCK_SIZE;

/// 文件名的最大长度
pub const NAME_MAX_LEN: usize = 20;

/// 目录项的定长编码大小
pub const DIR_ENTRY_SIZE: usize = size_of::<DirEntry>();

/// 单块目录可容纳的文件数
pub const MAX_FILES: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

const DIR_PAD: usize = BLOCK_SIZE - MAX_FILES * DIR_ENTRY_SIZE;

/// 目录项：文件名到 inode 编号的映射
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    // 最后一字节留给 \0
    name: [u8; NAME_MAX_LEN + 1],
    _pad: [u8; 3],
    inode_id: u32,
}

const _: () = assert!(DIR_ENTRY_SIZE == 28);

impl DirEntry {
    pub fn new(name: &str, inode_id: u32) -> Self {
        let bytes = name.as_bytes();
        let mut name = [0; NAME_MAX_LEN + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            name,
            _pad: [0; 3],
            inode_id,
        }
    }

    pub const fn empty() -> Self {
        Self {
            name: [0; NAME_MAX_LEN + 1],
            _pad: [0; 3],
            inode_id: 0,
        }
    }

    /// 空槽判定：名字首字节为 \0
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap();
        str::from_utf8(&self.name[..len]).unwrap()
    }

    #[inline]
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }
}

/// 单块平铺目录
#[derive(Clone)]
#[repr(C)]
pub struct Directory {
    entries: [DirEntry; MAX_FILES],
    _pad: [u8; DIR_PAD],
}

unsafe impl BlockRepr for Directory {}

impl Directory {
    pub fn new() -> Self {
        Self {
            entries: [DirEntry::empty(); MAX_FILES],
            _pad: [0; DIR_PAD],
        }
    }

    /// 按名查找，返回槽位下标
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_empty() && entry.name() == name)
    }

    /// 首个空槽
    pub fn first_free(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_empty)
    }

    #[inline]
    pub fn get(&self, index: usize) -> &DirEntry {
        &self.entries[index]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut DirEntry {
        &mut self.entries[index]
    }
}
