use core::mem::size_of;

use super::BlockRepr;
use crate::BLOCK_SIZE;
use crate::INODE_COUNT;

/// 每个 inode 的直接指针数量
pub const INODE_DIRECT: usize = 14;
/// inode 的定长编码大小
pub const INODE_SIZE: usize = size_of::<Inode>();
/// 单块可容纳的 inode 数量
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
/// inode 文件占据的块数
pub const INODE_FILE_BLOCKS: usize = INODE_COUNT.div_ceil(INODES_PER_BLOCK);
/// 间接块可容纳的块指针数量
pub const INDIRECT_PTRS: usize = BLOCK_SIZE / size_of::<u32>();

/// 文件的索引节点：字节大小加一张稠密的块指针表
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Inode {
    /// 文件字节数；`-1` 表示空闲
    pub size: i32,
    /// 直接指针，自下标 0 稠密排列，首个零即终止
    pub direct: [u32; INODE_DIRECT],
    /// 间接指针块的块号；`0` 表示尚未分配
    pub indirect: u32,
}

const _: () = assert!(INODE_SIZE == 64);

impl Inode {
    /// 空闲状态：`size == -1` 且指针全零
    pub const fn free() -> Self {
        Self {
            size: -1,
            direct: [0; INODE_DIRECT],
            indirect: 0,
        }
    }

    /// 就地重置为空闲状态
    pub fn clear(&mut self) {
        *self = Self::free();
    }

    /// 分配判定：首个数据块已被指派即视为在用
    #[inline]
    pub fn is_free(&self) -> bool {
        self.direct[0] == 0
    }

    /// 直接指针中首个空槽
    #[inline]
    pub fn first_free_direct(&self) -> Option<usize> {
        self.direct.iter().position(|&ptr| ptr == 0)
    }
}

/// 间接指针块：零终止的块号表
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IndirectBlock {
    pub ptrs: [u32; INDIRECT_PTRS],
}

unsafe impl BlockRepr for IndirectBlock {}

impl IndirectBlock {
    pub const fn zeroed() -> Self {
        Self {
            ptrs: [0; INDIRECT_PTRS],
        }
    }
}

/// inode 文件中的一块
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InodeBlock {
    inodes: [Inode; INODES_PER_BLOCK],
}

unsafe impl BlockRepr for InodeBlock {}

/// 全部 inode 的定长数组，常驻内存，按块冲刷
pub struct InodeFile {
    blocks: [InodeBlock; INODE_FILE_BLOCKS],
}

impl InodeFile {
    pub fn new() -> Self {
        Self {
            blocks: [InodeBlock {
                inodes: [Inode::free(); INODES_PER_BLOCK],
            }; INODE_FILE_BLOCKS],
        }
    }

    /// inode 在 inode 文件中的块下标
    #[inline]
    pub fn block_of(id: u32) -> usize {
        id as usize / INODES_PER_BLOCK
    }

    #[inline]
    pub fn get(&self, id: u32) -> &Inode {
        &self.blocks[Self::block_of(id)].inodes[id as usize % INODES_PER_BLOCK]
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> &mut Inode {
        &mut self.blocks[Self::block_of(id)].inodes[id as usize % INODES_PER_BLOCK]
    }

    pub fn block(&self, index: usize) -> &InodeBlock {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut InodeBlock {
        &mut self.blocks[index]
    }

    /// 首个空闲 inode 的编号
    pub fn first_free(&self) -> Option<u32> {
        (0..INODE_COUNT as u32).find(|&id| self.get(id).is_free())
    }
}
