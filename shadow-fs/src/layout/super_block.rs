use core::mem::size_of;

use super::inode::{INODE_FILE_BLOCKS, INODE_SIZE};
use super::BlockRepr;
use super::Inode;
use crate::BLOCK_COUNT;
use crate::BLOCK_SIZE;
use crate::DIR_COUNT;
use crate::INODE_COUNT;
use crate::MAGIC;

/// 超级块可容纳的 j-node 数量
const JNODE_COUNT: usize = (BLOCK_SIZE - 4 * size_of::<u32>()) / INODE_SIZE;

const SUPER_PAD: usize = BLOCK_SIZE - 4 * size_of::<u32>() - JNODE_COUNT * INODE_SIZE;

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录几何参数与各目录快照的根 j-node
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub inode_count: u32,
    /// 每个目录快照对 inode 文件视图的根索引节点
    j_nodes: [Inode; JNODE_COUNT],
    _pad: [u8; SUPER_PAD],
}

unsafe impl BlockRepr for SuperBlock {}

impl SuperBlock {
    pub fn new() -> Self {
        Self {
            magic: 0,
            block_size: 0,
            block_count: 0,
            inode_count: 0,
            j_nodes: [Inode::free(); JNODE_COUNT],
            _pad: [0; SUPER_PAD],
        }
    }

    /// 格式化时写入几何参数与根 j-node；此后超级块不再变化
    pub fn init(&mut self) {
        self.magic = MAGIC;
        self.block_size = BLOCK_SIZE as u32;
        self.block_count = BLOCK_COUNT as u32;
        self.inode_count = INODE_COUNT as u32;

        // 各快照共享同一个 inode 文件，根 j-node 指向 inode 文件的各块
        for j_node in &mut self.j_nodes {
            j_node.clear();
        }
        for j_node in self.j_nodes.iter_mut().take(DIR_COUNT) {
            j_node.size = (INODE_COUNT * INODE_SIZE) as i32;
            for (index, ptr) in j_node.direct.iter_mut().take(INODE_FILE_BLOCKS).enumerate() {
                *ptr = (index + 1) as u32;
            }
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && self.block_size == BLOCK_SIZE as u32
            && self.block_count == BLOCK_COUNT as u32
            && self.inode_count == INODE_COUNT as u32
    }
}
