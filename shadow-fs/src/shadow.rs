//! # 影子快照层
//!
//! 固定容量的目录快照 FIFO：槽位 1 为最近一次提交，提交时整组后移，
//! 最旧的快照连同其数据块一起退役。快照与活动目录互不共享数据块，
//! 快照的物化即逐块深拷贝，因此分配器需要容得下提交集的两份拷贝。

use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;

use log::warn;

use crate::layout::{Directory, IndirectBlock, INDIRECT_PTRS, INODE_DIRECT, MAX_FILES};
use crate::sfs::ShadowFileSystem;
use crate::FsError;
use crate::FsResult;
use crate::DIR_COUNT;
use crate::SHADOW_COUNT;

impl ShadowFileSystem {
    /// 提交：活动目录进入快照 FIFO，最旧的快照退役。
    ///
    /// 提交后的活动目录是新快照的深拷贝，后续编辑只触碰新分配的块。
    pub fn commit(&mut self) -> FsResult<()> {
        self.drop_directory(SHADOW_COUNT)?;
        for slot in (1..DIR_COUNT).rev() {
            self.dirs[slot] = self.dirs[slot - 1].clone();
        }
        self.dirs[0] = Directory::new();

        let cloned = self.clone_directory(1);
        self.cache.sync_all()?;
        self.flush_all()?;
        cloned
    }

    /// 恢复：用快照 `shadow` 的深拷贝替换活动目录。`shadow == 0` 是空操作。
    pub fn restore(&mut self, shadow: usize) -> FsResult<()> {
        if shadow == 0 {
            return Ok(());
        }
        if shadow >= DIR_COUNT {
            warn!("invalid shadow index {shadow}");
            return Err(FsError::InvalidSnapshot);
        }

        self.drop_directory(0)?;
        let cloned = self.clone_directory(shadow);
        self.cache.sync_all()?;
        self.flush_all()?;
        cloned
    }

    /// 清空一个目录槽：释放其中每个文件的数据块与 inode
    fn drop_directory(&mut self, slot: usize) -> FsResult<()> {
        for index in 0..MAX_FILES {
            if !self.dirs[slot].get(index).is_empty() {
                self.release_file(slot, index)?;
                self.dirs[slot].get_mut(index).clear();
            }
        }
        self.flush_all()
    }

    /// 把快照 `shadow` 的每个文件深拷贝进活动目录。
    ///
    /// 中途分配失败即回滚：本次已创建的副本全部释放，活动目录保持为空，
    /// 源快照原封不动，腾出空间后可以再次恢复。
    fn clone_directory(&mut self, shadow: usize) -> FsResult<()> {
        let mut created: Vec<usize> = Vec::new();
        for index in 0..MAX_FILES {
            let source = self.dirs[shadow].get(index);
            if source.is_empty() {
                continue;
            }
            let name: String = source.name().to_string();
            let source_id = source.inode_id();

            let cloned = self.add_entry(&name).and_then(|slot| {
                created.push(slot);
                let target_id = self.dirs[0].get(slot).inode_id();
                self.clone_file(source_id, target_id)
            });
            if let Err(err) = cloned {
                warn!("not enough space to materialize shadow {shadow}, rolling back");
                for &slot in &created {
                    self.release_file(0, slot)?;
                    self.dirs[0].get_mut(slot).clear();
                }
                self.flush_all()?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// 逐块深拷贝一个文件；目标 inode 已由 `add_entry` 预备好首块
    fn clone_file(&mut self, source_id: u32, target_id: u32) -> FsResult<()> {
        let source = *self.inode(source_id);
        self.inode_mut(target_id).size = source.size;

        let target_first = self.inode(target_id).direct[0];
        self.copy_block(source.direct[0], target_first)?;

        for index in 1..INODE_DIRECT {
            if source.direct[index] == 0 {
                return Ok(());
            }
            let fresh = self.alloc_block()?;
            self.inode_mut(target_id).direct[index] = fresh;
            self.copy_block(source.direct[index], fresh)?;
        }

        if source.indirect == 0 {
            return Ok(());
        }
        let source_indirect = self.read_indirect(source.indirect)?;
        let indirect_block = self.alloc_block()?;
        self.inode_mut(target_id).indirect = indirect_block;

        // 失败也要先把已填好的指针落盘，回滚才能看到准确的指针表
        let mut target_indirect = IndirectBlock::zeroed();
        let mut failure = None;
        for index in 0..INDIRECT_PTRS {
            if source_indirect.ptrs[index] == 0 {
                break;
            }
            let copied = self.alloc_block().and_then(|fresh| {
                target_indirect.ptrs[index] = fresh;
                self.copy_block(source_indirect.ptrs[index], fresh)
            });
            if let Err(err) = copied {
                failure = Some(err);
                break;
            }
        }
        self.write_indirect(indirect_block, &target_indirect)?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
