//! # 磁盘块管理器层
//!
//! [`ShadowFileSystem`] 持有磁盘结构的内存镜像与打开文件表，
//! 所有变更先作用于镜像，再按各操作规定的冲刷集合同步写盘。

use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use core::array;

use log::warn;

use crate::block_cache::BlockCacheManager;
use crate::file::OpenFileTable;
use crate::layout::{
    Bitmap, BlockRepr, DirEntry, Directory, IndirectBlock, Inode, InodeFile, SuperBlock,
    INDIRECT_PTRS, INODE_DIRECT, INODE_FILE_BLOCKS, MAX_FILES,
};
use crate::BlockDevice;
use crate::DataBlock;
use crate::FsError;
use crate::FsResult;
use crate::BLOCK_COUNT;
use crate::BLOCK_SIZE;
use crate::DIR_COUNT;
use crate::SHADOW_COUNT;

/// inode 文件的起始块
pub(crate) const INODE_FILE_START: usize = 1;
/// 数据区的首块
pub(crate) const FIRST_DATA_BLOCK: usize = INODE_FILE_START + INODE_FILE_BLOCKS;
/// 数据区的末块（含）
pub(crate) const LAST_DATA_BLOCK: usize = BLOCK_COUNT - 3 - DIR_COUNT;
/// 空闲位图所在块
pub(crate) const FREE_MAP_BLOCK: usize = BLOCK_COUNT - 2;
/// 写掩码所在块
pub(crate) const WRITE_MASK_BLOCK: usize = BLOCK_COUNT - 1;

/// 目录槽位 `slot` 的块号
pub(crate) const fn dir_block(slot: usize) -> usize {
    BLOCK_COUNT - 2 - (slot + 1)
}

/// 影子文件系统的句柄：内存镜像、数据块缓存与打开文件表
pub struct ShadowFileSystem {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) cache: BlockCacheManager,
    pub(crate) super_block: SuperBlock,
    pub(crate) inodes: InodeFile,
    pub(crate) dirs: [Directory; DIR_COUNT],
    pub(crate) free_map: Bitmap,
    pub(crate) write_mask: Bitmap,
    pub(crate) open_files: OpenFileTable,
    name_cursor: usize,
}

impl ShadowFileSystem {
    fn empty(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            cache: BlockCacheManager::new(),
            super_block: SuperBlock::new(),
            inodes: InodeFile::new(),
            dirs: array::from_fn(|_| Directory::new()),
            free_map: Bitmap::new(),
            write_mask: Bitmap::new(),
            open_files: OpenFileTable::new(),
            name_cursor: 0,
        }
    }

    /// 格式化：在空白设备上建立全新文件系统并整体落盘
    pub fn format(device: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let mut fs = Self::empty(device);
        fs.super_block.init();

        // inode 0..DIR_COUNT 被目录槽永久占用，指向各自的目录块，
        // 因而永远不会被 inode 分配器选中
        for slot in 0..DIR_COUNT {
            let inode = fs.inodes.get_mut(slot as u32);
            inode.size = 0;
            inode.direct[0] = dir_block(slot) as u32;
        }

        fs.free_map.fill();
        fs.write_mask.fill();
        for block in (0..FIRST_DATA_BLOCK).chain(dir_block(SHADOW_COUNT)..BLOCK_COUNT) {
            fs.free_map.clear(block);
            fs.write_mask.clear(block);
        }

        fs.flush_all()?;
        Ok(fs)
    }

    /// 挂载：载入既有镜像，校验失败则拒绝
    pub fn mount(device: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let mut fs = Self::empty(device);

        fs.device.read_block(0, fs.super_block.as_bytes_mut())?;
        if !fs.super_block.is_valid() {
            warn!("bad magic or geometry, refusing to mount");
            return Err(FsError::Corrupted);
        }

        for index in 0..INODE_FILE_BLOCKS {
            fs.device.read_block(
                INODE_FILE_START + index,
                fs.inodes.block_mut(index).as_bytes_mut(),
            )?;
        }
        for slot in 0..DIR_COUNT {
            fs.device
                .read_block(dir_block(slot), fs.dirs[slot].as_bytes_mut())?;
        }
        fs.device
            .read_block(FREE_MAP_BLOCK, fs.free_map.as_bytes_mut())?;
        fs.device
            .read_block(WRITE_MASK_BLOCK, fs.write_mask.as_bytes_mut())?;

        // 保留区必须全部标记为已占用
        let mut reserved = (0..FIRST_DATA_BLOCK).chain(dir_block(SHADOW_COUNT)..BLOCK_COUNT);
        if reserved.any(|block| fs.free_map.test(block)) {
            warn!("free bitmap marks a reserved block as free, refusing to mount");
            return Err(FsError::Corrupted);
        }

        Ok(fs)
    }
}

/// 冲刷协议：每个元数据区各有一把直达设备的刷子
impl ShadowFileSystem {
    pub(crate) fn flush_super(&self) -> FsResult<()> {
        self.device.write_block(0, self.super_block.as_bytes())
    }

    pub(crate) fn flush_inode_file(&self) -> FsResult<()> {
        for index in 0..INODE_FILE_BLOCKS {
            self.device
                .write_block(INODE_FILE_START + index, self.inodes.block(index).as_bytes())?;
        }
        Ok(())
    }

    /// 只冲刷容纳指定 inode 的那一块
    pub(crate) fn flush_inode_block(&self, id: u32) -> FsResult<()> {
        let index = InodeFile::block_of(id);
        self.device
            .write_block(INODE_FILE_START + index, self.inodes.block(index).as_bytes())
    }

    pub(crate) fn flush_dir(&self, slot: usize) -> FsResult<()> {
        self.device
            .write_block(dir_block(slot), self.dirs[slot].as_bytes())
    }

    pub(crate) fn flush_maps(&self) -> FsResult<()> {
        self.device
            .write_block(FREE_MAP_BLOCK, self.free_map.as_bytes())?;
        self.device
            .write_block(WRITE_MASK_BLOCK, self.write_mask.as_bytes())
    }

    /// 整体落盘：超级块、两张位图、inode 文件与全部目录槽
    pub(crate) fn flush_all(&self) -> FsResult<()> {
        self.flush_super()?;
        self.flush_maps()?;
        self.flush_inode_file()?;
        for slot in 0..DIR_COUNT {
            self.flush_dir(slot)?;
        }
        Ok(())
    }
}

/// 分配器
impl ShadowFileSystem {
    /// 数据区内首个空闲块；只清空闲位图，写掩码在释放时补位
    pub(crate) fn alloc_block(&mut self) -> FsResult<u32> {
        match self.free_map.alloc_in(FIRST_DATA_BLOCK..=LAST_DATA_BLOCK) {
            Some(block) => Ok(block as u32),
            None => {
                warn!("no free blocks");
                Err(FsError::NoFreeBlock)
            }
        }
    }

    pub(crate) fn free_block(&mut self, block: u32) {
        self.free_map.set(block as usize);
        self.write_mask.set(block as usize);
    }

    pub(crate) fn alloc_inode(&self) -> FsResult<u32> {
        self.inodes.first_free().ok_or_else(|| {
            warn!("no free inodes");
            FsError::InodeTableFull
        })
    }
}

/// 数据区块经由缓存的读写
impl ShadowFileSystem {
    /// 读取一个间接指针块的副本
    pub(crate) fn read_indirect(&mut self, block: u32) -> FsResult<IndirectBlock> {
        let cache = self.cache.get(block as usize, self.device.clone())?;
        let copied = cache.lock().map(0, |indirect: &IndirectBlock| *indirect);
        Ok(copied)
    }

    /// 覆写一个间接指针块并立即落盘
    pub(crate) fn write_indirect(&mut self, block: u32, indirect: &IndirectBlock) -> FsResult<()> {
        let cache = self.cache.get(block as usize, self.device.clone())?;
        let mut guard = cache.lock();
        guard.map_mut(0, |target: &mut IndirectBlock| *target = *indirect);
        guard.sync()
    }

    /// 把一个数据块的内容整块复制到另一块
    pub(crate) fn copy_block(&mut self, src: u32, dst: u32) -> FsResult<()> {
        let data = {
            let cache = self.cache.get(src as usize, self.device.clone())?;
            let copied = cache.lock().map(0, |block: &DataBlock| *block);
            copied
        };
        let cache = self.cache.get(dst as usize, self.device.clone())?;
        cache.lock().map_mut(0, |block: &mut DataBlock| *block = data);
        Ok(())
    }
}

/// inode 游历：沿稠密指针链定位文件的块
impl ShadowFileSystem {
    #[inline]
    pub(crate) fn inode(&self, id: u32) -> &Inode {
        self.inodes.get(id)
    }

    #[inline]
    pub(crate) fn inode_mut(&mut self, id: u32) -> &mut Inode {
        self.inodes.get_mut(id)
    }

    /// 文件占据的块数
    pub(crate) fn block_count(&mut self, id: u32) -> FsResult<usize> {
        let inode = *self.inode(id);
        let direct = inode.direct.iter().take_while(|&&ptr| ptr != 0).count();
        if direct < INODE_DIRECT || inode.indirect == 0 {
            return Ok(direct);
        }
        let indirect = self.read_indirect(inode.indirect)?;
        Ok(direct + indirect.ptrs.iter().take_while(|&&ptr| ptr != 0).count())
    }

    /// 文件的第 `index` 块；不存在则为 `None`
    pub(crate) fn nth_block(&mut self, id: u32, index: usize) -> FsResult<Option<u32>> {
        let inode = *self.inode(id);
        if index < INODE_DIRECT {
            let block = inode.direct[index];
            return Ok((block != 0).then_some(block));
        }
        if inode.indirect == 0 || index - INODE_DIRECT >= INDIRECT_PTRS {
            return Ok(None);
        }
        let indirect = self.read_indirect(inode.indirect)?;
        let block = indirect.ptrs[index - INODE_DIRECT];
        Ok((block != 0).then_some(block))
    }

    /// 指针链中最后一个非零指针
    pub(crate) fn last_block(&mut self, id: u32) -> FsResult<u32> {
        let inode = *self.inode(id);
        let mut last = 0;
        for &ptr in &inode.direct {
            if ptr == 0 {
                break;
            }
            last = ptr;
        }

        let direct_full = inode.direct.iter().all(|&ptr| ptr != 0);
        if direct_full && inode.indirect != 0 {
            let indirect = self.read_indirect(inode.indirect)?;
            for &ptr in &indirect.ptrs {
                if ptr == 0 {
                    break;
                }
                last = ptr;
            }
        }

        if last == 0 {
            return Err(FsError::Corrupted);
        }
        Ok(last)
    }

    /// 链中块 `block` 的下一块；已是末块则为 `None`
    pub(crate) fn next_block_after(&mut self, id: u32, block: u32) -> FsResult<Option<u32>> {
        let inode = *self.inode(id);

        if let Some(pos) = inode.direct.iter().position(|&ptr| ptr == block) {
            if pos + 1 < INODE_DIRECT {
                let next = inode.direct[pos + 1];
                return Ok((next != 0).then_some(next));
            }
            if inode.indirect == 0 {
                return Ok(None);
            }
            let indirect = self.read_indirect(inode.indirect)?;
            let next = indirect.ptrs[0];
            return Ok((next != 0).then_some(next));
        }

        if inode.indirect == 0 {
            return Err(FsError::Corrupted);
        }
        let indirect = self.read_indirect(inode.indirect)?;
        match indirect.ptrs.iter().position(|&ptr| ptr == block) {
            Some(pos) if pos + 1 < INDIRECT_PTRS => {
                let next = indirect.ptrs[pos + 1];
                Ok((next != 0).then_some(next))
            }
            Some(_) => Ok(None),
            // 块不在链中：镜像不一致
            None => Err(FsError::Corrupted),
        }
    }

    /// 文件末尾落在末块内的字节偏移。
    ///
    /// 末块恰好写满且尚未追加新块时为 `BLOCK_SIZE`。
    pub(crate) fn end_byte(&mut self, id: u32) -> FsResult<usize> {
        let size = self.inode(id).size as usize;
        let mut end = size % BLOCK_SIZE;
        if end == 0 && size == self.block_count(id)? * BLOCK_SIZE {
            end = BLOCK_SIZE;
        }
        Ok(end)
    }

    /// 为文件追加一个数据块；任何失败都先回收已分配的块
    pub(crate) fn append_block(&mut self, id: u32) -> FsResult<u32> {
        let fresh = self.alloc_block()?;

        if let Some(slot) = self.inode(id).first_free_direct() {
            self.inode_mut(id).direct[slot] = fresh;
            return Ok(fresh);
        }

        let indirect_ptr = self.inode(id).indirect;
        if indirect_ptr == 0 {
            // 首次越过直接指针：建立间接块并立即持久化
            let indirect_block = match self.alloc_block() {
                Ok(block) => block,
                Err(err) => {
                    self.free_block(fresh);
                    return Err(err);
                }
            };
            let mut indirect = IndirectBlock::zeroed();
            indirect.ptrs[0] = fresh;
            if let Err(err) = self.write_indirect(indirect_block, &indirect) {
                self.free_block(indirect_block);
                self.free_block(fresh);
                return Err(err);
            }
            self.inode_mut(id).indirect = indirect_block;
            return Ok(fresh);
        }

        let mut indirect = match self.read_indirect(indirect_ptr) {
            Ok(indirect) => indirect,
            Err(err) => {
                self.free_block(fresh);
                return Err(err);
            }
        };
        match indirect.ptrs.iter().position(|&ptr| ptr == 0) {
            Some(slot) => {
                indirect.ptrs[slot] = fresh;
                if let Err(err) = self.write_indirect(indirect_ptr, &indirect) {
                    self.free_block(fresh);
                    return Err(err);
                }
                Ok(fresh)
            }
            None => {
                warn!("out of block pointers");
                self.free_block(fresh);
                Err(FsError::PointerListExhausted)
            }
        }
    }
}

/// 目录维护与查询
impl ShadowFileSystem {
    /// 在活动目录中登记新文件：占用一个 inode 与首个数据块
    pub(crate) fn add_entry(&mut self, name: &str) -> FsResult<usize> {
        let Some(slot) = self.dirs[0].first_free() else {
            warn!("directory is full");
            return Err(FsError::DirectoryFull);
        };
        let inode_id = self.alloc_inode()?;
        let block = self.alloc_block()?;

        let inode = self.inode_mut(inode_id);
        inode.size = 0;
        inode.direct[0] = block;
        *self.dirs[0].get_mut(slot) = DirEntry::new(name, inode_id);

        self.flush_dir(0)?;
        self.flush_inode_block(inode_id)?;
        Ok(slot)
    }

    /// 释放某目录槽第 `index` 项的全部数据块，并把 inode 归还为空闲态
    pub(crate) fn release_file(&mut self, slot: usize, index: usize) -> FsResult<()> {
        let inode_id = self.dirs[slot].get(index).inode_id();
        let inode = *self.inode(inode_id);

        for &ptr in &inode.direct {
            if ptr == 0 {
                break;
            }
            self.free_block(ptr);
        }
        if inode.indirect != 0 {
            let indirect = self.read_indirect(inode.indirect)?;
            for &ptr in &indirect.ptrs {
                if ptr == 0 {
                    break;
                }
                self.free_block(ptr);
            }
            self.free_block(inode.indirect);
        }

        self.inode_mut(inode_id).clear();
        Ok(())
    }

    /// 删除文件：释放全部块与 inode，清除目录项，整体落盘
    pub fn remove(&mut self, name: &str) -> FsResult<()> {
        // 同名的打开描述符先作废，与目录查询的结果无关
        self.open_files.remove_named(name);

        let Some(index) = self.dirs[0].find(name) else {
            warn!("remove: file does not exist");
            return Err(FsError::NotFound);
        };
        self.release_file(0, index)?;
        self.dirs[0].get_mut(index).clear();
        self.flush_all()
    }

    /// 按名查询活动目录中文件的字节大小
    pub fn file_size(&self, name: &str) -> FsResult<u32> {
        let index = self.dirs[0].find(name).ok_or(FsError::NotFound)?;
        let inode_id = self.dirs[0].get(index).inode_id();
        Ok(self.inode(inode_id).size as u32)
    }

    /// 活动目录文件名迭代；游标越过表尾时回绕并返回 `None` 作为重启信号
    pub fn next_file_name(&mut self) -> Option<String> {
        loop {
            if self.name_cursor == MAX_FILES {
                self.name_cursor = 0;
                return None;
            }
            let entry = self.dirs[0].get(self.name_cursor);
            self.name_cursor += 1;
            if !entry.is_empty() {
                return Some(entry.name().to_string());
            }
        }
    }

    /// 数据区当前空闲的块数
    pub fn free_block_count(&self) -> usize {
        self.free_map.count_in(FIRST_DATA_BLOCK..=LAST_DATA_BLOCK)
    }
}
