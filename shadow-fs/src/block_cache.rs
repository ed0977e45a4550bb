//! # 块缓存层
//!
//! 数据区的块（用户数据与间接指针块）全部经由块缓存读写，
//! 且**操作块时一定在缓冲区当中**；每次变更操作结束时回写全部脏块，
//! 因此单次 API 调用内的持久性仍是同步的。
//!
//! 元数据区（超级块、inode 文件、目录槽、位图）由内存镜像直接冲刷，
//! 不经过缓存；两类块号互不相交。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use spin::Mutex;

use crate::BlockDevice;
use crate::FsResult;
use crate::BLOCK_SIZE;

/// 块缓存的全局管理，归属于文件系统句柄
pub struct BlockCacheManager {
    queue: Vec<(usize, Arc<Mutex<BlockCache>>)>,
}

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: [u8; BLOCK_SIZE],
    /// 对应的块ID
    block_id: usize,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCache {
    fn new(block_id: usize, block_device: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let mut data = [0; BLOCK_SIZE];
        block_device.read_block(block_id, &mut data)?;

        Ok(Self {
            data,
            block_id,
            block_device,
            modified: false,
        })
    }

    /// 脏块回写；设备错误必须就地上报，所以不放进 Drop
    pub fn sync(&mut self) -> FsResult<()> {
        if self.modified {
            self.modified = false;
            self.block_device.write_block(self.block_id, &self.data)?;
        }
        Ok(())
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        let addr = self.offset(offset).cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        self.modified = true;
        let addr = self.offset(offset).cast_mut().cast();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }
}

impl BlockCache {
    #[inline]
    fn offset(&self, count: usize) -> *const u8 {
        &self.data[count]
    }
}

impl BlockCacheManager {
    /// 块缓存个数的上限
    const CAPACITY: usize = 16;

    pub const fn new() -> Self {
        Self { queue: Vec::new() }
    }

    // 块缓存调度策略：踢走闲置块，淘汰前先回写
    pub fn get(
        &mut self,
        block_id: usize,
        block_device: Arc<dyn BlockDevice>,
    ) -> FsResult<Arc<Mutex<BlockCache>>> {
        // 尝试从缓冲区中读取块
        if let Some(cache) = self
            .queue
            .iter()
            .find_map(|(id, cache)| (block_id == *id).then_some(cache))
        {
            return Ok(Arc::clone(cache));
        };

        // 触及上限，踢走一个块
        if self.queue.len() == Self::CAPACITY {
            let index = self
                .queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1) // 没有其它引用的才能淘汰
                .expect("run out of block cache");
            let (_, evicted) = self.queue.remove(index);
            evicted.lock().sync()?;
        }

        // 缓存新块
        let block_cache = Arc::new(Mutex::new(BlockCache::new(block_id, block_device)?));
        self.queue.push((block_id, block_cache.clone()));

        Ok(block_cache)
    }

    /// 回写全部脏块
    pub fn sync_all(&self) -> FsResult<()> {
        for (_, cache) in &self.queue {
            cache.lock().sync()?;
        }
        Ok(())
    }
}
