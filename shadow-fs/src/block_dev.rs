use crate::FsResult;

/// 块设备抽象：磁盘模拟器实现本特质，以整块为单位读写，不支持部分块 I/O
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> FsResult<()>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> FsResult<()>;
}
