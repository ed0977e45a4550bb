#[cfg(test)]
mod tests;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use shadow_fs::BlockDevice;
use shadow_fs::FsError;
use shadow_fs::FsResult;
use shadow_fs::BLOCK_COUNT;
use shadow_fs::BLOCK_SIZE;

/// 宿主文件充当块设备，模拟一块定长虚拟磁盘
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    /// 新建（或清空）镜像文件并撑到整盘大小
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((BLOCK_SIZE * BLOCK_COUNT) as u64)?;

        Ok(Self(Mutex::new(file)))
    }

    /// 打开既有镜像文件
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> FsResult<()> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|err| {
                log::error!("read block {block_id}: {err}");
                FsError::Io
            })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> FsResult<()> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|err| {
                log::error!("write block {block_id}: {err}");
                FsError::Io
            })
    }
}
