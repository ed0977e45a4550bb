//! # 文件访问层
//!
//! 每个打开文件持有相互独立的读写游标，各自记录（块号，块内偏移）；
//! 字节级读写沿 inode 指针链滚动游标，写越过文件尾即增长文件。

use alloc::string::String;
use alloc::string::ToString;

use log::warn;

use crate::layout::NAME_MAX_LEN;
use crate::sfs::ShadowFileSystem;
use crate::DataBlock;
use crate::FsError;
use crate::FsResult;
use crate::BLOCK_SIZE;

/// 打开文件表的槽位数
pub const MAX_FD: usize = 32;

/// 读或写游标
#[derive(Clone, Copy)]
struct Cursor {
    /// 所在数据块的块号
    block: u32,
    /// 块内字节偏移
    offset: usize,
}

struct OpenFile {
    name: String,
    inode_id: u32,
    read: Cursor,
    write: Cursor,
}

pub(crate) struct OpenFileTable {
    files: [Option<OpenFile>; MAX_FD],
}

impl OpenFileTable {
    pub(crate) fn new() -> Self {
        const EMPTY: Option<OpenFile> = None;
        Self {
            files: [EMPTY; MAX_FD],
        }
    }

    fn is_full(&self) -> bool {
        self.files.iter().all(Option::is_some)
    }

    fn contains(&self, name: &str) -> bool {
        self.files
            .iter()
            .any(|slot| slot.as_ref().is_some_and(|file| file.name == name))
    }

    fn get(&self, fd: usize) -> FsResult<&OpenFile> {
        self.files
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(FsError::BadDescriptor)
    }

    fn get_mut(&mut self, fd: usize) -> FsResult<&mut OpenFile> {
        self.files
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadDescriptor)
    }

    fn insert(&mut self, file: OpenFile) -> Option<usize> {
        let slot = self.files.iter().position(Option::is_none)?;
        self.files[slot] = Some(file);
        Some(slot)
    }

    fn clear(&mut self, fd: usize) {
        self.files[fd] = None;
    }

    /// 作废全部同名描述符
    pub(crate) fn remove_named(&mut self, name: &str) {
        for slot in &mut self.files {
            if slot.as_ref().is_some_and(|file| file.name == name) {
                *slot = None;
            }
        }
    }
}

impl ShadowFileSystem {
    /// 打开或创建文件，返回描述符。同名文件至多打开一次。
    pub fn fopen(&mut self, name: &str) -> FsResult<usize> {
        if self.open_files.is_full() {
            warn!("maximum open files");
            return Err(FsError::FdTableFull);
        }
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            warn!("invalid file name");
            return Err(FsError::InvalidName);
        }
        if self.open_files.contains(name) {
            warn!("file already open");
            return Err(FsError::AlreadyOpen);
        }

        let (inode_id, read, write) = match self.dirs[0].find(name) {
            Some(index) => {
                let inode_id = self.dirs[0].get(index).inode_id();
                let first = self.inode(inode_id).direct[0];
                let last = self.last_block(inode_id)?;
                let end = self.end_byte(inode_id)?;
                // 读游标回到文件头，写游标停在文件尾
                (
                    inode_id,
                    Cursor {
                        block: first,
                        offset: 0,
                    },
                    Cursor {
                        block: last,
                        offset: end,
                    },
                )
            }
            None => {
                let index = self.add_entry(name)?;
                let inode_id = self.dirs[0].get(index).inode_id();
                let cursor = Cursor {
                    block: self.inode(inode_id).direct[0],
                    offset: 0,
                };
                (inode_id, cursor, cursor)
            }
        };

        let file = OpenFile {
            name: name.to_string(),
            inode_id,
            read,
            write,
        };
        self.open_files.insert(file).ok_or(FsError::FdTableFull)
    }

    /// 关闭描述符：冲刷元数据后释放槽位
    pub fn fclose(&mut self, fd: usize) -> FsResult<()> {
        self.open_files.get(fd)?;
        self.flush_super()?;
        self.flush_inode_file()?;
        self.flush_dir(0)?;
        self.flush_maps()?;
        self.open_files.clear(fd);
        Ok(())
    }

    /// 自读游标起读取至多 `buf.len()` 字节，返回实际读到的字节数
    pub fn fread(&mut self, fd: usize, buf: &mut [u8]) -> FsResult<usize> {
        let file = self.open_files.get(fd)?;
        let inode_id = file.inode_id;
        let Cursor {
            mut block,
            mut offset,
        } = file.read;
        if buf.is_empty() {
            return Ok(0);
        }

        // 以进入时的文件尾 (末块, 末字节) 为界
        let last = self.last_block(inode_id)?;
        let end = self.end_byte(inode_id)?;

        let mut pos = 0;
        while pos < buf.len() {
            if offset == BLOCK_SIZE {
                match self.next_block_after(inode_id, block)? {
                    Some(next) => {
                        block = next;
                        offset = 0;
                    }
                    None => break,
                }
            }
            let limit = if block == last { end } else { BLOCK_SIZE };
            if offset >= limit {
                break;
            }
            let count = (limit - offset).min(buf.len() - pos);
            let cache = self.cache.get(block as usize, self.device.clone())?;
            cache.lock().map(0, |data: &DataBlock| {
                buf[pos..pos + count].copy_from_slice(&data[offset..offset + count]);
            });
            pos += count;
            offset += count;
        }

        self.open_files.get_mut(fd)?.read = Cursor { block, offset };
        Ok(pos)
    }

    /// 自写游标起写入整个 `buf`；空间耗尽时写入截断的前缀并返回其长度
    pub fn fwrite(&mut self, fd: usize, buf: &[u8]) -> FsResult<usize> {
        let file = self.open_files.get(fd)?;
        let inode_id = file.inode_id;
        let Cursor {
            mut block,
            mut offset,
        } = file.write;
        if buf.is_empty() {
            return Ok(0);
        }

        // 文件尾快照取自进入时刻；覆写文件中段不改变大小
        let last = self.last_block(inode_id)?;
        let end = self.end_byte(inode_id)?;

        let mut pos = 0;
        let mut grown = 0;
        let mut appended = false;
        while pos < buf.len() {
            if offset == BLOCK_SIZE {
                block = match self.next_block_after(inode_id, block)? {
                    Some(next) => next,
                    None => match self.append_block(inode_id) {
                        Ok(fresh) => {
                            appended = true;
                            fresh
                        }
                        Err(err) => {
                            warn!("write truncated: {err}");
                            break;
                        }
                    },
                };
                offset = 0;
            }
            let count = (BLOCK_SIZE - offset).min(buf.len() - pos);
            let cache = self.cache.get(block as usize, self.device.clone())?;
            cache.lock().map_mut(0, |data: &mut DataBlock| {
                data[offset..offset + count].copy_from_slice(&buf[pos..pos + count]);
            });
            // 一旦追加过新块，其后每个字节都使文件增长；
            // 在旧末块上，只有写到 end 之后的字节才算
            if appended {
                grown += count;
            } else if block == last {
                grown += (offset + count).saturating_sub(end.max(offset));
            }
            pos += count;
            offset += count;
        }

        self.inode_mut(inode_id).size += grown as i32;
        self.open_files.get_mut(fd)?.write = Cursor { block, offset };
        self.flush_inode_file()?;
        self.cache.sync_all()?;
        Ok(pos)
    }

    /// 把读游标移到字节偏移 `loc`
    pub fn frseek(&mut self, fd: usize, loc: usize) -> FsResult<()> {
        let cursor = self.locate(fd, loc)?;
        self.open_files.get_mut(fd)?.read = cursor;
        Ok(())
    }

    /// 把写游标移到字节偏移 `loc`
    pub fn fwseek(&mut self, fd: usize, loc: usize) -> FsResult<()> {
        let cursor = self.locate(fd, loc)?;
        self.open_files.get_mut(fd)?.write = cursor;
        Ok(())
    }

    /// 字节偏移到游标的换算；只定位，不扩展文件
    fn locate(&mut self, fd: usize, loc: usize) -> FsResult<Cursor> {
        let inode_id = self.open_files.get(fd)?.inode_id;
        let Some(block) = self.nth_block(inode_id, loc / BLOCK_SIZE)? else {
            warn!("seek location does not exist");
            return Err(FsError::InvalidSeek);
        };
        let offset = loc % BLOCK_SIZE;
        if block == self.last_block(inode_id)? && offset > self.end_byte(inode_id)? {
            warn!("seek past end of file");
            return Err(FsError::InvalidSeek);
        }
        Ok(Cursor { block, offset })
    }
}
