use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use shadow_fs::BlockDevice;
use shadow_fs::FsError;
use shadow_fs::ShadowFileSystem;
use shadow_fs::BLOCK_SIZE;
use shadow_fs::DIR_COUNT;
use shadow_fs::INODE_DIRECT;
use shadow_fs::MAX_FD;
use shadow_fs::SHADOW_COUNT;

use crate::BlockFile;

fn image_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sfs-{}-{}.img", name, std::process::id()))
}

fn fresh(name: &str) -> (ShadowFileSystem, PathBuf) {
    let path = image_path(name);
    let device = Arc::new(BlockFile::create(&path).unwrap());
    (ShadowFileSystem::format(device).unwrap(), path)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 重新打开文件并读出全部内容；要求该文件当前没有打开的描述符
fn read_all(fs: &mut ShadowFileSystem, name: &str) -> Vec<u8> {
    let size = fs.file_size(name).unwrap() as usize;
    let fd = fs.fopen(name).unwrap();
    let mut buf = vec![0; size];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), size);
    fs.fclose(fd).unwrap();
    buf
}

#[test]
fn write_then_read_back() {
    let (mut fs, path) = fresh("basic");

    let fd = fs.fopen("a").unwrap();
    assert_eq!(fs.fwrite(fd, b"hello").unwrap(), 5);
    fs.frseek(fd, 0).unwrap();
    let mut buf = [0; 5];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn cross_block_file() {
    let (mut fs, path) = fresh("cross");
    let data = pattern(BLOCK_SIZE + 10);

    let fd = fs.fopen("big").unwrap();
    assert_eq!(fs.fwrite(fd, &data).unwrap(), data.len());
    assert_eq!(fs.file_size("big").unwrap() as usize, data.len());

    fs.frseek(fd, 0).unwrap();
    let mut buf = vec![0; data.len()];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), data.len());
    assert_eq!(buf, data);
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn indirect_chain() {
    let (mut fs, path) = fresh("indirect");
    let before = fs.free_block_count();
    let data = pattern((INODE_DIRECT + 1) * BLOCK_SIZE);

    let fd = fs.fopen("huge").unwrap();
    assert_eq!(fs.fwrite(fd, &data).unwrap(), data.len());
    assert_eq!(fs.file_size("huge").unwrap() as usize, data.len());
    // 15 个数据块加 1 个间接块
    assert_eq!(fs.free_block_count(), before - (INODE_DIRECT + 2));

    fs.frseek(fd, 0).unwrap();
    let mut buf = vec![0; data.len()];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), data.len());
    assert_eq!(buf, data);
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn commit_then_restore() {
    let (mut fs, path) = fresh("commit");

    let fd = fs.fopen("x").unwrap();
    fs.fwrite(fd, b"v1").unwrap();
    fs.fclose(fd).unwrap();
    fs.commit().unwrap();

    let fd = fs.fopen("x").unwrap();
    fs.fwseek(fd, 0).unwrap();
    fs.fwrite(fd, b"v2").unwrap();
    fs.fclose(fd).unwrap();
    assert_eq!(read_all(&mut fs, "x"), b"v2");

    fs.restore(1).unwrap();
    assert_eq!(read_all(&mut fs, "x"), b"v1");

    fs::remove_file(path).unwrap();
}

#[test]
fn fifo_aging() {
    let (mut fs, path) = fresh("fifo");

    for version in 1..=5u8 {
        let fd = fs.fopen("f").unwrap();
        fs.fwseek(fd, 0).unwrap();
        fs.fwrite(fd, &[b'v', b'0' + version]).unwrap();
        fs.fclose(fd).unwrap();
        fs.commit().unwrap();
    }

    // 五次提交后只有最近四次可恢复：槽位 4 是留存的最旧状态
    fs.restore(SHADOW_COUNT).unwrap();
    assert_eq!(read_all(&mut fs, "f"), b"v2");
    fs.restore(1).unwrap();
    assert_eq!(read_all(&mut fs, "f"), b"v5");

    fs::remove_file(path).unwrap();
}

#[test]
fn remove_returns_blocks() {
    let (mut fs, path) = fresh("rmfree");
    let before = fs.free_block_count();
    let block = vec![0xab; BLOCK_SIZE];

    for index in 0..10 {
        let name = format!("file{index}");
        let fd = fs.fopen(&name).unwrap();
        assert_eq!(fs.fwrite(fd, &block).unwrap(), BLOCK_SIZE);
        fs.fclose(fd).unwrap();
    }
    assert_eq!(fs.free_block_count(), before - 10);

    for index in 0..10 {
        fs.remove(&format!("file{index}")).unwrap();
    }
    assert_eq!(fs.free_block_count(), before);

    fs::remove_file(path).unwrap();
}

#[test]
fn reopen_cursor_positions() {
    let (mut fs, path) = fresh("reopen");

    let fd = fs.fopen("log").unwrap();
    fs.fwrite(fd, b"hello").unwrap();
    fs.fclose(fd).unwrap();

    // 重开后写游标在文件尾、读游标在文件头
    let fd = fs.fopen("log").unwrap();
    fs.fwrite(fd, b", world").unwrap();
    let mut buf = [0; 12];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), 12);
    assert_eq!(&buf, b"hello, world");
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn survives_remount() {
    let (mut fs, path) = fresh("remount");
    let data = pattern(3 * BLOCK_SIZE + 17);

    let fd = fs.fopen("keep").unwrap();
    assert_eq!(fs.fwrite(fd, &data).unwrap(), data.len());
    fs.fclose(fd).unwrap();
    drop(fs);

    let device = Arc::new(BlockFile::open(&path).unwrap());
    let mut fs = ShadowFileSystem::mount(device).unwrap();
    assert_eq!(fs.file_size("keep").unwrap() as usize, data.len());
    assert_eq!(read_all(&mut fs, "keep"), data);

    fs::remove_file(path).unwrap();
}

#[test]
fn enumerate_names() {
    let (mut fs, path) = fresh("names");

    for name in ["a", "b", "c"] {
        let fd = fs.fopen(name).unwrap();
        fs.fclose(fd).unwrap();
    }

    let mut listed = Vec::new();
    while let Some(name) = fs.next_file_name() {
        listed.push(name);
    }
    // 两次回绕信号之间每个名字恰好出现一次
    assert_eq!(listed.len(), 3);
    let seen: BTreeSet<_> = listed.into_iter().collect();
    assert_eq!(
        seen,
        BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
    );

    fs.remove("b").unwrap();
    assert_eq!(fs.file_size("b"), Err(FsError::NotFound));
    let mut listed = Vec::new();
    while let Some(name) = fs.next_file_name() {
        listed.push(name);
    }
    assert_eq!(listed.len(), 2);
    assert!(!listed.contains(&"b".to_string()));

    fs::remove_file(path).unwrap();
}

#[test]
fn duplicate_open_rejected() {
    let (mut fs, path) = fresh("dupopen");

    let fd = fs.fopen("f").unwrap();
    assert_eq!(fs.fopen("f"), Err(FsError::AlreadyOpen));
    fs.fclose(fd).unwrap();
    let fd = fs.fopen("f").unwrap();
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn descriptor_table_exhaustion() {
    let (mut fs, path) = fresh("fdfull");

    let fds: Vec<usize> = (0..MAX_FD)
        .map(|index| fs.fopen(&format!("f{index}")).unwrap())
        .collect();
    assert_eq!(fs.fopen("straw"), Err(FsError::FdTableFull));
    for fd in fds {
        fs.fclose(fd).unwrap();
    }

    fs::remove_file(path).unwrap();
}

#[test]
fn seek_rules() {
    let (mut fs, path) = fresh("seek");

    let fd = fs.fopen("s").unwrap();
    fs.fwrite(fd, b"abcdef").unwrap();

    fs.frseek(fd, 2).unwrap();
    let mut buf = [0; 2];
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), 2);
    assert_eq!(&buf, b"cd");

    // 恰好指向文件尾是合法位置，但读不出任何字节
    fs.frseek(fd, 6).unwrap();
    assert_eq!(fs.fread(fd, &mut buf).unwrap(), 0);

    assert_eq!(fs.frseek(fd, 7), Err(FsError::InvalidSeek));
    assert_eq!(fs.fwseek(fd, BLOCK_SIZE), Err(FsError::InvalidSeek));
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn mid_write_keeps_size() {
    let (mut fs, path) = fresh("midwrite");

    let fd = fs.fopen("m").unwrap();
    fs.fwrite(fd, b"abcdef").unwrap();
    fs.fwseek(fd, 2).unwrap();
    fs.fwrite(fd, b"XY").unwrap();
    fs.fclose(fd).unwrap();

    assert_eq!(fs.file_size("m").unwrap(), 6);
    assert_eq!(read_all(&mut fs, "m"), b"abXYef");

    fs::remove_file(path).unwrap();
}

#[test]
fn restore_bounds() {
    let (mut fs, path) = fresh("bounds");

    assert_eq!(fs.restore(0), Ok(()));
    assert_eq!(fs.restore(DIR_COUNT), Err(FsError::InvalidSnapshot));

    fs::remove_file(path).unwrap();
}

#[test]
fn mount_rejects_garbage() {
    let path = image_path("garbage");
    let device = Arc::new(BlockFile::create(&path).unwrap());
    ShadowFileSystem::format(device.clone()).unwrap();

    device.write_block(0, &[0xff; BLOCK_SIZE]).unwrap();
    assert!(matches!(
        ShadowFileSystem::mount(device),
        Err(FsError::Corrupted)
    ));

    fs::remove_file(path).unwrap();
}

#[test]
fn full_block_boundary() {
    let (mut fs, path) = fresh("boundary");

    let fd = fs.fopen("edge").unwrap();
    assert_eq!(fs.fwrite(fd, &vec![7u8; BLOCK_SIZE]).unwrap(), BLOCK_SIZE);
    fs.fclose(fd).unwrap();
    assert_eq!(fs.file_size("edge").unwrap() as usize, BLOCK_SIZE);

    // 末块已满：重开后的追加要先挂上新块
    let fd = fs.fopen("edge").unwrap();
    assert_eq!(fs.fwrite(fd, b"tail").unwrap(), 4);
    fs.fclose(fd).unwrap();
    assert_eq!(fs.file_size("edge").unwrap() as usize, BLOCK_SIZE + 4);

    let bytes = read_all(&mut fs, "edge");
    assert!(bytes[..BLOCK_SIZE].iter().all(|&byte| byte == 7));
    assert_eq!(&bytes[BLOCK_SIZE..], b"tail");

    fs::remove_file(path).unwrap();
}

#[test]
fn name_validation() {
    let (mut fs, path) = fresh("namelen");

    assert_eq!(fs.fopen(""), Err(FsError::InvalidName));
    assert_eq!(fs.fopen(&"x".repeat(21)), Err(FsError::InvalidName));
    let fd = fs.fopen(&"x".repeat(20)).unwrap();
    fs.fclose(fd).unwrap();

    fs::remove_file(path).unwrap();
}

#[test]
fn remove_invalidates_open_descriptor() {
    let (mut fs, path) = fresh("rmopen");

    let fd = fs.fopen("gone").unwrap();
    fs.fwrite(fd, b"data").unwrap();
    fs.remove("gone").unwrap();

    let mut buf = [0; 4];
    assert_eq!(fs.fread(fd, &mut buf), Err(FsError::BadDescriptor));
    assert_eq!(fs.remove("gone"), Err(FsError::NotFound));

    fs::remove_file(path).unwrap();
}

#[test]
fn restore_recovers_name_set() {
    let (mut fs, path) = fresh("nameset");

    for (name, data) in [("a", b"v1".as_slice()), ("b", b"bb".as_slice())] {
        let fd = fs.fopen(name).unwrap();
        fs.fwrite(fd, data).unwrap();
        fs.fclose(fd).unwrap();
    }
    fs.commit().unwrap();

    // 提交之后活动目录随意折腾
    fs.remove("b").unwrap();
    let fd = fs.fopen("a").unwrap();
    fs.fwseek(fd, 0).unwrap();
    fs.fwrite(fd, b"zz").unwrap();
    fs.fclose(fd).unwrap();
    let fd = fs.fopen("c").unwrap();
    fs.fwrite(fd, b"cc").unwrap();
    fs.fclose(fd).unwrap();

    fs.restore(1).unwrap();
    assert_eq!(read_all(&mut fs, "a"), b"v1");
    assert_eq!(read_all(&mut fs, "b"), b"bb");
    assert_eq!(fs.file_size("c"), Err(FsError::NotFound));

    fs::remove_file(path).unwrap();
}
