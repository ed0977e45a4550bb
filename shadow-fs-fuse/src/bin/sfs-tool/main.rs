mod cli;

use std::fs;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use shadow_fs::ShadowFileSystem;
use shadow_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device = Arc::new(if cli.fresh {
        BlockFile::create(&cli.image)?
    } else {
        BlockFile::open(&cli.image)?
    });

    let mut sfs = if cli.fresh {
        ShadowFileSystem::format(device).expect("formatting failed")
    } else {
        ShadowFileSystem::mount(device).expect("mounting failed")
    };

    if let Some(source) = &cli.source {
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_str().expect("source file name is not UTF-8");
            let data = fs::read(entry.path())?;

            let fd = match sfs.fopen(name) {
                Ok(fd) => fd,
                Err(err) => {
                    log::warn!("skipping {name}: {err}");
                    continue;
                }
            };
            let written = sfs.fwrite(fd, &data).expect("import write failed");
            assert_eq!(written, data.len(), "image ran out of space");
            sfs.fclose(fd).expect("close failed");
            println!("imported: {name} ({written} bytes)");
        }
    }

    while let Some(name) = sfs.next_file_name() {
        let size = sfs.file_size(&name).expect("size lookup failed");
        println!("{size:>8}  {name}");
    }

    Ok(())
}
