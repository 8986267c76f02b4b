mod logger;
mod time;

use std::env;
use std::io::{self, BufRead, Write};

use log::{debug, error};
use sfs::{FileImage, FileKind, SFSError, SFS};

use crate::time::format_timestamp;

const DEFAULT_IMAGE: &str = "sfs_disk.bin";

const HELP: &str = "\
commands:
  mount                 load the file system from the image file
  format                create a new, empty file system
  ls                    list the current directory
  mkdir <name>          create a directory
  create <name>         create an empty file
  write <name> <data>   replace a file's content (quotes around data are dropped)
  read <name>           print a file's content
  delete <name>         remove a file or an empty directory
  info <name>           show a file's inode
  stat                  show file system usage
  save                  write the file system to the image file
  help                  show this text
  exit                  leave the shell";

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Mount,
    Format,
    List,
    Mkdir(&'a str),
    Create(&'a str),
    Write(&'a str, &'a str),
    Read(&'a str),
    Delete(&'a str),
    Info(&'a str),
    Stat,
    Save,
    Help,
    Exit,
}

/// Splits `line` into a command. `Ok(None)` is a blank line; `Err` carries a message
/// for the user.
fn parse(line: &str) -> Result<Option<Command<'_>>, String> {
    let line = line.trim();
    let (word, rest) = match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim_start()),
        None => (line, ""),
    };
    let name = |usage: &str| {
        rest.split_whitespace()
            .next()
            .ok_or_else(|| format!("usage: {}", usage))
    };

    let command = match word {
        "" => return Ok(None),
        "mount" => Command::Mount,
        "format" => Command::Format,
        "ls" => Command::List,
        "mkdir" => Command::Mkdir(name("mkdir <name>")?),
        "create" => Command::Create(name("create <name>")?),
        "write" => {
            let target = name("write <name> <data>")?;
            let data = rest[target.len()..].trim_start();
            Command::Write(target, strip_quotes(data))
        }
        "read" => Command::Read(name("read <name>")?),
        "delete" => Command::Delete(name("delete <name>")?),
        "info" => Command::Info(name("info <name>")?),
        "stat" => Command::Stat,
        "save" => Command::Save,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(format!("unknown command \"{}\", try help", other)),
    };
    Ok(Some(command))
}

fn strip_quotes(data: &str) -> &str {
    for quote in ['"', '\''].iter() {
        if data.len() >= 2 && data.starts_with(*quote) && data.ends_with(*quote) {
            return &data[1..data.len() - 1];
        }
    }
    data
}

fn run(fs: &mut SFS<FileImage>, command: Command<'_>) -> Result<(), SFSError> {
    match command {
        Command::Mount => {
            fs.mount()?;
            println!("mounted {}", fs.store().path().display());
        }
        Command::Format => {
            fs.format()?;
            println!("formatted {}", fs.store().path().display());
        }
        Command::List => {
            println!(
                "{:<24} {:>6} {:<6} {:>6} {:>7}  {}",
                "name", "inode", "type", "size", "blocks", "modified"
            );
            for entry in fs.list()? {
                let kind = match entry.kind {
                    FileKind::Directory => "dir",
                    FileKind::Regular => "file",
                };
                println!(
                    "{:<24} {:>6} {:<6} {:>6} {:>7}  {}",
                    entry.name,
                    entry.inode.get(),
                    kind,
                    entry.size,
                    entry.block_count,
                    format_timestamp(entry.modified)
                );
            }
        }
        Command::Mkdir(name) => {
            let id = fs.mkdir(name)?;
            println!("created directory {} (inode {})", name, id);
        }
        Command::Create(name) => {
            let id = fs.create(name)?;
            println!("created {} (inode {})", name, id);
        }
        Command::Write(name, data) => {
            let written = fs.write(name, data.as_bytes())?;
            println!("wrote {} bytes to {}", written, name);
        }
        Command::Read(name) => {
            let content = fs.read(name)?;
            if content.is_empty() {
                println!("empty file");
            } else {
                println!("{}", String::from_utf8_lossy(&content));
            }
        }
        Command::Delete(name) => {
            fs.delete(name)?;
            println!("deleted {}", name);
        }
        Command::Info(name) => {
            let info = fs.info(name)?;
            println!("inode:    {}", info.inode);
            println!("type:     {}", info.kind);
            println!("mode:     {:o}", info.mode);
            println!("size:     {} bytes", info.size);
            println!("blocks:   {}", info.block_count);
            println!("created:  {}", format_timestamp(info.created));
            println!("modified: {}", format_timestamp(info.modified));
            println!("accessed: {}", format_timestamp(info.accessed));
            for block in info.blocks.iter() {
                println!("  [{}] block {} ({} bytes)", block.slot, block.block, block.used);
            }
        }
        Command::Stat => {
            let stats = fs.stat()?;
            println!("version:    {}", stats.version);
            println!("block size: {} bytes", stats.block_size);
            println!(
                "blocks:     {} total, {} used, {} free",
                stats.total_blocks,
                stats.used_blocks(),
                stats.free_blocks
            );
            println!(
                "inodes:     {} total, {} used, {} free",
                stats.total_inodes,
                stats.used_inodes(),
                stats.free_inodes
            );
            println!(
                "space:      {} of {} bytes free ({:.1}% used)",
                stats.free_bytes(),
                stats.total_bytes(),
                stats.usage_percent()
            );
            println!("created:    {}", format_timestamp(stats.created));
        }
        Command::Save => {
            fs.save()?;
            println!("saved {}", fs.store().path().display());
        }
        Command::Help => println!("{}", HELP),
        Command::Exit => {}
    }
    Ok(())
}

fn main() {
    let level = logger::level_from(env::var("SFS_LOG").ok().as_deref());
    if let Err(e) = logger::init(level) {
        eprintln!("failed to install logger: {}", e);
    }

    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let mut fs = SFS::open(FileImage::new(&path));
    if fs.is_mounted() {
        println!("mounted {}", path);
    } else {
        println!("no file system found in {}, run format to create one", path);
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("sfs:{}$ ", fs.cwd_path().unwrap_or("/"));
        if io::stdout().flush().is_err() {
            break;
        }

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                error!("failed to read input: {}", e);
                break;
            }
            None => break,
        };

        match parse(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Exit)) => break,
            Ok(Some(command)) => {
                debug!("running {:?}", command);
                if let Err(e) = run(&mut fs, command) {
                    println!("error: {}", e);
                }
            }
            Err(message) => println!("{}", message),
        }
    }
}
