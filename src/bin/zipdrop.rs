use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use zipdrop::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "zipdrop", about = "Packs files into ZIP archives and serves them back")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Directory holding the archives
    #[structopt(short, long, env = "ZIPDROP_ROOT")]
    root: Utf8PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Archives a file and prints the identifier to fetch it by
    Pack {
        /// Name to store the file under (defaults to its file name)
        #[structopt(short, long)]
        name: Option<String>,

        /// What to do if the archive name is taken: uniquify, overwrite, or reject
        #[structopt(long, default_value = "uniquify")]
        collision: CollisionPolicy,

        /// DEFLATE level, 0-9
        #[structopt(long, default_value = "9")]
        level: u32,

        #[structopt(name("FILE"))]
        file: PathBuf,
    },
    /// Copies an archive out of the store
    Fetch {
        /// Percent-encoded archive name, as handed out by `pack`
        #[structopt(name("ID"))]
        id: String,

        /// Write here instead of stdout
        #[structopt(short, long)]
        output: Option<PathBuf>,
    },
    /// Removes staging files left behind by interrupted uploads
    Sweep {
        /// Only remove files idle for at least this many seconds
        #[structopt(long, default_value = "3600")]
        older_than: u64,
    },
    /// Decompresses an archive's entry
    Extract {
        /// Percent-encoded archive name, as handed out by `pack`
        #[structopt(name("ID"))]
        id: String,

        /// Write here instead of stdout
        #[structopt(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let config = StoreConfig::new(&args.root)
        .with_context(|| format!("Couldn't open archive store {}", args.root))?;

    match args.command {
        Command::Pack {
            name,
            collision,
            level,
            file,
        } => {
            let name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_owned)
                    .ok_or_else(|| anyhow!("Can't name {}; pass --name", file.display()))?,
            };
            let input =
                File::open(&file).with_context(|| format!("Couldn't open {}", file.display()))?;
            let declared_len = input.metadata()?.len();
            let archiver = Archiver::new(
                config
                    .with_collision_policy(collision)
                    .with_compression_level(level),
            );
            let archive_name = archiver
                .create(Some(Upload::new(name, input).with_declared_len(declared_len)))
                .context("Couldn't archive file")?;
            println!("{}", identifier_for(&archive_name));
            Ok(())
        }
        Command::Sweep { older_than } => {
            let removed = Archiver::new(config)
                .sweep_staging(Duration::from_secs(older_than))
                .context("Couldn't sweep staging files")?;
            println!("{}", removed);
            Ok(())
        }
        Command::Fetch { id, output } => {
            let mut fetched = Retriever::new(config)
                .fetch(&id)
                .with_context(|| format!("Couldn't fetch {}", id))?;
            info!("Fetching {} ({} bytes)", fetched.name, fetched.len);
            copy_out(&mut fetched.file, output)
        }
        Command::Extract { id, output } => {
            let fetched = Retriever::new(config)
                .fetch(&id)
                .with_context(|| format!("Couldn't fetch {}", id))?;
            let (entry, mut contents) = fetched
                .into_entry()
                .with_context(|| format!("Couldn't read {}", id))?;
            info!("Extracting {} ({} bytes)", entry.name, entry.size);
            copy_out(&mut contents, output)
        }
    }
}

fn copy_out<R: io::Read>(reader: &mut R, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let mut sink = File::create(&path)
                .with_context(|| format!("Couldn't create file {}", path.display()))?;
            io::copy(reader, &mut sink)?;
            sink.sync_all()?;
        }
        None => {
            let stdout = io::stdout();
            let mut sink = stdout.lock();
            io::copy(reader, &mut sink)?;
            sink.flush()?;
        }
    }
    Ok(())
}
