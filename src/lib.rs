//! zipdrop packs uploaded files into ZIP archives on disk
//! and hands them back by name:
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use zipdrop::*;
//! let config = StoreConfig::new("/srv/zips")?;
//! let archiver = Archiver::new(config.clone());
//! let retriever = Retriever::new(config);
//!
//! // Whatever parsed the request gives us a stream and the name the client sent.
//! let upload = File::open("/tmp/upload-7f3a")?;
//! let name = archiver.create(Some(Upload::new("report.csv", upload)))?;
//! assert_eq!(name, "report.csv.zip");
//!
//! // Hand out `identifier_for(&name)` in a URL; it comes back percent-encoded.
//! let fetched = retriever.fetch(&identifier_for(&name))?;
//! println!("{} is {} bytes", fetched.name, fetched.len);
//!
//! // Or look inside:
//! let (entry, mut contents) = fetched.into_entry()?;
//! assert_eq!(entry.name, "report.csv");
//! io::copy(&mut contents, &mut io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Uploads are streamed through a DEFLATE encoder one buffer at a time,
//! so archiving a file takes the same memory whether it's a kilobyte or
//! a hundred gigabytes. Each upload is written to its own hidden staging
//! file and renamed into place only once the archive is complete,
//! so a failed, cancelled, or concurrent upload never leaves a broken
//! archive where [`Retriever::fetch()`] could find it.
//! What happens when two uploads want the same name is up to the
//! [`CollisionPolicy`].
//!
//! Names are untrusted in both directions. Uploads' declared names go through
//! [`SafeName::parse()`] before any path is built from them,
//! and identifiers handed to [`Retriever::fetch()`] must resolve to a file
//! directly inside the archive root.
//!
//! [`Retriever::fetch()`]: retriever/struct.Retriever.html#method.fetch
//! [`CollisionPolicy`]: config/enum.CollisionPolicy.html
//! [`SafeName::parse()`]: name/struct.SafeName.html#method.parse

pub mod archiver;
pub mod cancel;
pub mod config;
pub mod name;
pub mod read;
pub mod result;
pub mod retriever;
#[cfg(feature = "async")]
pub mod task;
pub mod write;

pub use archiver::{Archiver, Upload};
pub use cancel::CancelFlag;
pub use config::{CollisionPolicy, StoreConfig, ARCHIVE_SUFFIX};
pub use name::{NameRejection, SafeName};
pub use read::{ArchiveReader, CompressionMethod, EntryMetadata};
pub use result::{ArchiveError, ArchiveResult, ErrorClass};
pub use retriever::{identifier_for, Fetched, Retriever};
#[cfg(feature = "async")]
pub use task::ArchiveTask;

mod arch;
mod checksum;
mod spec;
