//! Format-specific archive writers.

use crate::fs::walker::FileInfo;
use crate::utils::errors::{KeeperError, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Supported archive formats, selected by the unit's `compress_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressFormat {
    Zip,
    TarGz,
    TarZst,
}

impl CompressFormat {
    /// File extension appended to the archive name.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressFormat::Zip => "zip",
            CompressFormat::TarGz => "tar.gz",
            CompressFormat::TarZst => "tar.zst",
        }
    }

    /// Create the archive file at `path` and return a writer for it.
    pub(crate) fn create(&self, path: &Path) -> Result<Box<dyn ArchiveWriter>> {
        let file = File::create(path).map_err(|e| KeeperError::filesystem(path, e))?;
        let writer: Box<dyn ArchiveWriter> = match self {
            CompressFormat::Zip => Box::new(ZipArchiveWriter {
                inner: ZipWriter::new(file),
            }),
            CompressFormat::TarGz => Box::new(TarArchiveWriter {
                inner: tar::Builder::new(TarSink::Gz(GzEncoder::new(file, Compression::default()))),
            }),
            CompressFormat::TarZst => {
                let encoder = zstd::Encoder::new(file, 3).map_err(|e| KeeperError::filesystem(path, e))?;
                Box::new(TarArchiveWriter {
                    inner: tar::Builder::new(TarSink::Zst(encoder)),
                })
            }
        };
        Ok(writer)
    }
}

impl FromStr for CompressFormat {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(CompressFormat::Zip),
            "tar.gz" | "tgz" => Ok(CompressFormat::TarGz),
            "tar.zst" | "zst" => Ok(CompressFormat::TarZst),
            _ => Err(KeeperError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Sink for walked entries. Zero-length files get an entry but no body.
pub(crate) trait ArchiveWriter {
    fn add_dir(&mut self, entry: &FileInfo) -> Result<()>;

    fn add_file(&mut self, entry: &FileInfo) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()>;
}

fn archive_io_error(entry: &FileInfo, e: impl std::error::Error + Send + Sync + 'static) -> KeeperError {
    KeeperError::filesystem(&entry.path, io::Error::other(e))
}

struct ZipArchiveWriter {
    inner: ZipWriter<File>,
}

impl ZipArchiveWriter {
    fn options(entry: &FileInfo) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(entry.size >= u32::MAX as u64);
        match entry.modified.and_then(zip_timestamp) {
            Some(stamp) => options.last_modified_time(stamp),
            None => options,
        }
    }
}

/// Zip timestamps are local time with two-second resolution, 1980 to 2107.
fn zip_timestamp(modified: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = modified.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_dir(&mut self, entry: &FileInfo) -> Result<()> {
        self.inner
            .add_directory(entry.archive_name.as_str(), Self::options(entry))
            .map_err(|e| archive_io_error(entry, e))
    }

    fn add_file(&mut self, entry: &FileInfo) -> Result<()> {
        self.inner
            .start_file(entry.archive_name.as_str(), Self::options(entry))
            .map_err(|e| archive_io_error(entry, e))?;

        if entry.size == 0 {
            return Ok(());
        }

        let mut source = File::open(&entry.path).map_err(|e| KeeperError::filesystem(&entry.path, e))?;
        io::copy(&mut source, &mut self.inner).map_err(|e| KeeperError::filesystem(&entry.path, e))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.inner
            .finish()
            .map_err(|e| KeeperError::Io(io::Error::other(e)))?;
        Ok(())
    }
}

/// Compressed byte sink under a tar stream.
enum TarSink {
    Gz(GzEncoder<File>),
    Zst(zstd::Encoder<'static, File>),
}

impl TarSink {
    fn finish(self) -> io::Result<File> {
        match self {
            TarSink::Gz(encoder) => encoder.finish(),
            TarSink::Zst(encoder) => encoder.finish(),
        }
    }
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Gz(encoder) => encoder.write(buf),
            TarSink::Zst(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Gz(encoder) => encoder.flush(),
            TarSink::Zst(encoder) => encoder.flush(),
        }
    }
}

struct TarArchiveWriter {
    inner: tar::Builder<TarSink>,
}

impl ArchiveWriter for TarArchiveWriter {
    fn add_dir(&mut self, entry: &FileInfo) -> Result<()> {
        self.inner
            .append_dir(&entry.archive_name, &entry.path)
            .map_err(|e| KeeperError::filesystem(&entry.path, e))
    }

    fn add_file(&mut self, entry: &FileInfo) -> Result<()> {
        let metadata = std::fs::metadata(&entry.path).map_err(|e| KeeperError::filesystem(&entry.path, e))?;
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_size(entry.size);

        let result = if entry.size == 0 {
            self.inner.append_data(&mut header, &entry.archive_name, io::empty())
        } else {
            let source = File::open(&entry.path).map_err(|e| KeeperError::filesystem(&entry.path, e))?;
            self.inner.append_data(&mut header, &entry.archive_name, source)
        };
        result.map_err(|e| KeeperError::filesystem(&entry.path, e))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let sink = self.inner.into_inner()?;
        sink.finish()?.sync_all()?;
        Ok(())
    }
}
