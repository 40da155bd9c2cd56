//! Single-stream codecs: one file in, one file out

use super::copy::copy_cancellable;
use super::{has_extension, FormatProvider, SourceSpec, StageContext};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use filetime::FileTime;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// Compression algorithm of a single-file provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Xz,
    Zstd,
    Brotli,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Xz => "xz",
            Codec::Zstd => "zstd",
            Codec::Brotli => "brotli",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Codec::Gzip => &["gz"],
            Codec::Xz => &["xz"],
            Codec::Zstd => &["zst"],
            Codec::Brotli => &["br"],
        }
    }
}

/// Provider for a stream codec such as gzip.
///
/// `dir/name.gz` extracts to `<destination>/name`. The output name depends
/// only on the source file name, so conflicts can be predicted before an
/// intermediate source exists.
#[derive(Debug, Clone, Copy)]
pub struct SingleFileProvider {
    codec: Codec,
}

impl SingleFileProvider {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Where extracting `source` into `destination` writes
    pub fn output_path(&self, source: &Path, destination: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| source.as_os_str().to_os_string());
        destination.join(stem)
    }

    fn open_decoder(&self, file: File) -> io::Result<Box<dyn Read>> {
        let file = BufReader::new(file);
        Ok(match self.codec {
            Codec::Gzip => Box::new(GzDecoder::new(file)),
            Codec::Xz => Box::new(XzDecoder::new(file)),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(file)?),
            Codec::Brotli => Box::new(brotli::Decompressor::new(file, 4096)),
        })
    }

    fn pump<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        reader: &mut R,
        writer: &mut W,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StageError> {
        let format = self.codec.name();
        copy_cancellable(reader, writer, cancel).map_err(|e| {
            e.into_stage_error(
                |e| StageError::from_io(e, source, format),
                |e| StageError::io(e, destination),
            )
        })
    }

    fn encode(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let input = File::open(source).map_err(|e| StageError::io(e, source))?;
        let mtime = input
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let mut input = BufReader::new(input);
        let out = File::create(destination).map_err(|e| StageError::io(e, destination))?;
        let out = BufWriter::new(out);
        let finish_err = |e| StageError::io(e, destination);

        match self.codec {
            Codec::Gzip => {
                let mut builder = GzBuilder::new().mtime(mtime);
                if let Some(name) = source.file_name().and_then(|n| n.to_str()) {
                    builder = builder.filename(name);
                }
                let mut enc = builder.write(out, Compression::default());
                self.pump(&mut input, &mut enc, source, destination, cancel)?;
                enc.finish().and_then(|mut w| w.flush()).map_err(finish_err)?;
            }
            Codec::Xz => {
                let mut enc = XzEncoder::new(out, 6);
                self.pump(&mut input, &mut enc, source, destination, cancel)?;
                enc.finish().and_then(|mut w| w.flush()).map_err(finish_err)?;
            }
            Codec::Zstd => {
                let mut enc = zstd::stream::write::Encoder::new(out, 3).map_err(finish_err)?;
                self.pump(&mut input, &mut enc, source, destination, cancel)?;
                enc.finish().and_then(|mut w| w.flush()).map_err(finish_err)?;
            }
            Codec::Brotli => {
                let mut enc = brotli::CompressorWriter::new(out, 4096, 11, 22);
                self.pump(&mut input, &mut enc, source, destination, cancel)?;
                enc.flush().map_err(finish_err)?;
                enc.into_inner().flush().map_err(finish_err)?;
            }
        }
        Ok(())
    }

    fn decode(
        &self,
        source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let input = File::open(source).map_err(|e| StageError::io(e, source))?;
        let out = File::create(output).map_err(|e| StageError::io(e, output))?;
        let mut out = BufWriter::new(out);

        let stored_mtime = if self.codec == Codec::Gzip {
            let mut dec = GzDecoder::new(BufReader::new(input));
            self.pump(&mut dec, &mut out, source, output, cancel)?;
            dec.header().map(|h| h.mtime()).filter(|&t| t > 0)
        } else {
            let mut dec = self
                .open_decoder(input)
                .map_err(|e| StageError::from_io(e, source, self.codec.name()))?;
            self.pump(&mut dec, &mut out, source, output, cancel)?;
            None
        };
        out.flush().map_err(|e| StageError::io(e, output))?;
        drop(out);

        if let Some(mtime) = stored_mtime {
            let mtime = FileTime::from_unix_time(i64::from(mtime), 0);
            if let Err(e) = filetime::set_file_mtime(output, mtime) {
                debug!(path = %output.display(), error = %e, "Could not restore modification time");
            }
        }
        Ok(())
    }
}

impl FormatProvider for SingleFileProvider {
    fn name(&self) -> &'static str {
        self.codec.name()
    }

    fn can_extract(&self, path: &Path) -> bool {
        has_extension(path, self.codec.extensions())
    }

    fn can_compress_from(&self, path: &Path) -> bool {
        self.compressible_source_extensions().accepts(path)
    }

    fn can_compress_as_destination(&self, path: &Path) -> bool {
        has_extension(path, self.codec.extensions())
    }

    fn extractable_extensions(&self) -> &'static [&'static str] {
        self.codec.extensions()
    }

    fn compressible_extensions(&self) -> &'static [&'static str] {
        self.codec.extensions()
    }

    fn compressible_source_extensions(&self) -> SourceSpec {
        SourceSpec::Files
    }

    fn supports_piped_conflict_detection(&self) -> bool {
        true
    }

    fn scan_conflicts(
        &self,
        source: &Path,
        destination: &Path,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, StageError> {
        let output = self.output_path(source, destination);
        if output.exists() {
            Ok(vec![output.display().to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    fn extract(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let output = self.output_path(source, destination);
        if ctx.log_files {
            info!(path = %source.display(), "Extracting");
        }
        debug!(format = self.name(), output = %output.display(), "Decoding stream");

        let result = self.decode(source, &output, ctx.cancel);
        if result.is_err() {
            let _ = fs::remove_file(&output);
        }
        result
    }

    fn compress(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        if source.is_dir() {
            return Err(StageError::Unsupported {
                format: self.name(),
                operation: "compressing a directory",
            });
        }
        if ctx.log_files {
            info!(path = %source.display(), "Compressing");
        }

        let result = self.encode(source, destination, ctx.cancel);
        if result.is_err() {
            let _ = fs::remove_file(destination);
        }
        result
    }
}
