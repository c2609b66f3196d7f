use std::io::{self, Write};

use flate2::write::{GzEncoder, ZlibEncoder};

use super::Compression;

const ZSTD_LEVEL: i32 = 3;

enum Writer {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
    /// Snappy's raw format has no streaming writer, so the input is buffered until `finish`.
    Snappy(Vec<u8>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl Writer {
    fn new(compression: Compression) -> io::Result<Self> {
        let buffer = Vec::with_capacity(1_024);
        Ok(match compression {
            Compression::None => Self::Plain(buffer),
            Compression::Gzip => Self::Gzip(GzEncoder::new(buffer, flate2::Compression::default())),
            Compression::Zlib => {
                Self::Zlib(ZlibEncoder::new(buffer, flate2::Compression::default()))
            }
            Compression::Snappy => Self::Snappy(buffer),
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(buffer, ZSTD_LEVEL)?),
        })
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(inner) | Self::Snappy(inner) => inner.write(buf),
            Self::Gzip(writer) => writer.write(buf),
            Self::Zlib(writer) => writer.write(buf),
            Self::Zstd(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(_) | Self::Snappy(_) => Ok(()),
            Self::Gzip(writer) => writer.flush(),
            Self::Zlib(writer) => writer.flush(),
            Self::Zstd(writer) => writer.flush(),
        }
    }
}

/// Compressor for request bodies, picked by [`Compression`].
pub struct Compressor {
    inner: Writer,
}

impl Compressor {
    pub fn new(compression: Compression) -> io::Result<Self> {
        Ok(Self {
            inner: Writer::new(compression)?,
        })
    }

    /// Consumes the compressor, returning the finished payload.
    ///
    /// # Errors
    ///
    /// If the compressor encounters an I/O error while finalizing the payload, an error
    /// variant will be returned.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self.inner {
            Writer::Plain(buf) => Ok(buf),
            Writer::Gzip(writer) => writer.finish(),
            Writer::Zlib(writer) => writer.finish(),
            Writer::Snappy(buf) => Ok(snap::raw::Encoder::new().compress_vec(&buf)?),
            Writer::Zstd(writer) => writer.finish(),
        }
    }
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compresses a whole payload in one go.
pub fn compress(compression: Compression, payload: &[u8]) -> io::Result<Vec<u8>> {
    if !compression.is_compressed() {
        return Ok(payload.to_vec());
    }
    let mut compressor = Compressor::new(compression)?;
    compressor.write_all(payload)?;
    compressor.finish()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    const PAYLOAD: &[u8] = b"{\"message\":\"hello\"}\n{\"message\":\"hello\"}\n{\"message\":\"hello\"}\n";

    #[test]
    fn none_is_identity() {
        assert_eq!(compress(Compression::None, PAYLOAD).unwrap(), PAYLOAD);
    }

    #[test]
    fn gzip_decodes() {
        let compressed = compress(Compression::Gzip, PAYLOAD).unwrap();
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, PAYLOAD);
    }

    #[test]
    fn zlib_decodes() {
        let compressed = compress(Compression::Zlib, PAYLOAD).unwrap();
        let mut decoded = Vec::new();
        flate2::read::ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, PAYLOAD);
    }

    #[test]
    fn snappy_decodes() {
        let compressed = compress(Compression::Snappy, PAYLOAD).unwrap();
        let decoded = snap::raw::Decoder::new().decompress_vec(&compressed).unwrap();
        assert_eq!(decoded, PAYLOAD);
    }

    #[test]
    fn zstd_decodes() {
        let compressed = compress(Compression::Zstd, PAYLOAD).unwrap();
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), PAYLOAD);
    }
}
