//! Reading recordings that may be compressed.

use crate::Result;
use flate2::read::GzDecoder;
use std::io::Read;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Detect the compression from the leading bytes.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if bytes.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Read the whole input and undo gzip or zstd compression if present.
pub fn read_recording<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    decompress(raw)
}

/// Decompress a buffer according to its leading bytes.
pub fn decompress(raw: Vec<u8>) -> Result<Vec<u8>> {
    match Compression::detect(&raw) {
        Compression::None => Ok(raw),
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
            log::debug!("gunzipped {} -> {} bytes", raw.len(), out.len());
            Ok(out)
        }
        Compression::Zstd => {
            let out = zstd::stream::decode_all(raw.as_slice())?;
            log::debug!("zstd decoded {} -> {} bytes", raw.len(), out.len());
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const PAYLOAD: &[u8] = b"FLR\0 not really a recording";

    #[test]
    fn detects_formats() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 8]), Compression::Gzip);
        assert_eq!(Compression::detect(&ZSTD_MAGIC), Compression::Zstd);
        assert_eq!(Compression::detect(b"FLR\0"), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
        assert_eq!(Compression::detect(&[0x1f]), Compression::None);
    }

    #[test]
    fn plain_input_passes_through() {
        assert_eq!(read_recording(PAYLOAD).unwrap(), PAYLOAD);
    }

    #[test]
    fn gzip_input_is_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(PAYLOAD).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(read_recording(compressed.as_slice()).unwrap(), PAYLOAD);
    }

    #[test]
    fn zstd_input_is_decoded() {
        let compressed = zstd::stream::encode_all(PAYLOAD, 3).unwrap();
        assert_eq!(read_recording(compressed.as_slice()).unwrap(), PAYLOAD);
    }

    #[test]
    fn corrupt_gzip_is_an_io_error() {
        let err = read_recording(&[0x1f, 0x8b, 0x00, 0x01][..]).unwrap_err();
        assert!(matches!(err, crate::ConvertError::Io(_)));
    }
}
