/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js#L554-L567
    2. ISO/IEC 23001-7 section 8.2 (TrackEncryptionBox)

*/

use crate::{Error, Reader, Result};
use std::io::{self, Read, Seek, SeekFrom};

/// Upper bound for the `moov` box loaded by [`read_default_kid`].
const MAX_MOOV_SIZE: u64 = 64 * 1024 * 1024;

struct BoxHeader {
    name: [u8; 4],
    header_size: u64,
    /// `None` when the box extends to the end of its parent.
    size: Option<u64>,
}

impl BoxHeader {
    fn parse(reader: &mut Reader) -> Result<Self> {
        let size = reader.read_u32()? as u64;
        let mut name = [0; 4];
        name.copy_from_slice(reader.read_bytes(4)?);

        Self::new(name, size, || reader.read_u64())
    }

    fn new(name: [u8; 4], size: u64, large_size: impl FnOnce() -> Result<u64>) -> Result<Self> {
        let header = match size {
            0 => Self {
                name,
                header_size: 8,
                size: None,
            },
            1 => Self {
                name,
                header_size: 16,
                size: Some(large_size()?),
            },
            x => Self {
                name,
                header_size: 8,
                size: Some(x),
            },
        };

        if let Some(size) = header.size
            && size < header.header_size
        {
            return Err(Error::InvalidBoxSize {
                name: header.name(),
                size,
            });
        }

        Ok(header)
    }

    fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn payload_size(&self) -> Option<u64> {
        self.size.map(|x| x - self.header_size)
    }
}

/// Parse the default kid from the `tenc` box of an in-memory init segment.
///
/// Returns the kid as 32 lowercase hex characters, or `None` when the data holds no
/// `tenc` box (for example a clear track).
pub fn default_kid(data: &[u8]) -> Result<Option<String>> {
    Ok(find_tenc(&mut Reader::new(data))?.map(hex::encode))
}

/// Scan the top level boxes of a file and parse the default kid from its `moov` box.
///
/// Only the `moov` box is loaded into memory, media data is skipped with seeks.
pub fn read_default_kid<R: Read + Seek>(mut source: R) -> Result<Option<String>> {
    loop {
        let mut head = [0; 8];

        if read_up_to(&mut source, &mut head)? < head.len() {
            return Ok(None);
        }

        let mut name = [0; 4];
        name.copy_from_slice(&head[4..]);
        let size = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as u64;

        let header = BoxHeader::new(name, size, || {
            let mut large = [0; 8];
            source.read_exact(&mut large)?;
            Ok(u64::from_be_bytes(large))
        })?;

        if &header.name == b"moov" {
            let mut body = vec![];

            match header.payload_size() {
                Some(size) if size > MAX_MOOV_SIZE => {
                    return Err(Error::BoxTooLarge {
                        name: header.name(),
                        size,
                    });
                }
                Some(size) => (&mut source).take(size).read_to_end(&mut body)?,
                None => source.read_to_end(&mut body)?,
            };

            return default_kid(&body);
        }

        match header.payload_size() {
            Some(size) => {
                let offset = i64::try_from(size).map_err(|_| Error::InvalidBoxSize {
                    name: header.name(),
                    size,
                })?;
                source.seek(SeekFrom::Current(offset))?;
            }
            None => return Ok(None),
        }
    }
}

fn find_tenc(reader: &mut Reader) -> Result<Option<[u8; 16]>> {
    while reader.remaining() >= 8 {
        let header = BoxHeader::parse(reader)?;

        // Truncated boxes are read as far as the data goes.
        let payload_size = header
            .payload_size()
            .map(|x| x.min(reader.remaining() as u64) as usize)
            .unwrap_or(reader.remaining());
        let mut payload = Reader::new(reader.read_bytes(payload_size)?);

        let kid = match &header.name {
            b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"sinf" | b"schi" => {
                find_tenc(&mut payload)?
            }
            b"stsd" => {
                // version + flags, entry count
                payload.skip(8)?;
                find_tenc(&mut payload)?
            }
            b"encv" => {
                skip_visual_sample_entry(&mut payload)?;
                find_tenc(&mut payload)?
            }
            b"enca" => {
                skip_audio_sample_entry(&mut payload)?;
                find_tenc(&mut payload)?
            }
            b"tenc" => Some(parse_tenc(&mut payload)?),
            _ => None,
        };

        if kid.is_some() {
            return Ok(kid);
        }
    }

    Ok(None)
}

fn skip_visual_sample_entry(reader: &mut Reader) -> Result<()> {
    // 6 reserved, 2 data reference index, 16 pre defined/reserved,
    // 4 width/height, 8 resolution, 4 reserved, 2 frame count,
    // 32 compressor name, 2 depth, 2 pre defined
    reader.skip(78)
}

fn skip_audio_sample_entry(reader: &mut Reader) -> Result<()> {
    // 6 reserved, 2 data reference index
    reader.skip(8)?;
    let version = reader.read_u16()?;
    // 2 revision, 4 vendor
    reader.skip(6)?;

    if version == 2 {
        reader.skip(48)?;
    } else {
        // channel count, sample size, compression id, packet size, sample rate
        reader.skip(12)?;
    }

    if version == 1 {
        reader.skip(16)?;
    }

    Ok(())
}

fn parse_tenc(reader: &mut Reader) -> Result<[u8; 16]> {
    // version + flags
    reader.skip(4)?;
    // reserved, crypt/skip byte block, is protected, per sample iv size
    reader.skip(4)?;

    let mut kid = [0; 16];
    kid.copy_from_slice(reader.read_bytes(16)?);
    Ok(kid)
}

fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}
