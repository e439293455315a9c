//! Pixel dimensions and MIME type of raster files.
//!
//! TIFF, PNM, PNG and JPEG go through the `image` crate's header readers.
//! JPEG 2000 is not supported there, so JP2 files are recognised by their
//! signature box and measured from the `ihdr` box inside `jp2h`.

use super::ManifestError;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub const JP2_MIME: &str = "image/jp2";

/// The 12-byte JPEG 2000 signature box.
const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

impl ImageInfo {
    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Read dimensions and MIME type from the file's header.
pub fn read_image_info(path: &Path) -> Result<ImageInfo, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata_err = |detail: String| ManifestError::ImageMetadata {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = BufReader::new(File::open(path).map_err(io_err)?);
    if is_jp2(&mut file).map_err(io_err)? {
        let (width, height) = jp2_dimensions(&mut file)
            .map_err(io_err)?
            .ok_or_else(|| metadata_err("no ihdr box inside jp2h".to_string()))?;
        return Ok(ImageInfo {
            width,
            height,
            mime_type: JP2_MIME.to_string(),
        });
    }

    let reader = image::ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    let format = reader
        .format()
        .ok_or_else(|| metadata_err("unrecognised image format".to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| metadata_err(e.to_string()))?;
    Ok(ImageInfo {
        width,
        height,
        mime_type: format.to_mime_type().to_string(),
    })
}

/// Longer of the two pixel dimensions.
pub fn long_side(path: &Path) -> Result<u32, ManifestError> {
    read_image_info(path).map(|info| info.long_side())
}

fn is_jp2<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let mut head = [0u8; 12];
    let matched = match reader.read_exact(&mut head) {
        Ok(()) => head == JP2_SIGNATURE,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    Ok(matched)
}

/// `(width, height)` from the `jp2h/ihdr` box, or `None` if it is absent.
pub fn jp2_dimensions<R: Read + Seek>(reader: &mut R) -> io::Result<Option<(u32, u32)>> {
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let Some((_, header_end)) = find_box(reader, end, b"jp2h")? else {
        return Ok(None);
    };
    let Some(_) = find_box(reader, header_end, b"ihdr")? else {
        return Ok(None);
    };
    // ihdr: HEIGHT(4) WIDTH(4) NC(2) BPC(1) C(1) UnkC(1) IPR(1)
    let mut dims = [0u8; 8];
    reader.read_exact(&mut dims)?;
    let height = u32::from_be_bytes([dims[0], dims[1], dims[2], dims[3]]);
    let width = u32::from_be_bytes([dims[4], dims[5], dims[6], dims[7]]);
    Ok(Some((width, height)))
}

/// Scan sibling boxes from the current position up to `end` for `wanted`.
///
/// On a match the reader is left at the start of the box content and the
/// content range is returned.
fn find_box<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    wanted: &[u8; 4],
) -> io::Result<Option<(u64, u64)>> {
    loop {
        let start = reader.stream_position()?;
        if start + 8 > end {
            return Ok(None);
        }
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let kind = [header[4], header[5], header[6], header[7]];

        let (content_start, box_end) = match declared {
            0 => (start + 8, end),
            1 => {
                let mut extended = [0u8; 8];
                reader.read_exact(&mut extended)?;
                (start + 16, start + u64::from_be_bytes(extended))
            }
            n => (start + 8, start + n),
        };
        if box_end < content_start || box_end > end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed JP2 box at offset {start}"),
            ));
        }
        if &kind == wanted {
            return Ok(Some((content_start, box_end)));
        }
        reader.seek(SeekFrom::Start(box_end))?;
    }
}

/// Minimal JP2 byte stream: signature, `ftyp`, and `jp2h` with an `ihdr`.
#[cfg(test)]
pub(crate) fn jp2_header_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = JP2_SIGNATURE.to_vec();
    out.extend_from_slice(&20u32.to_be_bytes());
    out.extend_from_slice(b"ftypjp2 \0\0\0\0jp2 ");
    out.extend_from_slice(&(8u32 + 22).to_be_bytes());
    out.extend_from_slice(b"jp2h");
    out.extend_from_slice(&22u32.to_be_bytes());
    out.extend_from_slice(b"ihdr");
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&[0, 3, 7, 7, 0, 0]);
    out
}
