//! PNG export of the committed raster.
//!
//! Export flattens the committed layer over the derived background color;
//! overlay content (ghosts, cursors, previews) never reaches the file.

use std::io::Write;

use thiserror::Error;

use crate::pixmap::{Pixmap, Rgba};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Empty raster cannot be exported")]
    EmptyRaster,
    #[error("PNG encoding failed: {0}")]
    Encoding(#[from] png::EncodingError),
}

/// Encode the committed layer over `background` as an RGBA PNG.
pub fn write_png<W: Write>(
    committed: &Pixmap,
    background: Rgba,
    writer: W,
) -> Result<(), ExportError> {
    if committed.width() == 0 || committed.height() == 0 {
        return Err(ExportError::EmptyRaster);
    }
    let flat = committed.flatten_onto(background);

    let mut encoder = png::Encoder::new(writer, flat.width(), flat.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder.write_header()?;
    png_writer.write_image_data(flat.data())?;
    png_writer.finish()?;
    Ok(())
}

/// Encode to an in-memory PNG buffer.
pub fn encode_png(committed: &Pixmap, background: Rgba) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    write_png(committed, background, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_encode_produces_png() {
        let mut committed = Pixmap::new(16, 16);
        committed.blend_pixel(8, 8, [255, 0, 0, 255], 1.0);
        let bytes = encode_png(&committed, [255, 255, 255, 255]).unwrap();
        assert_eq!(&bytes[..8], &PNG_MAGIC);
    }

    #[test]
    fn test_empty_raster_rejected() {
        let committed = Pixmap::new(0, 0);
        assert!(matches!(
            encode_png(&committed, [255, 255, 255, 255]),
            Err(ExportError::EmptyRaster)
        ));
    }

    #[test]
    fn test_roundtrip_background_applied() {
        let committed = Pixmap::new(4, 4);
        let bytes = encode_png(&committed, [0, 0, 255, 255]).unwrap();

        let decoder = png::Decoder::new(&bytes[..]);
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!(info.width, 4);
        assert_eq!(&buf[..4], &[0, 0, 255, 255]);
    }
}
