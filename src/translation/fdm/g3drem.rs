// src/translation/fdm/g3drem.rs - Dremel g3drem container: header, preview bitmap, G-code
use super::Estimates;
use std::path::Path;

pub const MAGIC: &[u8; 16] = b"g3drem 1.0      ";
pub const HEADER_LEN: usize = 58;

const ICON_WIDTH: u32 = 80;
const ICON_HEIGHT: u32 = 60;

/// Builds the fixed 58-byte little-endian header.
pub fn header(bmp_len: usize, estimates: Estimates) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.extend_from_slice(MAGIC);
    let image_addr = HEADER_LEN as u32;
    buf.extend_from_slice(&image_addr.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(image_addr + bmp_len as u32).to_le_bytes());
    buf.extend_from_slice(&(estimates.print_time.trunc() as u32).to_le_bytes());
    buf.extend_from_slice(&(estimates.material_length.trunc() as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    // flags, layer height, infill, shells, speed, platform and two extruder temps
    for _ in 0..8 {
        buf.extend_from_slice(&0u16.to_le_bytes());
    }
    // material types
    buf.extend_from_slice(&[0u8, 0u8]);
    buf
}

/// Plain white 24-bit bitmap used when no preview icon is configured.
pub fn placeholder_bitmap() -> Vec<u8> {
    let row_len = (ICON_WIDTH * 3).div_ceil(4) * 4;
    let pixels_len = row_len * ICON_HEIGHT;
    let file_len = 54 + pixels_len;

    let mut bmp = Vec::with_capacity(file_len as usize);
    bmp.extend_from_slice(b"BM");
    bmp.extend_from_slice(&file_len.to_le_bytes());
    bmp.extend_from_slice(&0u32.to_le_bytes());
    bmp.extend_from_slice(&54u32.to_le_bytes());
    bmp.extend_from_slice(&40u32.to_le_bytes());
    bmp.extend_from_slice(&(ICON_WIDTH as i32).to_le_bytes());
    bmp.extend_from_slice(&(ICON_HEIGHT as i32).to_le_bytes());
    bmp.extend_from_slice(&1u16.to_le_bytes());
    bmp.extend_from_slice(&24u16.to_le_bytes());
    bmp.extend_from_slice(&0u32.to_le_bytes());
    bmp.extend_from_slice(&pixels_len.to_le_bytes());
    bmp.extend_from_slice(&2835i32.to_le_bytes());
    bmp.extend_from_slice(&2835i32.to_le_bytes());
    bmp.extend_from_slice(&0u32.to_le_bytes());
    bmp.extend_from_slice(&0u32.to_le_bytes());
    bmp.resize(file_len as usize, 0xff);
    bmp
}

/// Writes header, bitmap and G-code to `output`.
pub async fn write(
    output: &Path,
    gcode: &[u8],
    icon: Option<&Path>,
    estimates: Estimates,
) -> std::io::Result<()> {
    let bmp = match icon {
        Some(path) => tokio::fs::read(path).await.map_err(|e| {
            tracing::error!("Failed to read Dremel icon {}: {}", path.display(), e);
            e
        })?,
        None => placeholder_bitmap(),
    };
    let mut file = header(bmp.len(), estimates);
    file.extend_from_slice(&bmp);
    file.extend_from_slice(gcode);
    tokio::fs::write(output, file).await
}
