use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use tracing::debug;
use url::Url;

/// Re-encode a JPEG or PNG as JPEG at the given quality, returning the new
/// bytes only when they are smaller than the original.
pub fn recode(url: &Url, data: &[u8], quality: u8) -> Option<Vec<u8>> {
    let format = image::guess_format(data).ok()?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return None;
    }
    let decoded = image::load_from_memory_with_format(data, format).ok()?;
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder).ok()?;
    if out.len() >= data.len() {
        return None;
    }
    debug!(%url, from = data.len(), to = out.len(), "recoded image");
    Some(out)
}
