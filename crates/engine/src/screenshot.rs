//! Screenshot capture and normalisation

use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::browser::BrowserSession;
use crate::error::BrowserResult;

/// Decode a capture, downscale it to `max_width` and return base64 PNG
pub fn encode_screenshot(bytes: &[u8], max_width: u32) -> BrowserResult<String> {
    let image = image::load_from_memory(bytes)?;
    let image = downscale(image, max_width);

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

fn downscale(image: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || image.width() <= max_width {
        return image;
    }
    let height = (u64::from(image.height()) * u64::from(max_width) / u64::from(image.width()))
        .max(1) as u32;
    image.resize_exact(max_width, height, FilterType::Triangle)
}

/// Best-effort capture of the current page; failures are logged and swallowed
pub async fn capture(session: &dyn BrowserSession, max_width: u32) -> Option<String> {
    let bytes = match session.screenshot().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Screenshot capture failed: {}", e);
            return None;
        }
    };
    match encode_screenshot(&bytes, max_width) {
        Ok(encoded) => {
            debug!("Captured screenshot ({} bytes raw)", bytes.len());
            Some(encoded)
        }
        Err(e) => {
            warn!("Screenshot encoding failed: {}", e);
            None
        }
    }
}
