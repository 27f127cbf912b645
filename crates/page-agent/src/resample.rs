use std::io::Cursor;

use autopost_core_types::MediaAsset;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use tracing::{debug, warn};

/// Stretches images smaller than `min_px` on either side onto a square
/// `canvas_px` canvas. The target page rejects tiny images outright.
///
/// The original format is kept when it can be re-encoded, otherwise the
/// result is PNG. Undecodable input is returned untouched.
pub fn upscale_small_image(asset: MediaAsset, min_px: u32, canvas_px: u32) -> MediaAsset {
    let format = match image::guess_format(&asset.bytes) {
        Ok(format) => format,
        Err(err) => {
            debug!(target: "page-agent", url = %asset.source_url, %err, "not a decodable image");
            return asset;
        }
    };
    let img = match image::load_from_memory_with_format(&asset.bytes, format) {
        Ok(img) => img,
        Err(err) => {
            warn!(target: "page-agent", url = %asset.source_url, %err, "image decode failed");
            return asset;
        }
    };

    let (width, height) = img.dimensions();
    if width >= min_px && height >= min_px {
        return asset;
    }

    let resized = img.resize_exact(canvas_px, canvas_px, FilterType::Triangle);
    let (encoded, output, mime, ext) = match format {
        ImageFormat::Jpeg => (
            DynamicImage::ImageRgb8(resized.to_rgb8()),
            ImageOutputFormat::Jpeg(90),
            "image/jpeg",
            None,
        ),
        ImageFormat::Png => (resized, ImageOutputFormat::Png, "image/png", None),
        ImageFormat::Bmp => (resized, ImageOutputFormat::Bmp, "image/bmp", None),
        _ => (resized, ImageOutputFormat::Png, "image/png", Some("png")),
    };

    let mut bytes = Vec::new();
    if let Err(err) = encoded.write_to(&mut Cursor::new(&mut bytes), output) {
        warn!(target: "page-agent", url = %asset.source_url, %err, "image re-encode failed");
        return asset;
    }

    debug!(
        target: "page-agent",
        url = %asset.source_url,
        from = %format!("{width}x{height}"),
        to = canvas_px,
        "upscaled small image"
    );

    let filename = match ext {
        Some(ext) => with_extension(&asset.filename, ext),
        None => asset.filename,
    };
    MediaAsset {
        source_url: asset.source_url,
        filename,
        mime_type: mime.to_string(),
        bytes,
    }
}

fn with_extension(filename: &str, ext: &str) -> String {
    let stem = filename.rsplit_once('.').map_or(filename, |(stem, _)| stem);
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    fn png(width: u32, height: u32) -> MediaAsset {
        MediaAsset {
            source_url: "https://i.imgur.com/tiny.png".into(),
            filename: "tiny.png".into(),
            mime_type: "image/png".into(),
            bytes: png_bytes(width, height),
        }
    }

    #[test]
    fn small_images_are_stretched_to_canvas() {
        let out = upscale_small_image(png(50, 300), 200, 400);
        let img = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(img.dimensions(), (400, 400));
        assert_eq!(out.mime_type, "image/png");
        assert_eq!(out.filename, "tiny.png");
    }

    #[test]
    fn large_images_pass_through() {
        let input = png(300, 200);
        let out = upscale_small_image(input.clone(), 200, 400);
        assert_eq!(out, input);
    }

    #[test]
    fn jpeg_stays_jpeg() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image::RgbImage::new(10, 10))
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(80))
            .unwrap();
        let out = upscale_small_image(
            MediaAsset {
                source_url: "https://example.com/a.jpg".into(),
                filename: "a.jpg".into(),
                mime_type: "image/jpeg".into(),
                bytes,
            },
            200,
            400,
        );
        assert_eq!(out.mime_type, "image/jpeg");
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn garbage_is_left_alone() {
        let asset = MediaAsset {
            source_url: "https://example.com/clip.mp4".into(),
            filename: "clip.mp4".into(),
            mime_type: "video/mp4".into(),
            bytes: vec![0, 1, 2, 3],
        };
        assert_eq!(upscale_small_image(asset.clone(), 200, 400), asset);
    }

    #[test]
    fn extension_swap() {
        assert_eq!(with_extension("photo.webp", "png"), "photo.png");
        assert_eq!(with_extension("media_1", "png"), "media_1.png");
    }
}
