//! Printable QR codes that send a phone straight to a board's capture page.
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

/// Smallest rendered edge in pixels; big enough to print on a shelf label.
const MIN_DIMENSION: u32 = 320;

pub fn board_upload_url(base: &str, town_slug: &str, location_slug: &str) -> String {
    format!("{}/upload/{}/{}", base.trim_end_matches('/'), town_slug, location_slug)
}

pub fn render_svg(url: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::with_error_correction_level(url.as_bytes(), EcLevel::M)?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_url_joins_slugs() {
        assert_eq!(
            board_upload_url("https://boards.example.org/", "ashby", "bean-there"),
            "https://boards.example.org/upload/ashby/bean-there"
        );
    }

    #[test]
    fn renders_svg_document() {
        let svg = render_svg("https://boards.example.org/upload/ashby/bean-there").unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn oversized_payload_is_an_error() {
        assert!(render_svg(&"x".repeat(8000)).is_err());
    }
}
