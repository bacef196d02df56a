//! Decorative text rendering.
//!
//! Routes:
//! - `POST /api/v1/render/text` — rasterize a short piece of marketing
//!   text onto a solid background and return it as base64 PNG.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RenderTextPayload {
    #[validate(length(min = 1, max = 200))]
    pub text: String,
    #[validate(range(min = 64, max = 4096))]
    #[serde(default = "default_width")]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    #[serde(default = "default_height")]
    pub height: u32,
    #[validate(range(min = 8.0, max = 512.0))]
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// Text color as `#rrggbb` or `#rrggbbaa`.
    #[serde(default = "default_color")]
    pub color: String,
    /// Background color as `#rrggbb` or `#rrggbbaa`.
    #[serde(default = "default_background")]
    pub background: String,
}

fn default_width() -> u32 {
    1024
}

fn default_height() -> u32 {
    512
}

fn default_font_size() -> f32 {
    64.0
}

fn default_color() -> String {
    "#ffffff".to_string()
}

fn default_background() -> String {
    "#00000000".to_string()
}

#[derive(Debug, Serialize)]
pub struct RenderTextResponse {
    /// Base64-encoded PNG.
    pub image: String,
    pub width: u32,
    pub height: u32,
}

/// POST /api/v1/render/text
pub async fn render_text(
    State(state): State<AppState>,
    Json(payload): Json<RenderTextPayload>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let color = parse_hex_color(&payload.color)?;
    let background = parse_hex_color(&payload.background)?;

    let font_bytes = std::fs::read(&state.config.font_path).map_err(|e| {
        AppError::InternalError(format!(
            "Cannot read font at {}: {e}",
            state.config.font_path.display()
        ))
    })?;
    let font = ab_glyph::FontRef::try_from_slice(&font_bytes)
        .map_err(|e| AppError::InternalError(format!("Invalid font file: {e}")))?;

    let mut canvas = RgbaImage::from_pixel(payload.width, payload.height, background);
    let scale = ab_glyph::PxScale::from(payload.font_size);

    // Center the text on the canvas; clamp to the top-left when it is
    // larger than the canvas.
    let (text_width, text_height) = text_size(scale, &font, &payload.text);
    let x = (payload.width.saturating_sub(text_width) / 2) as i32;
    let y = (payload.height.saturating_sub(text_height) / 2) as i32;
    draw_text_mut(&mut canvas, color, x, y, scale, &font, &payload.text);

    let mut png = Vec::new();
    canvas
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| AppError::InternalError(format!("PNG encoding failed: {e}")))?;

    Ok(Json(DataResponse {
        data: RenderTextResponse {
            image: BASE64.encode(&png),
            width: payload.width,
            height: payload.height,
        },
    }))
}

/// Parse `#rrggbb` / `#rrggbbaa` into a pixel.
fn parse_hex_color(value: &str) -> Result<Rgba<u8>, AppError> {
    let hex = value.trim_start_matches('#');
    let invalid = || AppError::BadRequest(format!("Invalid color '{value}', expected #rrggbb or #rrggbbaa"));

    if !hex.is_ascii() {
        return Err(invalid());
    }
    let bytes = match hex.len() {
        6 | 8 => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    let alpha = bytes.get(3).copied().unwrap_or(0xff);
    Ok(Rgba([bytes[0], bytes[1], bytes[2], alpha]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_digit_colors_are_opaque() {
        assert_eq!(parse_hex_color("#ff8000").unwrap(), Rgba([255, 128, 0, 255]));
    }

    #[test]
    fn eight_digit_colors_carry_alpha() {
        assert_eq!(parse_hex_color("00000080").unwrap(), Rgba([0, 0, 0, 128]));
    }

    #[test]
    fn malformed_colors_are_rejected() {
        assert!(parse_hex_color("#abc").is_err());
        assert!(parse_hex_color("#zzzzzz").is_err());
        assert!(parse_hex_color("").is_err());
    }
}
