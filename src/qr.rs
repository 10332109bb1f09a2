//! `qr_data_uri` rendering for `GET /payments/qr/{id}`. Spec §1 lists "QR
//! image rendering" among the concerns treated as an external
//! collaborator - this is that collaborator, kept to a single function so
//! the payment/HTTP layers never depend on the rendering crates directly.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageOutputFormat, Luma};
use qrcode::QrCode;

/// Renders `payload` as a PNG QR code and returns a `data:image/png;base64,...` URI.
pub fn data_uri(payload: &str) -> Result<String, String> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| e.to_string())?;
    let image = code.render::<Luma<u8>>().build();

    let mut png_bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_bytes), ImageOutputFormat::Png)
        .map_err(|e| e.to_string())?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_a_valid_data_uri_prefix() {
        let uri = data_uri("tronlink://pay?address=TAddr&amount=10&token=USDT").unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
