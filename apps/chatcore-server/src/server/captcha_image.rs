use image::{ImageBuffer, Rgb, RgbImage};

const CAPTCHA_WIDTH: u32 = 160;
const CAPTCHA_HEIGHT: u32 = 60;

/// Narrow contract standing in for a hardened CAPTCHA image renderer
/// (SPEC_FULL.md §10.4).
pub(crate) trait CaptchaRenderer: Send + Sync {
    fn render(&self, text: &str) -> Vec<u8>;
}

/// Deterministic renderer: colored blocks per character plus pixel noise
/// seeded from the text, good enough to exercise the C10 state machine
/// without a font-rendering dependency.
pub(crate) struct BlockCaptchaRenderer;

impl CaptchaRenderer for BlockCaptchaRenderer {
    fn render(&self, text: &str) -> Vec<u8> {
        let mut image: RgbImage = ImageBuffer::new(CAPTCHA_WIDTH, CAPTCHA_HEIGHT);
        let seed = text.bytes().fold(0_u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        let mut rng_state = seed.max(1);
        let mut next_rand = move || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 17;
            rng_state ^= rng_state << 5;
            rng_state
        };

        let slot_width = CAPTCHA_WIDTH / text.len().max(1) as u32;
        for (index, ch) in text.bytes().enumerate() {
            let color = Rgb([ch.wrapping_mul(37), ch.wrapping_mul(59), ch.wrapping_mul(83)]);
            let x0 = index as u32 * slot_width;
            for x in x0..(x0 + slot_width).min(CAPTCHA_WIDTH) {
                for y in 0..CAPTCHA_HEIGHT {
                    image.put_pixel(x, y, color);
                }
            }
        }
        for _ in 0..(CAPTCHA_WIDTH * CAPTCHA_HEIGHT / 20) {
            let x = next_rand() % CAPTCHA_WIDTH;
            let y = next_rand() % CAPTCHA_HEIGHT;
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }

        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        image
            .write_to(&mut cursor, image::ImageFormat::Png)
            .expect("in-memory PNG encode never fails");
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockCaptchaRenderer, CaptchaRenderer};

    #[test]
    fn renders_non_empty_png_bytes() {
        let renderer = BlockCaptchaRenderer;
        let png = renderer.render("AB12CD");
        assert!(!png.is_empty());
        assert_eq!(&png[0..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn same_text_renders_deterministically() {
        let renderer = BlockCaptchaRenderer;
        assert_eq!(renderer.render("AB12CD"), renderer.render("AB12CD"));
    }
}
