//! Placeholder artwork synthesized in memory, no I/O involved.

use image::{Rgba, RgbaImage};

/// Card placeholders keep the 1:1.75 card ratio.
pub(crate) const CARD_WIDTH: u32 = 512;
pub(crate) const CARD_HEIGHT: u32 = 896;

const BORDER_INSET: u32 = 20;
const BORDER_WIDTH: u32 = 4;
const STRIPE_SPACING: u32 = 20;
const STRIPE_WIDTH: u32 = 2;

const FRONT_FIELD: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FRONT_BORDER: Rgba<u8> = Rgba([136, 0, 0, 255]);
const BACK_FIELD: Rgba<u8> = Rgba([0, 0, 136, 255]);
const BACK_STRIPE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// White field with a dark red border inset from the edge.
pub(crate) fn front_bitmap() -> RgbaImage {
    let mut bitmap =
        RgbaImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, FRONT_FIELD);
    for t in 0..BORDER_WIDTH {
        for x in BORDER_INSET..CARD_WIDTH - BORDER_INSET {
            bitmap.put_pixel(x, BORDER_INSET + t, FRONT_BORDER);
            bitmap.put_pixel(x, CARD_HEIGHT - 1 - BORDER_INSET - t, FRONT_BORDER);
        }
        for y in BORDER_INSET..CARD_HEIGHT - BORDER_INSET {
            bitmap.put_pixel(BORDER_INSET + t, y, FRONT_BORDER);
            bitmap.put_pixel(CARD_WIDTH - 1 - BORDER_INSET - t, y, FRONT_BORDER);
        }
    }
    bitmap
}

/// Dark blue field with white pinstripes.
pub(crate) fn back_bitmap() -> RgbaImage {
    let mut bitmap = RgbaImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, BACK_FIELD);
    let mut x = 0;
    while x < CARD_WIDTH {
        for dx in 0..STRIPE_WIDTH.min(CARD_WIDTH - x) {
            for y in 0..CARD_HEIGHT {
                bitmap.put_pixel(x + dx, y, BACK_STRIPE);
            }
        }
        x += STRIPE_SPACING;
    }
    bitmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_keep_card_geometry() {
        let front = front_bitmap();
        assert_eq!((front.width(), front.height()), (CARD_WIDTH, CARD_HEIGHT));

        let back = back_bitmap();
        assert_eq!((back.width(), back.height()), (CARD_WIDTH, CARD_HEIGHT));
    }

    #[test]
    fn placeholders_differ() {
        assert_ne!(front_bitmap().into_raw(), back_bitmap().into_raw());
    }
}
