use embedded_graphics::pixelcolor::{Rgb565, RgbColor};

pub const BLACK: Rgb565 = Rgb565::BLACK;
pub const WHITE: Rgb565 = Rgb565::WHITE;
pub const CYAN: Rgb565 = Rgb565::CYAN;
pub const GREEN: Rgb565 = Rgb565::GREEN;
pub const YELLOW: Rgb565 = Rgb565::YELLOW;
pub const ORANGE: Rgb565 = Rgb565::new(31, 45, 0);
pub const RED: Rgb565 = Rgb565::RED;
