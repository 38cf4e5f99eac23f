use embedded_graphics::{
    mono_font::MonoTextStyle,
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{PrimitiveStyleBuilder, Rectangle, RoundedRectangle},
    text::Text,
};

use super::{
    palette::BLACK,
    styles::{BUTTON_FONT, CENTERED},
};

/// Touch targets shared by every screen. Which ones respond depends on what the last
/// body or value draw showed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Battery,
    Co2Value,
    MidLeft,
    MidRight,
    Toggle,
    Action,
    Wide,
}

impl Control {
    /// Hit-test order. The small value buttons win over the large CO2 area they overlap.
    pub const ALL: [Control; 7] = [
        Control::Battery,
        Control::MidLeft,
        Control::MidRight,
        Control::Co2Value,
        Control::Toggle,
        Control::Action,
        Control::Wide,
    ];

    pub fn rect(self) -> Rectangle {
        let (x, y, w, h) = match self {
            Self::Battery => (240, 0, 80, 40),
            Self::Co2Value => (0, 26, 320, 88),
            Self::MidLeft => (-2, 104, 163, 40),
            Self::MidRight => (161, 104, 164, 40),
            Self::Toggle => (15, 175, 130, 50),
            Self::Action => (175, 175, 130, 50),
            Self::Wide => (15, 175, 290, 50),
        };
        Rectangle::new(Point::new(x, y), Size::new(w, h))
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }

    fn rounded(self) -> bool {
        !matches!(self, Self::MidLeft | Self::MidRight)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSet(u8);

impl ControlSet {
    pub fn show(&mut self, control: Control) {
        self.0 |= control.bit();
    }

    pub fn hide_all(&mut self) {
        self.0 = 0;
    }

    pub fn is_visible(&self, control: Control) -> bool {
        self.0 & control.bit() != 0
    }

    pub fn hit(&self, point: Point) -> Option<Control> {
        Control::ALL
            .into_iter()
            .find(|control| self.is_visible(*control) && control.rect().contains(point))
    }
}

/// Outlined button: black fill, `color` for the border and the label.
pub fn draw_button<D>(target: &mut D, control: Control, label: &str, color: Rgb565) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let rect = control.rect();
    let style = PrimitiveStyleBuilder::new()
        .fill_color(BLACK)
        .stroke_color(color)
        .stroke_width(1)
        .build();
    let radius = if control.rounded() { 10 } else { 0 };

    RoundedRectangle::with_equal_corners(rect, Size::new(radius, radius))
        .into_styled(style)
        .draw(target)?;
    Text::with_text_style(label, rect.center(), MonoTextStyle::new(BUTTON_FONT, color), CENTERED)
        .draw(target)?;
    Ok(())
}
