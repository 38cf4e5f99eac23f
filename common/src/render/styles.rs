use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_9X15},
        MonoFont,
    },
    text::{Alignment, Baseline, TextStyle, TextStyleBuilder},
};
use profont::{PROFONT_18_POINT, PROFONT_24_POINT};

/// Coordinates name the top-left corner of the text, as on the panel's sprite API.
pub const TOP_LEFT: TextStyle = TextStyleBuilder::new()
    .alignment(Alignment::Left)
    .baseline(Baseline::Top)
    .build();

pub const TOP_CENTER: TextStyle = TextStyleBuilder::new()
    .alignment(Alignment::Center)
    .baseline(Baseline::Top)
    .build();

pub const TOP_RIGHT: TextStyle = TextStyleBuilder::new()
    .alignment(Alignment::Right)
    .baseline(Baseline::Top)
    .build();

pub const CENTERED: TextStyle = TextStyleBuilder::new()
    .alignment(Alignment::Center)
    .baseline(Baseline::Middle)
    .build();

pub const SMALL_FONT: &MonoFont = &FONT_6X10;
pub const TEXT_FONT: &MonoFont = &FONT_9X15;
pub const BUTTON_FONT: &MonoFont = &FONT_10X20;
pub const TITLE_FONT: &MonoFont = &PROFONT_24_POINT;
pub const VALUE_FONT: &MonoFont = &PROFONT_24_POINT;
pub const EDITOR_FONT: &MonoFont = &PROFONT_18_POINT;
