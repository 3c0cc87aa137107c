mod theme;

pub use theme::Theme;
