mod controller;
mod selection;
#[cfg(test)]
mod tests;

pub use controller::PlaybackController;
pub use selection::Selection;
