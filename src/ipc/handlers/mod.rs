pub mod daemon;
pub mod gate;
pub mod settings;
pub mod shots;
pub mod tabs;
