pub mod events;
pub mod recording;
pub mod text;
