pub mod draft;
pub mod generation;
pub mod media;
pub mod mixing;
pub mod pipeline;
pub mod roster;
pub mod synthesis;
