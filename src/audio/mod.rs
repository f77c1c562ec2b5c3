pub mod source;

pub use source::{BufferAudioProvider, FileAudioProvider};
