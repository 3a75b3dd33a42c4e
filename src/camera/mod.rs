pub mod capture;
pub mod controller;
pub mod discovery;
pub mod ffmpeg_backend;
pub mod image_reader;
pub mod jpeg;
pub mod request;
pub mod traits;
pub mod types;
pub mod zoom;

#[cfg(test)]
pub mod testing;
