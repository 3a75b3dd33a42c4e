pub mod hub;
pub mod mjpeg;
