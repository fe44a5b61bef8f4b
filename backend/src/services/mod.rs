pub mod access_gate;
pub mod encoder;
pub mod fine_tune;
pub mod pipeline;
pub mod resize;
pub mod sessions;
pub mod upscaler;
