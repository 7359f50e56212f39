pub mod acoustics;
pub mod asr;
pub mod config;
pub mod decode;
pub mod fluency;
pub mod pauses;
pub mod pipeline;
pub mod scoring;
pub mod service;
pub mod store;
pub mod util;
