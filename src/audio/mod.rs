//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod dsp;
pub mod render;

pub use buffer::{sample_ring, RingConsumer, RingProducer};
pub use capture::{CaptureStream, CapturedBlock};
pub use device::{list_devices, DeviceInfo};
pub use dsp::DspChain;
pub use render::RenderStream;
