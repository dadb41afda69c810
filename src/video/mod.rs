pub mod capture;
pub mod processor;

pub use capture::{calculate_ring_buffer_capacity, list_frames, load_frame, FrameCapture};
pub use processor::{run_processor, ProcessorConfig, ProcessorMessage};
