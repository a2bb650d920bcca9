//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod monitor;
pub mod playback;

pub use backend::{AudioBackend, CaptureStream, CpalBackend, DeviceEnumerator, PlaybackSink};
pub use buffer::{create_capture_queue, AudioFrame, CaptureQueue, PushOutcome, SharedCaptureQueue};
pub use capture::AudioCapture;
pub use device::{list_devices, AudioDeviceInfo};
pub use monitor::{DeviceChangeListener, DeviceMonitor, DeviceSnapshot};
pub use playback::AudioPlayback;
