//! Parley capture crate - microphone lifecycle, chunk buffering, streamed upload.
//!
//! The `CaptureController` owns the single microphone handle and walks it through
//! `Idle -> Starting -> Recording -> Stopping -> Idle`. Devices sit behind the
//! `Microphone` trait; a mock and a file-backed implementation are always
//! available, the cpal device only with the `native` feature.

pub mod controller;
pub mod device;
pub mod error;
#[cfg(feature = "native")]
pub mod native;
pub mod stream;
pub mod wav;

pub use controller::{CaptureController, CaptureHandle, CaptureState, StopOutcome};
pub use device::{DeviceTracks, FileMicrophone, Microphone, MockMicrophone, RecordingStream};
pub use error::CaptureError;
#[cfg(feature = "native")]
pub use native::CpalMicrophone;
pub use stream::{RecordingTransport, StreamTransport, WebSocketTransport};
