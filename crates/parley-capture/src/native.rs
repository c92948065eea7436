//! Default input device capture through cpal.
//!
//! cpal streams are not `Send`, so each recording lives on its own thread. The
//! callback accumulates samples and emits a PCM chunk every chunk interval;
//! releasing the tracks drops the stream and flushes the tail. A stream error
//! after opening is kept and reported when the recording stops.

use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio::sync::{mpsc, oneshot};

use parley_core::types::AudioEncoding;

use crate::device::{DeviceTracks, Microphone, RecordingStream};
use crate::error::CaptureError;
use crate::wav::f32_to_pcm16;

/// Microphone backed by the host's default input device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

type Fault = Arc<Mutex<Option<CaptureError>>>;

struct CpalTracks {
    stop: Option<std_mpsc::Sender<()>>,
    fault: Fault,
}

impl DeviceTracks for CpalTracks {
    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    fn failure(&self) -> Option<CaptureError> {
        match self.fault.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

type Opened = Result<(u32, u16), CaptureError>;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self, chunk_interval: Duration) -> Result<RecordingStream, CaptureError> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Opened>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let fault: Fault = Arc::new(Mutex::new(None));
        let thread_fault = Arc::clone(&fault);

        std::thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || {
                record_until_stopped(chunk_tx, ready_tx, stop_rx, thread_fault, chunk_interval)
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))??;
        tracing::info!(sample_rate, channels, "Input device opened");

        Ok(RecordingStream {
            chunks: chunk_rx,
            encoding: AudioEncoding::Pcm16 {
                sample_rate,
                channels,
            },
            tracks: Box::new(CpalTracks {
                stop: Some(stop_tx),
                fault,
            }),
        })
    }
}

fn record_until_stopped(
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    ready_tx: oneshot::Sender<Opened>,
    stop_rx: std_mpsc::Receiver<()>,
    fault: Fault,
    chunk_interval: Duration,
) {
    let pending = Arc::new(Mutex::new(Vec::<f32>::new()));

    let stream = match build_stream(&chunk_tx, &pending, &fault, chunk_interval) {
        Ok((stream, rate, channels)) => {
            let _ = ready_tx.send(Ok((rate, channels)));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Blocks until released or the controller is gone.
    let _ = stop_rx.recv();
    drop(stream);

    let tail = match pending.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    if !tail.is_empty() {
        let _ = chunk_tx.send(f32_to_pcm16(&tail));
    }
    tracing::debug!("Input device released");
}

fn build_stream(
    chunk_tx: &mpsc::UnboundedSender<Vec<u8>>,
    pending: &Arc<Mutex<Vec<f32>>>,
    fault: &Fault,
    chunk_interval: Duration,
) -> Result<(cpal::Stream, u32, u16), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))?;
    let supported = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(e.to_string())
        }
        other => CaptureError::PermissionDenied(other.to_string()),
    })?;

    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let rate = config.sample_rate.0;
    let channels = config.channels;
    let samples_per_chunk =
        ((rate as u64 * channels as u64 * chunk_interval.as_millis() as u64) / 1000).max(1) as usize;

    let stream = match format {
        cpal::SampleFormat::F32 => {
            input_stream::<f32>(&device, &config, chunk_tx, pending, fault, samples_per_chunk)?
        }
        cpal::SampleFormat::I16 => {
            input_stream::<i16>(&device, &config, chunk_tx, pending, fault, samples_per_chunk)?
        }
        cpal::SampleFormat::U16 => {
            input_stream::<u16>(&device, &config, chunk_tx, pending, fault, samples_per_chunk)?
        }
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    Ok((stream, rate, channels))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunk_tx: &mpsc::UnboundedSender<Vec<u8>>,
    pending: &Arc<Mutex<Vec<f32>>>,
    fault: &Fault,
    samples_per_chunk: usize,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let tx = chunk_tx.clone();
    let buffer = Arc::clone(pending);
    let fault = Arc::clone(fault);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let Ok(mut buf) = buffer.lock() else { return };
                buf.extend(data.iter().map(|&s| f32::from_sample(s)));
                if buf.len() >= samples_per_chunk {
                    let chunk = f32_to_pcm16(&buf);
                    buf.clear();
                    let _ = tx.send(chunk);
                }
            },
            move |e| {
                tracing::warn!(error = %e, "Input stream error");
                let lost = match e {
                    cpal::StreamError::DeviceNotAvailable => {
                        CaptureError::DeviceUnavailable(e.to_string())
                    }
                    other => CaptureError::Device(other.to_string()),
                };
                let mut slot = match fault.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                slot.get_or_insert(lost);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable(e.to_string())
            }
            cpal::BuildStreamError::BackendSpecific { .. } => {
                CaptureError::PermissionDenied(e.to_string())
            }
            other => CaptureError::Device(other.to_string()),
        })
}
