//! Microphone capture using cpal
//!
//! `cpal::Stream` is not `Send`, so the stream lives entirely on a
//! dedicated thread: built there, played there, and dropped there when the
//! stop signal arrives. Captured data is converted to interleaved 16-bit
//! PCM before it enters the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::capture::sample::{AudioBlock, AudioFormat, MediaSample};
use crate::capture::traits::{AudioDeviceInfo, MicrophoneDevice, SampleSink};
use crate::utils::error::{CaptureError, CaptureResult};

pub struct CpalMicrophone {
    info: AudioDeviceInfo,
    epoch: Instant,
    streaming: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn open(epoch: Instant) -> CaptureResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("no default input device".to_string()))?;
        let name = device
            .name()
            .unwrap_or_else(|_| "unknown input".to_string());

        Ok(Self {
            info: AudioDeviceInfo {
                id: name.clone(),
                name,
                is_default: true,
            },
            epoch,
            streaming: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        })
    }
}

fn emit_block(sink: &SampleSink, samples: &[i16], format: AudioFormat, epoch: Instant) {
    if samples.is_empty() || format.channels == 0 {
        return;
    }
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    let block = AudioBlock {
        format,
        data: Bytes::from(data),
        frames: (samples.len() / usize::from(format.channels)) as u32,
    };
    sink(MediaSample::audio(epoch.elapsed(), block));
}

impl MicrophoneDevice for CpalMicrophone {
    fn info(&self) -> AudioDeviceInfo {
        self.info.clone()
    }

    fn start_stream(&mut self, sink: SampleSink) -> CaptureResult<()> {
        if self.is_streaming() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        self.streaming.store(true, Ordering::SeqCst);

        let streaming = self.streaming.clone();
        let epoch = self.epoch;

        let worker = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                tracing::error!("default input device disappeared");
                streaming.store(false, Ordering::SeqCst);
                return;
            };
            let supported = match device.default_input_config() {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(%err, "no usable input config");
                    streaming.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let format = AudioFormat {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let sample_format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();

            let stream = match sample_format {
                cpal::SampleFormat::I16 => {
                    let sink = sink.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            emit_block(&sink, data, format, epoch);
                        },
                        |err| tracing::warn!(%err, "input stream error"),
                        None,
                    )
                }
                cpal::SampleFormat::F32 => {
                    let sink = sink.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let converted: Vec<i16> = data
                                .iter()
                                .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
                                .collect();
                            emit_block(&sink, &converted, format, epoch);
                        },
                        |err| tracing::warn!(%err, "input stream error"),
                        None,
                    )
                }
                other => {
                    tracing::error!(?other, "unsupported input sample format");
                    streaming.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(%err, "failed to build input stream");
                    streaming.store(false, Ordering::SeqCst);
                    return;
                }
            };
            if let Err(err) = stream.play() {
                tracing::error!(%err, "failed to start input stream");
                streaming.store(false, Ordering::SeqCst);
                return;
            }
            tracing::info!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                "microphone stream opened"
            );

            // Park until stop; the stream is dropped on this thread.
            let _ = stop_rx.recv();
        });

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
