// Audio output devices
// The hardware output uses cpal with a ring buffer; the null output renders silence on a clock

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::decoder::{PcmBuffer, PAYLOAD_CHANNELS, PAYLOAD_SAMPLE_RATE};
use super::error::{AudioError, AudioResult};

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Somewhere decoded audio can be rendered, one buffer at a time.
pub trait OutputDevice: Send + Sync {
    /// Rate buffers must be converted to before `start`
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Begin rendering `buffer`, replacing anything already rendering.
    /// `finished` is sent once the last sample has been rendered; it is dropped
    /// unsent if rendering is halted first.
    fn start(&self, buffer: PcmBuffer, finished: oneshot::Sender<()>) -> AudioResult<()>;

    /// Stop rendering immediately. No-op when idle.
    fn halt(&self);

    fn is_rendering(&self) -> bool;

    /// Output gain, clamped to 0.0..=1.0
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;
}

struct Feeder {
    cancel: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

struct StreamReady {
    producer: RingProducer,
    consumer: Arc<Mutex<RingConsumer>>,
    sample_rate: u32,
    channels: u16,
}

/// Hardware output on the default device.
///
/// The cpal stream is not `Send`, so it lives on its own thread for the
/// lifetime of this value; samples reach it through the ring buffer.
pub struct CpalOutput {
    producer: Arc<Mutex<RingProducer>>,
    consumer: Arc<Mutex<RingConsumer>>,
    sample_rate: u32,
    channels: u16,
    volume: Arc<Mutex<f32>>,
    rendering: Arc<AtomicBool>,
    feeder: Mutex<Option<Feeder>>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalOutput {
    /// Open the default output device
    pub fn open(volume: f32) -> AudioResult<Self> {
        let volume = Arc::new(Mutex::new(volume.clamp(0.0, 1.0)));
        let volume_clone = volume.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<AudioResult<StreamReady>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let (stream, ready) = match Self::open_stream(volume_clone) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(ready)).is_err() {
                    return;
                }
                // Keep the stream alive until the owner goes away
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Audio output stream closed");
            })
            .map_err(|e| AudioError::Device(format!("Failed to spawn output thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("Output thread exited during setup".to_string()))??;

        info!(
            sample_rate = ready.sample_rate,
            channels = ready.channels,
            "Audio output ready"
        );

        Ok(Self {
            producer: Arc::new(Mutex::new(ready.producer)),
            consumer: ready.consumer,
            sample_rate: ready.sample_rate,
            channels: ready.channels,
            volume,
            rendering: Arc::new(AtomicBool::new(false)),
            feeder: Mutex::new(None),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    fn open_stream(volume: Arc<Mutex<f32>>) -> AudioResult<(Stream, StreamReady)> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("No output device available".to_string()))?;

        let config = device.default_output_config()?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        // ~250ms of audio at the device format
        let rb = HeapRb::<f32>::new((sample_rate as usize * channels as usize / 4).max(1024));
        let (producer, consumer) = rb.split();
        let consumer = Arc::new(Mutex::new(consumer));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), consumer.clone(), volume)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), consumer.clone(), volume)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), consumer.clone(), volume)?
            }
            format => {
                return Err(AudioError::Device(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream.play()?;

        Ok((
            stream,
            StreamReady {
                producer,
                consumer,
                sample_rate,
                channels,
            },
        ))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        consumer: Arc<Mutex<RingConsumer>>,
        volume: Arc<Mutex<f32>>,
    ) -> AudioResult<Stream> {
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut consumer = consumer.lock();
                let vol = *volume.lock();

                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0) * vol;
                    *sample = T::from_sample(value);
                }
            },
            move |err| {
                error!("Audio output error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }

    /// Push as many samples as fit; returns how many were written
    fn write(producer: &Mutex<RingProducer>, samples: &[f32]) -> usize {
        let mut producer = producer.lock();
        let mut written = 0;

        for &sample in samples {
            if producer.try_push(sample).is_ok() {
                written += 1;
            } else {
                break;
            }
        }

        written
    }

    fn feed(
        producer: Arc<Mutex<RingProducer>>,
        samples: Vec<f32>,
        cancel: Arc<AtomicBool>,
        rendering: Arc<AtomicBool>,
        finished: oneshot::Sender<()>,
    ) {
        let mut remaining = &samples[..];

        while !remaining.is_empty() {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            let written = Self::write(&producer, remaining);
            if written > 0 {
                remaining = &remaining[written..];
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }

        // Wait for the device to drain what we queued
        while !producer.lock().is_empty() {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }

        rendering.store(false, Ordering::SeqCst);
        let _ = finished.send(());
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&self, buffer: PcmBuffer, finished: oneshot::Sender<()>) -> AudioResult<()> {
        self.halt();

        if buffer.sample_rate != self.sample_rate || buffer.channels != self.channels {
            return Err(AudioError::Device(format!(
                "Buffer format {}Hz/{}ch does not match device {}Hz/{}ch",
                buffer.sample_rate, buffer.channels, self.sample_rate, self.channels
            )));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let producer = self.producer.clone();
        let rendering = self.rendering.clone();
        let feeder_cancel = cancel.clone();

        self.rendering.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("audio-feeder".to_string())
            .spawn(move || Self::feed(producer, buffer.samples, feeder_cancel, rendering, finished))
            .map_err(|e| {
                self.rendering.store(false, Ordering::SeqCst);
                AudioError::Device(format!("Failed to spawn feeder thread: {}", e))
            })?;

        *self.feeder.lock() = Some(Feeder { cancel, handle });
        Ok(())
    }

    fn halt(&self) {
        let feeder = self.feeder.lock().take();
        if let Some(feeder) = feeder {
            feeder.cancel.store(true, Ordering::SeqCst);
            let _ = feeder.handle.join();
        }

        // Nothing can push any more, so drain what is still queued
        let mut consumer = self.consumer.lock();
        while consumer.try_pop().is_some() {}

        self.rendering.store(false, Ordering::SeqCst);
    }

    fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.halt();
        self.shutdown.lock().take();
    }
}

/// Silent output that takes as long as the audio would.
///
/// Used when no device is present and in tests. `start` must be called from
/// within a tokio runtime.
pub struct NullOutput {
    sample_rate: u32,
    channels: u16,
    volume: Mutex<f32>,
    render: Arc<Mutex<NullRender>>,
    current: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Bumped on every start and halt; a clock task only settles its own start
#[derive(Default)]
struct NullRender {
    generation: u64,
    rendering: bool,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::with_format(PAYLOAD_SAMPLE_RATE, PAYLOAD_CHANNELS)
    }

    pub fn with_format(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            volume: Mutex::new(1.0),
            render: Arc::new(Mutex::new(NullRender::default())),
            current: Mutex::new(None),
        }
    }

    /// End rendering for `generation`. False if a later start or halt took over.
    fn settle(render: &Mutex<NullRender>, generation: u64) -> bool {
        let mut render = render.lock();
        if render.generation != generation {
            return false;
        }
        render.rendering = false;
        true
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for NullOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&self, buffer: PcmBuffer, finished: oneshot::Sender<()>) -> AudioResult<()> {
        self.halt();

        let duration = buffer.duration();
        let generation = {
            let mut render = self.render.lock();
            render.generation += 1;
            render.rendering = true;
            render.generation
        };

        let render = self.render.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if Self::settle(&render, generation) {
                let _ = finished.send(());
            }
        });

        *self.current.lock() = Some(handle);
        Ok(())
    }

    fn halt(&self) {
        {
            let mut render = self.render.lock();
            render.generation += 1;
            render.rendering = false;
        }
        if let Some(handle) = self.current.lock().take() {
            // Dropping the task drops `finished` unsent
            handle.abort();
        }
    }

    fn is_rendering(&self) -> bool {
        self.render.lock().rendering
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}
