use anyhow::{Context, Result};
use ringbuf::traits::Producer as ProducerTrait;
use ringbuf::HeapProd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::vision::Frame;

/// File extensions picked up from a frame directory
const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// List the still images of a directory in name order
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read frame directory {:?}", dir))?;

    let mut frames = Vec::new();
    for entry in entries {
        let path = entry.context("Failed to read directory entry")?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame && path.is_file() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Load one frame from disk
pub fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("Failed to decode frame {:?}", path))?;
    Ok(Frame::from_dynamic(image))
}

/// Calculate ring buffer capacity (in frames) for a given frame rate
pub fn calculate_ring_buffer_capacity(fps: f64) -> usize {
    const BUFFER_DURATION_SECONDS: f64 = 2.0;
    ((fps * BUFFER_DURATION_SECONDS).ceil() as usize).max(2)
}

/// Paced replay of a frame directory into a ring buffer
pub struct FrameCapture {
    frames: Vec<PathBuf>,
    fps: f64,
    repeat: bool,
    producer: Option<HeapProd<Frame>>,
    handle: Option<JoinHandle<()>>,
    overflow_counter: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
}

impl FrameCapture {
    /// Prepare a replay of `dir` at `fps` frames per second
    pub fn new(dir: &Path, fps: f64, repeat: bool, producer: HeapProd<Frame>) -> Result<Self> {
        if fps.is_nan() || fps <= 0.0 {
            anyhow::bail!("Frame rate must be positive, got {}", fps);
        }
        let frames = list_frames(dir)?;
        if frames.is_empty() {
            anyhow::bail!("No frames (png/jpg) found in {:?}", dir);
        }

        info!(
            "Frame source: {} frames from {:?} at {:.1} fps{}",
            frames.len(),
            dir,
            fps,
            if repeat { " (looping)" } else { "" }
        );

        Ok(Self {
            frames,
            fps,
            repeat,
            producer: Some(producer),
            handle: None,
            overflow_counter: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            is_running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the replay thread; `done` is raised after the last frame
    pub fn start(&mut self, done: Arc<AtomicBool>) -> Result<()> {
        let mut producer = self
            .producer
            .take()
            .context("Frame capture already started")?;

        let frames = self.frames.clone();
        let period = Duration::from_secs_f64(1.0 / self.fps);
        let repeat = self.repeat;
        let overflow = self.overflow_counter.clone();
        let delivered = self.delivered.clone();
        let running = self.is_running.clone();

        self.is_running.store(true, Ordering::SeqCst);
        let handle = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                Self::replay(&frames, period, repeat, &mut producer, &overflow, &delivered, &running);
                running.store(false, Ordering::SeqCst);
                done.store(true, Ordering::SeqCst);
            })
            .context("Failed to spawn capture thread")?;
        self.handle = Some(handle);

        info!("Frame capture started");
        Ok(())
    }

    fn replay(
        frames: &[PathBuf],
        period: Duration,
        repeat: bool,
        producer: &mut HeapProd<Frame>,
        overflow_counter: &AtomicU64,
        delivered: &AtomicU64,
        running: &AtomicBool,
    ) {
        let started = Instant::now();
        let mut tick = 0u32;

        'outer: loop {
            for path in frames {
                if !running.load(Ordering::Relaxed) {
                    break 'outer;
                }

                let deadline = started + period * tick;
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
                tick = tick.saturating_add(1);

                let frame = match load_frame(path) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("{:#}", e);
                        continue;
                    }
                };

                if producer.try_push(frame).is_err() {
                    overflow_counter.fetch_add(1, Ordering::Relaxed);
                    debug!("Frame ring full, dropped {:?}", path);
                } else {
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
            }

            if !repeat {
                break;
            }
        }
        debug!("Replay finished after {} frames", tick);
    }

    /// Stop the replay and wait for the thread
    pub fn stop(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
                anyhow::bail!("Capture thread panicked");
            }
        }
        info!("Frame capture stopped");
        Ok(())
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Number of frames in the source directory
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frames pushed into the ring so far
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because the ring was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow_counter.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use ringbuf::traits::{Consumer, Split};
    use ringbuf::HeapRb;

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            let img = RgbImage::from_pixel(4, 4, Rgb([i as u8, 100, 50]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();
    }

    #[test]
    fn test_calculate_ring_buffer_capacity() {
        assert_eq!(calculate_ring_buffer_capacity(30.0), 60);
        assert_eq!(calculate_ring_buffer_capacity(25.0), 50);
        assert_eq!(calculate_ring_buffer_capacity(0.5), 2);
    }

    #[test]
    fn test_list_frames_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let frames = list_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].ends_with("frame_000.png"));
        assert!(frames[2].ends_with("frame_002.png"));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, _consumer) = HeapRb::<Frame>::new(4).split();
        assert!(FrameCapture::new(dir.path(), 30.0, false, producer).is_err());
    }

    #[test]
    fn test_replay_delivers_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let (producer, mut consumer) = HeapRb::<Frame>::new(8).split();

        let mut capture = FrameCapture::new(dir.path(), 200.0, false, producer).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        capture.start(done.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.stop().unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(capture.delivered_count(), 3);
        assert_eq!(capture.overflow_count(), 0);

        let reds: Vec<u8> = std::iter::from_fn(|| consumer.try_pop())
            .map(|f| match f {
                Frame::Rgb(img) => img.get_pixel(0, 0).0[0],
                Frame::Luma(_) => panic!("expected colour frame"),
            })
            .collect();
        assert_eq!(reds, vec![0, 1, 2]);
    }

    #[test]
    fn test_full_ring_counts_overflow() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 4);
        let (producer, _consumer) = HeapRb::<Frame>::new(2).split();

        let mut capture = FrameCapture::new(dir.path(), 500.0, false, producer).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        capture.start(done.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.stop().unwrap();

        assert_eq!(capture.delivered_count(), 2);
        assert_eq!(capture.overflow_count(), 2);
    }
}
