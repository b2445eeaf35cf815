// ============================================================================
// GENERATION: background calls to an image-generation backend
// ============================================================================
//
// Requests run on the rayon pool and report back over an mpsc channel.  Each
// request carries the epoch it was issued under; results from an older epoch
// (superseded request, disposed editor) are dropped on receipt.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;

use image::RgbaImage;

/// Black-box image generator.  Implementations may block; they are only
/// ever called off the UI thread.
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, prompt: &str, references: &[RgbaImage], count: usize) -> Result<Vec<RgbaImage>, GenerateError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerateError {
    /// Blank prompt and nothing to use as a reference.
    EmptyRequest,
    Backend(String),
    /// The backend succeeded but returned no image.
    NoResult,
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::EmptyRequest => write!(f, "Enter a prompt or select a reference layer"),
            GenerateError::Backend(msg) => write!(f, "Generation failed: {}", msg),
            GenerateError::NoResult => write!(f, "Generation returned no image"),
        }
    }
}

impl std::error::Error for GenerateError {}

struct GenerationResult {
    epoch: u64,
    outcome: Result<RgbaImage, GenerateError>,
}

/// At most one live request; newer requests supersede older ones.
pub struct GenerationQueue {
    epoch: u64,
    pending: bool,
    sender: mpsc::Sender<GenerationResult>,
    receiver: mpsc::Receiver<GenerationResult>,
}

impl Default for GenerationQueue {
    fn default() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            epoch: 0,
            pending: false,
            sender,
            receiver,
        }
    }
}

impl GenerationQueue {
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Validate and dispatch a single-image request.
    pub fn submit(
        &mut self,
        backend: Arc<dyn ImageGenerator>,
        prompt: String,
        references: Vec<RgbaImage>,
    ) -> Result<(), GenerateError> {
        if prompt.trim().is_empty() && references.is_empty() {
            return Err(GenerateError::EmptyRequest);
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.pending = true;
        let epoch = self.epoch;
        let sender = self.sender.clone();

        rayon::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.generate(&prompt, &references, 1)))
                .unwrap_or_else(|payload| Err(GenerateError::Backend(panic_message(payload.as_ref()))))
                .and_then(|images| images.into_iter().next().ok_or(GenerateError::NoResult));
            // Receiver gone means the editor was dropped; nothing to report to.
            let _ = sender.send(GenerationResult { epoch, outcome });
        });
        Ok(())
    }

    /// Non-blocking: the outcome of the current request, if it has landed.
    pub fn poll(&mut self) -> Option<Result<RgbaImage, GenerateError>> {
        while let Ok(result) = self.receiver.try_recv() {
            if result.epoch != self.epoch || !self.pending {
                log_info!("Dropping stale generation result (epoch {})", result.epoch);
                continue;
            }
            self.pending = false;
            return Some(result.outcome);
        }
        None
    }

    /// Forget any in-flight request; its result will be ignored.
    pub fn invalidate(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.pending = false;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("backend panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    struct Solid;

    impl ImageGenerator for Solid {
        fn generate(&self, _prompt: &str, refs: &[RgbaImage], count: usize) -> Result<Vec<RgbaImage>, GenerateError> {
            assert_eq!(count, 1);
            Ok(vec![RgbaImage::new(8 + refs.len() as u32, 8)])
        }
    }

    fn wait(queue: &mut GenerationQueue) -> Option<Result<RgbaImage, GenerateError>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(r) = queue.poll() {
                return Some(r);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn blank_prompt_without_references_is_rejected() {
        let mut q = GenerationQueue::default();
        assert_eq!(q.submit(Arc::new(Solid), "   ".into(), vec![]), Err(GenerateError::EmptyRequest));
        assert!(!q.is_pending());
    }

    #[test]
    fn result_arrives_through_poll() {
        let mut q = GenerationQueue::default();
        q.submit(Arc::new(Solid), String::new(), vec![RgbaImage::new(1, 1)]).unwrap();
        assert!(q.is_pending());
        let img = wait(&mut q).unwrap().unwrap();
        assert_eq!(img.width(), 9);
        assert!(!q.is_pending());
    }

    struct Panicky;

    impl ImageGenerator for Panicky {
        fn generate(&self, _prompt: &str, _refs: &[RgbaImage], _count: usize) -> Result<Vec<RgbaImage>, GenerateError> {
            panic!("model crashed");
        }
    }

    #[test]
    fn backend_panic_becomes_an_error() {
        let mut q = GenerationQueue::default();
        q.submit(Arc::new(Panicky), "rose".into(), vec![]).unwrap();
        match wait(&mut q) {
            Some(Err(GenerateError::Backend(msg))) => assert!(msg.contains("model crashed")),
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.map(|i| i.dimensions()))),
        }
        assert!(!q.is_pending());

        // The queue keeps working afterwards.
        q.submit(Arc::new(Solid), "rose".into(), vec![]).unwrap();
        assert_eq!(wait(&mut q).unwrap().unwrap().width(), 8);
    }

    #[test]
    fn invalidated_results_are_dropped() {
        let mut q = GenerationQueue::default();
        q.submit(Arc::new(Solid), "rose".into(), vec![]).unwrap();
        q.invalidate();
        std::thread::sleep(Duration::from_millis(200));
        assert!(q.poll().is_none());
    }
}
