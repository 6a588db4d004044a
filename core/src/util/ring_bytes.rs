use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bounded byte buffer that keeps the most recent `cap` bytes.
#[derive(Clone)]
pub struct RingBytes {
    inner: Arc<Mutex<Inner>>,
    cap: usize,
}

struct Inner {
    buf: VecDeque<u8>,
    dropped: u64,
}

impl RingBytes {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner {
                buf: VecDeque::with_capacity(cap.min(64 * 1024)),
                dropped: 0,
            })),
            cap,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, data: &[u8]) {
        let mut g = self.lock();
        let data = if data.len() > self.cap {
            g.dropped += (data.len() - self.cap) as u64;
            &data[data.len() - self.cap..]
        } else {
            data
        };
        let overflow = g.buf.len().saturating_add(data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            g.buf.drain(..overflow);
            g.dropped += overflow as u64;
        }
        g.buf.extend(data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let g = self.lock();
        let mut vec = Vec::with_capacity(g.buf.len());
        vec.extend(g.buf.iter().copied());
        vec
    }

    /// Retained bytes decoded lossily as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes discarded from the front so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
