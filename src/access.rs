//! Access-pattern classifier
//!
//! Keeps a ring of the last [`RING_CAP`] read locations and, each time the
//! ring wraps, estimates whether current traffic is sequential or random.
//! Random traffic raises the cache-forget hint on read replies so the
//! transport drops page-cache pages after sending.
//!
//! The estimate sorts the samples by `(fd, offset)` and computes a weighted
//! mean offset: the multiplier starts at 1 and grows by one at every fd
//! boundary, so offsets from later files weigh more. The mean-squared
//! deviation of the raw offsets is then compared against a quarter of total
//! RAM, squared (`vm_total_sq / 16`). The fd-weighted mean is load-bearing:
//! an unweighted mean over several segment files would classify sequential
//! multi-segment scans as random. Do not "fix" it.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Capacity of the read-sample ring
pub const RING_CAP: usize = 100;

/// One read location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReadSample {
    fd: RawFd,
    offset: u64,
}

struct Ring {
    samples: [ReadSample; RING_CAP],
    write_idx: usize,
}

/// Sequential-vs-random read classifier
pub struct AccessTracker {
    /// `(total system memory in MiB)^2 * 1 MiB`; constant post-init
    vm_total_sq: i64,

    /// Sample ring; no I/O is ever performed under this lock
    ring: Mutex<Ring>,

    /// Last classification; read lock-free on the reply path
    random_access: AtomicBool,
}

impl AccessTracker {
    /// Create a tracker with a precomputed memory-squared threshold base
    pub fn new(vm_total_sq: i64) -> Self {
        Self {
            vm_total_sq,
            ring: Mutex::new(Ring {
                samples: [ReadSample::default(); RING_CAP],
                write_idx: 0,
            }),
            random_access: AtomicBool::new(false),
        }
    }

    /// Whether the last classification saw random traffic
    pub fn is_random(&self) -> bool {
        self.random_access.load(Ordering::Relaxed)
    }

    /// Record one read location; classifies and resets when the ring wraps
    pub fn record(&self, fd: RawFd, offset: u64) {
        let mut ring = self.ring.lock();

        let idx = ring.write_idx;
        ring.samples[idx] = ReadSample { fd, offset };
        ring.write_idx += 1;

        if ring.write_idx == RING_CAP {
            self.classify(&mut ring.samples);
            ring.write_idx = 0;
        }
    }

    fn classify(&self, samples: &mut [ReadSample; RING_CAP]) {
        samples.sort_by(|a, b| a.fd.cmp(&b.fd).then(a.offset.cmp(&b.offset)));

        // Weighted mean: the multiplier steps up at each fd boundary
        let mut mult: i64 = 1;
        let mut sum: i64 = samples[0].offset as i64;
        for i in 1..RING_CAP {
            if samples[i].fd != samples[i - 1].fd {
                mult += 1;
            }
            sum += samples[i].offset as i64 * mult;
        }
        let mean = sum / RING_CAP as i64;

        // Mean squared deviation of the raw offsets
        let mut mse: i128 = 0;
        for sample in samples.iter() {
            let diff = sample.offset as i64 - mean;
            mse += diff as i128 * diff as i128;
        }
        mse /= RING_CAP as i128;

        let random = mse > self.vm_total_sq as i128 / 16;
        let old = self.random_access.swap(random, Ordering::Relaxed);
        if old != random {
            tracing::info!(
                random,
                mse = mse as u64,
                vm_total_sq = self.vm_total_sq,
                "read access pattern switched"
            );
        }
    }
}
