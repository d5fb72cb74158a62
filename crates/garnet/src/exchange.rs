//! Lock-free exchange structures between the emulation thread and the host.
//!
//! All three are strictly single-producer/single-consumer: the emulation
//! thread writes, the host reads (input goes the other way). Publication uses
//! acquire/release atomics only; the hot path never takes a lock.

use std::{
    cell::UnsafeCell,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
};

use bitflags::bitflags;

bitflags! {
    /// Joypad buttons, bit positions matching the libretro joypad ids.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u32 {
        const B = 1 << 0;
        const Y = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const UP = 1 << 4;
        const DOWN = 1 << 5;
        const LEFT = 1 << 6;
        const RIGHT = 1 << 7;
        const A = 1 << 8;
        const X = 1 << 9;
        const L = 1 << 10;
        const R = 1 << 11;
        const L2 = 1 << 12;
        const R2 = 1 << 13;
        const L3 = 1 << 14;
        const R3 = 1 << 15;
    }
}

/// Controller snapshot shared between the host and the emulation thread.
///
/// Last write wins; the emulation thread samples it once per frame boundary.
#[derive(Debug, Clone, Default)]
pub struct InputRegister(Arc<AtomicU32>);

impl InputRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, buttons: Buttons) {
        self.0.store(buttons.bits(), Ordering::Release);
    }

    pub fn get(&self) -> Buttons {
        Buttons::from_bits_truncate(self.0.load(Ordering::Acquire))
    }
}

/// One decoded ABGR8888 frame with its geometry tag.
#[derive(Debug, Default)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

const SLOT_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

/// Triple buffer. The middle slot is owned by whoever swaps it in; the
/// producer and consumer each hold a private slot index, so neither side ever
/// reads a frame the other is writing.
struct VideoShared {
    slots: [UnsafeCell<VideoFrame>; 3],
    mid: AtomicU8,
    // Current output geometry as width << 32 | height, updated before the
    // first frame published at the new size.
    geometry: AtomicU64,
}

// Slot ownership is transferred by the `mid` swap; see above.
unsafe impl Sync for VideoShared {}
unsafe impl Send for VideoShared {}

pub struct VideoProducer {
    shared: Arc<VideoShared>,
    write: u8,
}

pub struct VideoConsumer {
    shared: Arc<VideoShared>,
    read: u8,
}

pub fn video_exchange() -> (VideoProducer, VideoConsumer) {
    let shared = Arc::new(VideoShared {
        slots: [
            UnsafeCell::new(VideoFrame::default()),
            UnsafeCell::new(VideoFrame::default()),
            UnsafeCell::new(VideoFrame::default()),
        ],
        mid: AtomicU8::new(1),
        geometry: AtomicU64::new(0),
    });
    (
        VideoProducer {
            shared: shared.clone(),
            write: 0,
        },
        VideoConsumer { shared, read: 2 },
    )
}

impl VideoProducer {
    /// Copies a completed frame into the private slot, then publishes it with
    /// a single atomic swap. The consumer can never observe a partial frame.
    pub fn publish(&mut self, width: u32, height: u32, pixels: &[u32]) {
        let slot = unsafe { &mut *self.shared.slots[self.write as usize].get() };
        slot.width = width;
        slot.height = height;
        slot.pixels.clear();
        slot.pixels.extend_from_slice(pixels);

        let prev = self.shared.mid.swap(self.write | FRESH, Ordering::AcqRel);
        self.write = prev & SLOT_MASK;
    }

    pub fn set_geometry(&self, width: u32, height: u32) {
        let packed = u64::from(width) << 32 | u64::from(height);
        self.shared.geometry.store(packed, Ordering::Release);
    }
}

impl VideoConsumer {
    /// Swaps in the most recent published frame, if one arrived since the
    /// last poll.
    pub fn poll(&mut self) -> Option<&VideoFrame> {
        if self.shared.mid.load(Ordering::Relaxed) & FRESH == 0 {
            return None;
        }
        let prev = self.shared.mid.swap(self.read, Ordering::AcqRel);
        self.read = prev & SLOT_MASK;
        Some(unsafe { &*self.shared.slots[self.read as usize].get() })
    }

    /// The last frame returned by [`poll`](Self::poll). Stays readable after
    /// the producer stops.
    pub fn latest(&self) -> &VideoFrame {
        unsafe { &*self.shared.slots[self.read as usize].get() }
    }

    /// Current output geometry, surfaced ahead of the first frame published
    /// at the new size.
    pub fn geometry(&self) -> (u32, u32) {
        let packed = self.shared.geometry.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }
}

/// SPSC ring of interleaved stereo samples. Capacity is a power of two;
/// cursors are free-running sample counts that wrap at `usize::MAX`, reduced
/// modulo capacity on access (sound because the capacity divides the cursor
/// range).
struct AudioShared {
    buf: Box<[UnsafeCell<i16>]>,
    write: AtomicUsize,
    read: AtomicUsize,
}

// The producer only writes between `write` and `read + capacity`, the
// consumer only reads between `read` and `write`.
unsafe impl Sync for AudioShared {}
unsafe impl Send for AudioShared {}

pub struct AudioProducer {
    shared: Arc<AudioShared>,
}

pub struct AudioConsumer {
    shared: Arc<AudioShared>,
}

/// Default ring capacity: ~250 ms of 32 kHz stereo.
pub const AUDIO_RING_CAPACITY: usize = 16384;

pub fn audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    assert!(capacity.is_power_of_two());
    let shared = Arc::new(AudioShared {
        buf: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });
    (
        AudioProducer {
            shared: shared.clone(),
        },
        AudioConsumer { shared },
    )
}

impl AudioProducer {
    /// Appends samples, truncating the write to the free space left ahead of
    /// the consumer's cursor. Returns how many samples were accepted.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let cap = self.shared.buf.len();
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);

        let n = samples.len().min(cap - write.wrapping_sub(read));
        for (i, &sample) in samples[..n].iter().enumerate() {
            unsafe { *self.shared.buf[write.wrapping_add(i) & (cap - 1)].get() = sample };
        }
        self.shared.write.store(write.wrapping_add(n), Ordering::Release);

        if n < samples.len() {
            tracing::trace!(dropped = samples.len() - n, "audio ring full, truncated write");
        }
        n
    }
}

impl AudioConsumer {
    /// Drains up to `out.len()` samples. An empty ring yields zero samples;
    /// the host plays silence on underrun.
    pub fn pop(&mut self, out: &mut [i16]) -> usize {
        let cap = self.shared.buf.len();
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);

        let n = out.len().min(write.wrapping_sub(read));
        for (i, slot) in out[..n].iter_mut().enumerate() {
            *slot = unsafe { *self.shared.buf[read.wrapping_add(i) & (cap - 1)].get() };
        }
        self.shared.read.store(read.wrapping_add(n), Ordering::Release);
        n
    }

    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.shared
            .write
            .load(Ordering::Acquire)
            .wrapping_sub(self.shared.read.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_only_sees_complete_frames() {
        let (mut tx, mut rx) = video_exchange();

        // Each published frame is filled with a single value; a torn frame
        // would show up as a mix.
        let producer = std::thread::spawn(move || {
            for i in 1..=500u32 {
                let pixels = vec![i; 240 * 160];
                tx.publish(240, 160, &pixels);
            }
        });

        // The final publish stays fresh, so the consumer always catches it.
        let mut last = 0;
        while last != 500 {
            if let Some(frame) = rx.poll() {
                assert_eq!(frame.pixels.len(), 240 * 160);
                let first = frame.pixels[0];
                assert!(frame.pixels.iter().all(|&p| p == first));
                assert!(first >= last, "frames observed out of order");
                last = first;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn latest_frame_survives_producer_stop() {
        let (mut tx, mut rx) = video_exchange();
        tx.publish(2, 1, &[7, 7]);
        drop(tx);

        assert!(rx.poll().is_some());
        assert_eq!(rx.latest().pixels, [7, 7]);
        assert!(rx.poll().is_none());
        assert_eq!(rx.latest().pixels, [7, 7]);
    }

    #[test]
    fn audio_ring_truncates_instead_of_overrunning() {
        let (mut tx, mut rx) = audio_ring(8);

        assert_eq!(tx.push(&[1, 2, 3, 4, 5, 6]), 6);
        // Only two slots left; the write is truncated, unread data intact.
        assert_eq!(tx.push(&[7, 8, 9, 10]), 2);
        assert_eq!(rx.len(), 8);

        let mut out = [0i16; 8];
        assert_eq!(rx.pop(&mut out), 8);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

        // Space is reusable after the consumer catches up.
        assert_eq!(tx.push(&[11, 12]), 2);
        assert_eq!(rx.pop(&mut out[..2]), 2);
        assert_eq!(&out[..2], &[11, 12]);
    }

    #[test]
    fn audio_cursors_survive_wraparound() {
        // free-running cursors about to wrap past usize::MAX
        let start = usize::MAX - 3;
        let shared = Arc::new(AudioShared {
            buf: (0..8).map(|_| UnsafeCell::new(0)).collect(),
            write: AtomicUsize::new(start),
            read: AtomicUsize::new(start),
        });
        let mut tx = AudioProducer {
            shared: shared.clone(),
        };
        let mut rx = AudioConsumer { shared };

        assert_eq!(tx.push(&[1, 2, 3, 4, 5, 6]), 6);
        assert_eq!(rx.len(), 6);

        let mut out = [0i16; 6];
        assert_eq!(rx.pop(&mut out), 6);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        // the ring keeps working after the wrap
        assert_eq!(tx.push(&[7, 8]), 2);
        assert_eq!(rx.pop(&mut out[..2]), 2);
        assert_eq!(&out[..2], &[7, 8]);
    }

    #[test]
    fn audio_underrun_yields_zero_samples() {
        let (_tx, mut rx) = audio_ring(8);
        let mut out = [0i16; 4];
        assert_eq!(rx.pop(&mut out), 0);
    }

    #[test]
    fn input_last_write_wins() {
        let input = InputRegister::new();
        let reader = input.clone();
        input.set(Buttons::A | Buttons::UP);
        input.set(Buttons::START);
        assert_eq!(reader.get(), Buttons::START);
    }
}
