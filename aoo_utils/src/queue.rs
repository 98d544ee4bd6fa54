//! Wait-free single-producer/single-consumer queues.
//!
//! Thin wrappers around [`rtrb`] ring buffers, exposing the bulk operations the audio
//! pipeline needs: whole-slice writes that either fully succeed or do nothing, and reads
//! that hand out both contiguous halves of the ring.

pub use rtrb;
pub use rtrb::chunks::ChunkError;

/// Creates a new queue holding at most `capacity` elements.
///
/// Allocates, so should not be called from the audio thread.
#[inline(always)]
pub fn queue<T>(capacity: usize) -> (Writer<T>, Reader<T>) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    (Writer { tx }, Reader { rx })
}

/// Acquires a write chunk covering all available producer slots.
#[inline(always)]
pub fn producer_get_all<T>(tx: &mut rtrb::Producer<T>) -> rtrb::chunks::WriteChunkUninit<'_, T> {
    tx.write_chunk_uninit(tx.slots()).unwrap()
}

/// Acquires a read chunk covering all available consumer slots.
#[inline(always)]
pub fn consumer_get_all<T>(rx: &mut rtrb::Consumer<T>) -> rtrb::chunks::ReadChunk<'_, T> {
    rx.read_chunk(rx.slots()).unwrap()
}

/// The producing end of a queue.
#[derive(Debug)]
pub struct Writer<T> {
    tx: rtrb::Producer<T>,
}

impl<T> Writer<T> {
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.tx.buffer().capacity()
    }

    /// Returns the number of elements that can currently be written.
    #[inline(always)]
    pub fn write_available(&self) -> usize {
        self.tx.slots()
    }

    /// Returns `true` if the reading end has been dropped.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_abandoned()
    }

    /// Pushes a single element, handing it back if the queue is full.
    #[inline(always)]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        self.tx.push(value).map_err(|rtrb::PushError::Full(v)| v)
    }

    /// Writes `n` elements produced by `iter`.
    ///
    /// Nothing is written if fewer than `n` slots are available. If `iter` runs out
    /// early, only the elements it yielded are committed. Returns how many were.
    #[inline(always)]
    pub fn write_from_iter(
        &mut self,
        n: usize,
        iter: impl IntoIterator<Item = T>,
    ) -> Result<usize, ChunkError> {
        Ok(self.tx.write_chunk_uninit(n)?.fill_from_iter(iter))
    }

    /// Fills every free slot with elements produced by `f`.
    #[inline(always)]
    pub fn fill_with(&mut self, f: impl FnMut() -> T) -> usize {
        producer_get_all(&mut self.tx).fill_from_iter(core::iter::repeat_with(f))
    }
}

impl<T: Copy> Writer<T> {
    /// Writes all of `data`, or nothing if there isn't enough room.
    #[inline(always)]
    pub fn write(&mut self, data: &[T]) -> Result<(), ChunkError> {
        self.write_from_iter(data.len(), data.iter().copied())
            .map(|_| ())
    }

    /// Writes `n` copies of `value`, or nothing if there isn't enough room.
    #[inline(always)]
    pub fn write_repeated(&mut self, value: T, n: usize) -> Result<(), ChunkError> {
        self.write_from_iter(n, core::iter::repeat_n(value, n))
            .map(|_| ())
    }
}

/// The consuming end of a queue.
#[derive(Debug)]
pub struct Reader<T> {
    rx: rtrb::Consumer<T>,
}

impl<T> Reader<T> {
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.rx.buffer().capacity()
    }

    /// Returns the number of elements that can currently be read.
    #[inline(always)]
    pub fn read_available(&self) -> usize {
        self.rx.slots()
    }

    /// Returns `true` if the writing end has been dropped.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.rx.is_abandoned()
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<T> {
        self.rx.pop().ok()
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<&T> {
        self.rx.peek().ok()
    }

    /// Passes the next `n` elements to `f`, as the two contiguous halves of the ring,
    /// then removes them from the queue.
    ///
    /// Nothing happens if fewer than `n` elements are available.
    #[inline(always)]
    pub fn read_slices<R>(
        &mut self,
        n: usize,
        f: impl FnOnce(&[T], &[T]) -> R,
    ) -> Result<R, ChunkError> {
        let chunk = self.rx.read_chunk(n)?;
        let (start, end) = chunk.as_slices();
        let res = f(start, end);
        chunk.commit_all();
        Ok(res)
    }

    /// Discards up to `n` elements, returns how many were discarded.
    #[inline(always)]
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.rx.slots());
        // can't fail, n is in bounds
        if let Ok(chunk) = self.rx.read_chunk(n) {
            chunk.commit_all();
        }
        n
    }

    /// Discards every available element.
    #[inline(always)]
    pub fn clear(&mut self) {
        consumer_get_all(&mut self.rx).commit_all();
    }
}

impl<T: Copy> Reader<T> {
    /// Fills `out` entirely, or reads nothing if fewer than `out.len()` elements are
    /// available.
    #[inline(always)]
    pub fn read(&mut self, out: &mut [T]) -> Result<(), ChunkError> {
        self.read_slices(out.len(), |start, end| {
            let (out_start, out_end) = out.split_at_mut(start.len());
            out_start.copy_from_slice(start);
            out_end.copy_from_slice(end);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_all_or_nothing() {
        let (mut tx, mut rx) = queue::<u32>(4);

        assert!(tx.write(&[1, 2, 3]).is_ok());
        assert_eq!(tx.write_available(), 1);
        assert_eq!(tx.write(&[4, 5]), Err(ChunkError::TooFewSlots(1)));
        assert_eq!(rx.read_available(), 3);

        let mut out = [0; 4];
        assert!(rx.read(&mut out).is_err());
        assert!(rx.read(&mut out[..3]).is_ok());
        assert_eq!(out[..3], [1, 2, 3]);
    }

    #[test]
    fn reads_across_the_wrap_point() {
        let (mut tx, mut rx) = queue::<u32>(5);

        tx.write(&[0, 0, 0, 0]).unwrap();
        assert_eq!(rx.skip(3), 3);
        tx.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(rx.read_available(), 5);
        assert_eq!(rx.pop(), Some(0));

        let halves = rx
            .read_slices(4, |a, b| (a.to_vec(), b.to_vec()))
            .unwrap();
        assert_eq!([halves.0, halves.1].concat(), [1, 2, 3, 4]);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn repeated_and_filled_writes() {
        let (mut tx, mut rx) = queue::<f32>(6);

        tx.write_repeated(0.5, 2).unwrap();
        assert!(tx.write_repeated(0., 5).is_err());
        assert_eq!(tx.fill_with(|| 1.), 4);
        assert_eq!(tx.write_available(), 0);

        let mut out = [0.; 6];
        rx.read(&mut out).unwrap();
        assert_eq!(out, [0.5, 0.5, 1., 1., 1., 1.]);
    }

    #[test]
    fn clear_and_skip_are_bounded() {
        let (mut tx, mut rx) = queue::<u8>(3);
        tx.write(&[1, 2]).unwrap();
        assert_eq!(rx.skip(10), 2);
        tx.write(&[3]).unwrap();
        rx.clear();
        assert_eq!(rx.read_available(), 0);
        assert_eq!(tx.write_available(), 3);
    }

    #[test]
    fn single_producer_single_consumer_threads() {
        let (mut tx, mut rx) = queue::<u64>(64);
        const N: u64 = 10_000;

        let producer = std::thread::spawn(move || {
            let mut next = 0;
            while next < N {
                if tx.push(next).is_ok() {
                    next += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < N {
            match rx.pop() {
                Some(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }

        producer.join().unwrap();
    }
}
