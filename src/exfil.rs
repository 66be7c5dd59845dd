//! This module is responsible for exfilling captured blocks to disk

// The writers have cushion from the rtrb rings, so unlike the delivery
// path they are allowed to eat storage latency. Each writer owns exactly
// one ring and one sink and drains to empty on shutdown.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use byte_slice_cast::AsByteSlice;
use rtrb::Consumer;
use tracing::{info, warn};

use crate::{ChannelId, SampleBlock, MAX_BLOCK_SAMPLES};

/// Tally of one writer's work, returned when it drains out.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    pub blocks: u64,
    pub bytes: u64,
    pub short_writes: u64,
    pub write_errors: u64,
}

/// Interleave a block into `frame` as I,Q,I,Q,... and return the number
/// of elements used. `frame` must hold `2 * MAX_BLOCK_SAMPLES` elements;
/// the driver contract caps block size and debug builds enforce it here.
pub fn interleave(i: &[i16], q: &[i16], frame: &mut [i16]) -> usize {
    debug_assert_eq!(i.len(), q.len());
    debug_assert!(
        i.len() <= MAX_BLOCK_SAMPLES,
        "driver delivered a {}-sample block, contract max is {}",
        i.len(),
        MAX_BLOCK_SAMPLES
    );
    for (k, &s) in i.iter().enumerate() {
        frame[2 * k] = s;
    }
    for (k, &s) in q.iter().enumerate() {
        frame[2 * k + 1] = s;
    }
    2 * i.len()
}

/// Drain `ring` into `sink` until `stop` is raised and the ring is empty.
/// Blocks go out in arrival order, one write per block; a short or failed
/// write is logged and the block abandoned, never retried. With no sink,
/// blocks are counted and discarded so the ring never backs up.
pub fn write_blocks<W: Write>(
    channel: ChannelId,
    mut sink: Option<W>,
    mut ring: Consumer<SampleBlock>,
    stop: &AtomicBool,
) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut frame = vec![0i16; 2 * MAX_BLOCK_SAMPLES];
    loop {
        let block = match ring.pop() {
            Ok(block) => block,
            Err(_) => {
                // The producer quiesces before stop is raised, so empty
                // plus stop means fully drained.
                if stop.load(Ordering::Acquire) {
                    break;
                }
                // rtrb has no blocking pop; nap instead of spinning, this
                // side has no real-time budget.
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        };
        stats.blocks += 1;
        if let Some(sink) = sink.as_mut() {
            let used = interleave(&block.i, &block.q, &mut frame);
            // Frames hit the disk as native-endian shorts; capture targets
            // are little-endian, which is also the on-disk contract.
            let bytes = frame[..used].as_byte_slice();
            match sink.write(bytes) {
                Ok(n) if n == bytes.len() => stats.bytes += n as u64,
                Ok(n) => {
                    stats.short_writes += 1;
                    stats.bytes += n as u64;
                    warn!(
                        "RX {} - incomplete write - expected: {} bytes - actual: {} bytes",
                        channel,
                        bytes.len(),
                        n
                    );
                }
                Err(e) => {
                    stats.write_errors += 1;
                    warn!("RX {} - write failed: {}", channel, e);
                }
            }
        }
    }
    info!(
        "RX {} - writer drained: {} blocks, {} bytes",
        channel, stats.blocks, stats.bytes
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};
    use std::time::Instant;

    use super::*;

    #[test]
    fn interleave_orders_pairs() {
        let mut frame = vec![0i16; 2 * MAX_BLOCK_SAMPLES];
        let used = interleave(&[1, 3, 5], &[2, 4, 6], &mut frame);
        assert_eq!(used, 6);
        assert_eq!(&frame[..6], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn blocks_round_trip_to_disk() {
        let lens = [16usize, 5, 300, 1];
        let (mut producer, consumer) = rtrb::RingBuffer::new(16);
        let mut expect = Vec::<u8>::new();
        let mut next = 0u32;
        for (bi, &len) in lens.iter().enumerate() {
            let i: Vec<i16> = (0..len).map(|k| (bi * 1000 + k) as i16).collect();
            let q: Vec<i16> = i.iter().map(|v| v.wrapping_neg()).collect();
            for k in 0..len {
                expect.extend_from_slice(&i[k].to_le_bytes());
                expect.extend_from_slice(&q[k].to_le_bytes());
            }
            producer
                .push(SampleBlock::new(next, i, q, Instant::now()))
                .unwrap();
            next = next.wrapping_add(len as u32);
        }

        // stop already raised: the writer drains what is queued and exits
        let stop = AtomicBool::new(true);
        let mut file = tempfile::tempfile().unwrap();
        let stats = write_blocks(ChannelId::A, Some(&mut file), consumer, &stop);

        let total: usize = lens.iter().sum();
        assert_eq!(stats.blocks, lens.len() as u64);
        assert_eq!(stats.bytes as usize, 4 * total);
        assert_eq!(stats.short_writes, 0);
        assert_eq!(stats.write_errors, 0);

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut got = Vec::new();
        file.read_to_end(&mut got).unwrap();
        assert_eq!(got, expect);
    }

    /// Writer that accepts half of every buffer, to exercise the
    /// short-write path.
    struct HalfSink(Vec<u8>);

    impl Write for HalfSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len() / 2;
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_writes_are_logged_not_fatal() {
        let (mut producer, consumer) = rtrb::RingBuffer::new(4);
        for k in 0..2u32 {
            producer
                .push(SampleBlock::new(
                    k * 8,
                    vec![1; 8],
                    vec![2; 8],
                    Instant::now(),
                ))
                .unwrap();
        }
        let stop = AtomicBool::new(true);
        let stats = write_blocks(ChannelId::B, Some(HalfSink(Vec::new())), consumer, &stop);
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.short_writes, 2);
        assert_eq!(stats.bytes, 32); // half of 2 * 32 requested bytes landed
    }

    #[test]
    fn sinkless_writer_discards_but_counts() {
        let (mut producer, consumer) = rtrb::RingBuffer::new(4);
        for k in 0..3u32 {
            producer
                .push(SampleBlock::new(
                    k * 4,
                    vec![0; 4],
                    vec![0; 4],
                    Instant::now(),
                ))
                .unwrap();
        }
        let stop = AtomicBool::new(true);
        let stats = write_blocks(ChannelId::A, None::<std::fs::File>, consumer, &stop);
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.bytes, 0);
    }
}
