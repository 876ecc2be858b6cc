use byteorder::{ByteOrder, LittleEndian};

/// Full-scale input range (V) of a signed 16-bit count.
pub const VOLTS_PER_COUNT: f64 = 10.0 / 32768.0;

/// Samples decoded from one read, split by channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// Current monitor channel (V)
    pub current: Vec<f64>,
    /// Applied voltage channel (V); zeros when only one channel is scanned
    pub voltage: Vec<f64>,
}

impl Block {
    /// Number of scans (one sample per channel each).
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Whether no complete scan was decoded.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Frame decoder that carries incomplete scans over to the next read.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    channels: usize,
    leftover: Vec<u8>,
}

impl FrameDecoder {
    /// Decoder for `channels` interleaved channels.
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            leftover: Vec::new(),
        }
    }

    /// Bytes of one scan.
    pub fn frame_len(&self) -> usize {
        2 * self.channels
    }

    /// Bytes waiting for the rest of their scan.
    pub fn pending(&self) -> usize {
        self.leftover.len()
    }

    /// Decode `bytes` after any leftover from the previous call.
    pub fn decode(&mut self, bytes: &[u8]) -> Block {
        self.leftover.extend_from_slice(bytes);
        let frame = self.frame_len();
        let whole = self.leftover.len() / frame * frame;

        let mut block = Block::default();
        for scan in self.leftover[..whole].chunks_exact(frame) {
            let volts = |ch: usize| LittleEndian::read_i16(&scan[2 * ch..2 * ch + 2]) as f64 * VOLTS_PER_COUNT;
            block.current.push(volts(0));
            block
                .voltage
                .push(if self.channels > 1 { volts(1) } else { 0.0 });
        }
        self.leftover.drain(..whole);
        block
    }
}

/// Timestamps for `count` samples that arrived between `before` and `after`.
///
/// Samples are spread evenly with the last one at `after`.
pub fn interpolate_times(before: f64, after: f64, count: usize) -> Vec<f64> {
    let step = (after - before) / count.max(1) as f64;
    (1..=count).map(|k| before + k as f64 * step).collect()
}
