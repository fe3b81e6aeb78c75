use bytes::Bytes;

/// Which pieces a peer claims to have, one bit per piece, MSB-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// An empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Builds a bitfield from wire bytes for a known piece count.
    ///
    /// Spare trailing bits are cleared so equality and counting behave.
    pub fn from_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(piece_count.div_ceil(8), 0);

        let mut bf = Self { bits, piece_count };
        bf.clear_spare_bits();
        bf
    }

    /// Builds a bitfield from wire bytes when the piece count is unknown;
    /// every carried bit becomes addressable.
    pub fn from_raw(bytes: &[u8]) -> Self {
        Self {
            bits: bytes.to_vec(),
            piece_count: bytes.len() * 8,
        }
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - (index % 8))) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] |= 1 << (7 - (index % 8));
    }

    pub fn clear(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        self.bits[index / 8] &= !(1 << (7 - (index % 8)));
    }

    /// Extends the addressable range so `index` fits; existing bits keep
    /// their values.
    pub fn grow(&mut self, piece_count: usize) {
        if piece_count <= self.piece_count {
            return;
        }
        self.piece_count = piece_count;
        self.bits.resize(piece_count.div_ceil(8), 0);
    }

    /// Number of pieces marked present.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// The expected wire length for a given piece count.
    pub fn wire_len(piece_count: usize) -> usize {
        piece_count.div_ceil(8)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}
