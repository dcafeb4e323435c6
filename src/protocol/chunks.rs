/// Maximum APDU payload.
pub const FRAME_SIZE: usize = 255;

/// A piece of a serialization that starts on a fresh frame. `trailer`
/// always travels in the same frame as the final slice of `body`.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    body: Vec<u8>,
    trailer: Vec<u8>,
}

impl Segment {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            trailer: Vec::new(),
        }
    }

    pub fn with_trailer(body: Vec<u8>, trailer: Vec<u8>) -> Self {
        debug_assert!(trailer.len() < FRAME_SIZE);
        Self { body, trailer }
    }

    fn into_pieces(self, out: &mut Vec<Vec<u8>>) {
        if self.body.is_empty() {
            if !self.trailer.is_empty() {
                out.push(self.trailer);
            }
            return;
        }
        let step = FRAME_SIZE - self.trailer.len();
        let count = (self.body.len() + step - 1) / step;
        for (i, chunk) in self.body.chunks(step).enumerate() {
            let mut piece = Vec::with_capacity(chunk.len() + self.trailer.len());
            piece.extend_from_slice(chunk);
            if i + 1 == count {
                piece.extend_from_slice(&self.trailer);
            }
            out.push(piece);
        }
    }
}

/// One APDU payload, tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub first: bool,
    pub last: bool,
}

/// Frames cut from a list of segments, in order.
#[derive(Debug)]
pub struct Frames {
    pieces: std::vec::IntoIter<Vec<u8>>,
    total: usize,
    index: usize,
}

impl Frames {
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut pieces = Vec::new();
        for segment in segments {
            segment.into_pieces(&mut pieces);
        }
        Self {
            total: pieces.len(),
            pieces: pieces.into_iter(),
            index: 0,
        }
    }

    /// Plain slicing of one serialization.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(vec![Segment::new(data)])
    }
}

impl Iterator for Frames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let data = self.pieces.next()?;
        let frame = Frame {
            data,
            first: self.index == 0,
            last: self.index + 1 == self.total,
        };
        self.index += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pieces.size_hint()
    }
}

impl ExactSizeIterator for Frames {}
