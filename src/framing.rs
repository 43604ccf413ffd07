//! Newline framing for the device wire protocol.
//!
//! Every message on the wire — serial or TCP, command or response — is one line
//! terminated by `\n`. [`FrameBuffer`] turns an arbitrary stream of byte chunks
//! back into those lines, retaining any trailing partial line until the next
//! chunk arrives. Splitting is chunk-size independent: feeding `"AB\nCD\n"` in
//! one call or byte by byte yields the same frames.

/// Accumulates raw bytes and splits them into newline-terminated frames.
///
/// Frames are emitted with their trailing `\n` included; delivery points strip
/// the delimiter with [`strip_delimiter`]. Empty frames (a bare `\n`) are valid
/// and preserved. No maximum frame length is enforced: the tail grows without
/// bound until a delimiter arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    tail: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty frame buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning all frames it completes.
    ///
    /// Any bytes after the last `\n` are retained for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.tail.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(index) = self.tail.iter().position(|&b| b == b'\n') {
            let rest = self.tail.split_off(index + 1);
            frames.push(std::mem::replace(&mut self.tail, rest));
        }
        frames
    }

    /// The retained partial frame, if any.
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// True when no partial frame is retained.
    pub fn is_empty(&self) -> bool {
        self.tail.is_empty()
    }
}

/// Convert a completed frame into its payload text, dropping the delimiter.
pub fn strip_delimiter(mut frame: Vec<u8>) -> String {
    if frame.last() == Some(&b'\n') {
        frame.pop();
    }
    String::from_utf8_lossy(&frame).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn single_chunk_splits_into_frames() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.feed(b"AB\nCD\n");
        assert_eq!(frames, vec![b"AB\n".to_vec(), b"CD\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn splitting_is_chunk_size_independent() {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for chunk in [&b"A"[..], b"B\n", b"C", b"D\n"] {
            frames.extend(buffer.feed(chunk));
        }
        assert_eq!(frames, vec![b"AB\n".to_vec(), b"CD\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn trailing_partial_is_retained_until_delimited() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.feed(b"line1\nline2\nline3");
        assert_eq!(frames, vec![b"line1\n".to_vec(), b"line2\n".to_vec()]);
        assert_eq!(buffer.tail(), b"line3");

        let frames = buffer.feed(b"\n");
        assert_eq!(frames, vec![b"line3\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_frames_are_preserved() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.feed(b"\n\na\n");
        assert_eq!(
            frames,
            vec![b"\n".to_vec(), b"\n".to_vec(), b"a\n".to_vec()]
        );
    }

    #[test]
    fn no_frame_without_delimiter() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.feed(b"incomplete").is_empty());
        assert_eq!(buffer.tail(), b"incomplete");
    }

    #[test]
    fn random_chunking_loses_no_bytes() {
        // Frames plus retained tail must always reconcat to the input,
        // whatever the chunk boundaries were.
        let input = b"alpha\n\nbeta gamma\ndelta";
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let mut buffer = FrameBuffer::new();
            let mut produced: Vec<u8> = Vec::new();
            let mut offset = 0;
            while offset < input.len() {
                let step = rng.gen_range(1..=input.len() - offset);
                for frame in buffer.feed(&input[offset..offset + step]) {
                    produced.extend_from_slice(&frame);
                }
                offset += step;
            }
            produced.extend_from_slice(buffer.tail());
            assert_eq!(produced, input);
        }
    }

    #[test]
    fn strip_delimiter_drops_exactly_one_newline() {
        assert_eq!(strip_delimiter(b"hello\n".to_vec()), "hello");
        assert_eq!(strip_delimiter(b"\n".to_vec()), "");
        assert_eq!(strip_delimiter(b"no-delimiter".to_vec()), "no-delimiter");
    }
}
