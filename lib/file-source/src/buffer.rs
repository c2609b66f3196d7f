use std::io::{self, BufRead};

use bstr::Finder;
use bytes::BytesMut;

use crate::FilePosition;

/// Outcome of a single delimited read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line was written into the buffer. Holds the bytes consumed including the
    /// delimiter and any discarded oversize lines before it.
    Line(usize),
    /// No delimiter before EOF. Bytes read so far stay in the buffer for the next call.
    Partial,
}

/// Read from `reader` up to and excluding `delim`.
///
/// Lines longer than `max_size` are consumed and dropped, then reading continues with the following
/// line. `position` is advanced in lock step with the bytes consumed from `reader` so the caller
/// can checkpoint exactly after the returned line.
pub fn read_until_with_max_size<R: BufRead + ?Sized>(
    reader: &mut R,
    position: &mut FilePosition,
    delim: &[u8],
    buf: &mut BytesMut,
    max_size: usize,
) -> io::Result<ReadOutcome> {
    let finder = Finder::new(delim);
    let mut total_read = 0;
    let mut discarding = buf.len() > max_size;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };

        let (found, used) = match finder.find(available) {
            Some(idx) => {
                if !discarding {
                    buf.extend_from_slice(&available[..idx]);
                }
                (true, idx + delim.len())
            }
            None => {
                if !discarding {
                    buf.extend_from_slice(available);
                }
                (false, available.len())
            }
        };
        reader.consume(used);
        *position += used as u64;
        total_read += used;

        if !discarding && buf.len() > max_size {
            warn!(
                message = "Found line that exceeds max_line_bytes; discarding.",
                max_line_bytes = max_size,
                internal_log_rate_secs = 30,
            );
            discarding = true;
        }

        if found {
            if discarding {
                discarding = false;
                buf.clear();
                continue;
            }
            return Ok(ReadOutcome::Line(total_read));
        }
        if used == 0 {
            return Ok(ReadOutcome::Partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use quickcheck::{QuickCheck, TestResult};

    use super::{ReadOutcome, read_until_with_max_size};

    fn read_all(input: &[u8], max_size: usize) -> (Vec<Vec<u8>>, u64) {
        let mut reader = Cursor::new(input);
        let mut position = 0;
        let mut buf = BytesMut::new();
        let mut lines = Vec::new();
        while let ReadOutcome::Line(_) =
            read_until_with_max_size(&mut reader, &mut position, b"\n", &mut buf, max_size)
                .unwrap()
        {
            lines.push(buf.split().to_vec());
        }
        (lines, position)
    }

    #[test]
    fn splits_lines_and_tracks_position() {
        let (lines, position) = read_all(b"one\ntwo\nthree", 100);
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        // The unterminated tail is consumed into the buffer but not returned.
        assert_eq!(position, 13);
    }

    #[test]
    fn oversize_lines_are_discarded() {
        let (lines, position) =
            read_all(b"short\nthis is too long\nexact size\n11 eleven11\n", 10);
        assert_eq!(lines, vec![b"short".to_vec(), b"exact size".to_vec()]);
        assert_eq!(position, 46);
    }

    #[test]
    fn partial_write_completes_on_next_call() {
        let mut position = 0;
        let mut buf = BytesMut::new();

        let mut reader = Cursor::new(&b"hello wo"[..]);
        let outcome =
            read_until_with_max_size(&mut reader, &mut position, b"\n", &mut buf, 100).unwrap();
        assert_eq!(outcome, ReadOutcome::Partial);

        let mut reader = Cursor::new(&b"rld\n"[..]);
        let outcome =
            read_until_with_max_size(&mut reader, &mut position, b"\n", &mut buf, 100).unwrap();
        assert_eq!(outcome, ReadOutcome::Line(4));
        assert_eq!(&buf[..], b"hello world");
        assert_eq!(position, 12);
    }

    #[test]
    fn qc_position_matches_consumed_bytes() {
        fn prop(lines: Vec<String>) -> TestResult {
            if lines.iter().any(|line| line.contains('\n')) {
                return TestResult::discard();
            }
            let mut input = Vec::new();
            for line in &lines {
                input.extend_from_slice(line.as_bytes());
                input.push(b'\n');
            }
            let (read, position) = read_all(&input, usize::MAX);
            let expected: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
            TestResult::from_bool(read == expected && position == input.len() as u64)
        }
        QuickCheck::new()
            .tests(200)
            .quickcheck(prop as fn(Vec<String>) -> TestResult);
    }
}
