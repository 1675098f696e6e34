//! Byte-offset arithmetic for line-safe reads.
//!
//! Every place that needs to start or stop reading at a line boundary goes
//! through these functions; nothing else derives boundaries on its own.

use std::io::{self, Read, Seek, SeekFrom};

/// Default backward scan limit (1 MiB).
pub const DEFAULT_SCAN_CAP: u64 = 1024 * 1024;

const TAIL_BLOCK_SIZE: u64 = 8192;

/// Returns the start of the line containing `offset`.
///
/// If the byte before `offset` is a `\n`, `offset` is already a line start and
/// is returned unchanged. Otherwise scans backward up to `cap_bytes` for the
/// previous `\n` and returns the position right after it. Returns 0 when no
/// terminator is found within the cap.
pub fn rewind_to_line_start<R: Read + Seek>(
    stream: &mut R,
    offset: u64,
    cap_bytes: u64,
) -> io::Result<u64> {
    if offset == 0 {
        return Ok(0);
    }

    if byte_at(stream, offset - 1)? == Some(b'\n') {
        return Ok(offset);
    }

    Ok(last_terminator_before(stream, offset, cap_bytes)?
        .map(|pos| pos + 1)
        .unwrap_or(0))
}

/// Returns the end of the last complete line in the first `file_size` bytes.
///
/// An unterminated trailing fragment is excluded. Returns 0 when no terminator
/// is found within `cap_bytes` of the end.
pub fn effective_scan_end<R: Read + Seek>(
    stream: &mut R,
    file_size: u64,
    cap_bytes: u64,
) -> io::Result<u64> {
    if file_size == 0 {
        return Ok(0);
    }

    if byte_at(stream, file_size - 1)? == Some(b'\n') {
        return Ok(file_size);
    }

    Ok(last_terminator_before(stream, file_size, cap_bytes)?
        .map(|pos| pos + 1)
        .unwrap_or(0))
}

/// Returns the offset where the last `num_lines` lines of the stream begin.
///
/// Scans backward in fixed-size blocks counting terminators, so only the tail
/// of the file is read. Returns 0 when the stream holds `num_lines` or fewer
/// terminators, and the stream length when `num_lines` is 0.
pub fn tail_start_offset<R: Read + Seek>(stream: &mut R, num_lines: u64) -> io::Result<u64> {
    let file_size = stream.seek(SeekFrom::End(0))?;
    if num_lines == 0 {
        return Ok(file_size);
    }

    let mut found = 0u64;
    let mut pos = file_size;
    let mut block = vec![0u8; TAIL_BLOCK_SIZE as usize];

    while pos > 0 {
        let read_size = TAIL_BLOCK_SIZE.min(pos);
        pos -= read_size;
        let buf = &mut block[..read_size as usize];
        stream.seek(SeekFrom::Start(pos))?;
        stream.read_exact(buf)?;

        for (i, byte) in buf.iter().enumerate().rev() {
            if *byte == b'\n' {
                found += 1;
                // The (n+1)-th terminator from the end closes the line just
                // before the tail.
                if found == num_lines + 1 {
                    return Ok(pos + i as u64 + 1);
                }
            }
        }
    }

    Ok(0)
}

fn byte_at<R: Read + Seek>(stream: &mut R, pos: u64) -> io::Result<Option<u8>> {
    stream.seek(SeekFrom::Start(pos))?;
    let mut byte = [0u8; 1];
    match stream.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Position of the last `\n` in `[end - cap, end)`, if any.
fn last_terminator_before<R: Read + Seek>(
    stream: &mut R,
    end: u64,
    cap_bytes: u64,
) -> io::Result<Option<u64>> {
    let to_scan = cap_bytes.min(end);
    if to_scan == 0 {
        return Ok(None);
    }
    let scan_start = end - to_scan;
    stream.seek(SeekFrom::Start(scan_start))?;

    let mut buf = Vec::with_capacity(to_scan as usize);
    stream.by_ref().take(to_scan).read_to_end(&mut buf)?;

    Ok(buf
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|idx| scan_start + idx as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor};

    const TEXT: &[u8] = b"alpha\nbravo charlie\n\ndelta\necho foxtrot golf\n";

    fn line_starts(data: &[u8]) -> Vec<u64> {
        let mut starts = vec![0];
        for (i, b) in data.iter().enumerate() {
            if *b == b'\n' && i + 1 < data.len() {
                starts.push(i as u64 + 1);
            }
        }
        starts
    }

    #[test]
    fn test_rewind_keeps_offset_on_boundary() {
        let mut cur = Cursor::new(TEXT);
        assert_eq!(rewind_to_line_start(&mut cur, 6, DEFAULT_SCAN_CAP).unwrap(), 6);
        assert_eq!(rewind_to_line_start(&mut cur, 0, DEFAULT_SCAN_CAP).unwrap(), 0);
    }

    #[test]
    fn test_rewind_mid_line() {
        let mut cur = Cursor::new(TEXT);
        // Inside "bravo charlie"
        assert_eq!(rewind_to_line_start(&mut cur, 10, DEFAULT_SCAN_CAP).unwrap(), 6);
        // Inside the first line
        assert_eq!(rewind_to_line_start(&mut cur, 3, DEFAULT_SCAN_CAP).unwrap(), 0);
    }

    #[test]
    fn test_rewind_falls_back_to_zero_beyond_cap() {
        let mut cur = Cursor::new(TEXT);
        // "echo foxtrot golf" starts at 27; offset 40 is 13 bytes in.
        assert_eq!(rewind_to_line_start(&mut cur, 40, 4).unwrap(), 0);
        assert_eq!(rewind_to_line_start(&mut cur, 40, 64).unwrap(), 27);
    }

    #[test]
    fn test_rewind_every_offset_lands_on_line_start() {
        let starts = line_starts(TEXT);
        let mut cur = Cursor::new(TEXT);
        for offset in 0..=TEXT.len() as u64 {
            let safe = rewind_to_line_start(&mut cur, offset, DEFAULT_SCAN_CAP).unwrap();
            assert!(safe <= offset);
            assert!(
                starts.contains(&safe) || safe == TEXT.len() as u64,
                "offset {offset} rewound to {safe}"
            );
        }
    }

    #[test]
    fn test_rewind_then_discard_never_duplicates_or_drops() {
        // Split at every offset: lines fully before the split are "previous
        // run", the rest are read after rewind + discard.
        let all: Vec<String> = TEXT.lines().map(|l| l.unwrap()).collect();
        for offset in 0..=TEXT.len() as u64 {
            let mut cur = Cursor::new(TEXT);
            let safe = rewind_to_line_start(&mut cur, offset, DEFAULT_SCAN_CAP).unwrap();

            // Lines that finished at or before `offset` were consumed previously,
            // plus the line `offset` falls inside (it was counted by the prior run).
            let mut reader = BufReader::new(Cursor::new(&TEXT[safe as usize..]));
            let mut after = Vec::new();
            let mut first = true;
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if !(first && safe < offset) {
                    after.push(line.trim_end_matches('\n').to_string());
                }
                first = false;
                line.clear();
            }

            let consumed_before = TEXT[..offset as usize]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            let partial = if safe < offset { 1 } else { 0 };
            assert_eq!(
                consumed_before + partial + after.len(),
                all.len(),
                "offset {offset}"
            );
            assert_eq!(&all[consumed_before + partial..], &after[..]);
        }
    }

    #[test]
    fn test_effective_end_terminated_file() {
        let mut cur = Cursor::new(TEXT);
        let size = TEXT.len() as u64;
        assert_eq!(effective_scan_end(&mut cur, size, DEFAULT_SCAN_CAP).unwrap(), size);
    }

    #[test]
    fn test_effective_end_excludes_trailing_fragment() {
        let data = b"one\ntwo\nthr";
        let mut cur = Cursor::new(&data[..]);
        assert_eq!(effective_scan_end(&mut cur, data.len() as u64, DEFAULT_SCAN_CAP).unwrap(), 8);
    }

    #[test]
    fn test_effective_end_without_terminator() {
        let data = b"no newline at all";
        let mut cur = Cursor::new(&data[..]);
        assert_eq!(effective_scan_end(&mut cur, data.len() as u64, DEFAULT_SCAN_CAP).unwrap(), 0);
        assert_eq!(effective_scan_end(&mut cur, 0, DEFAULT_SCAN_CAP).unwrap(), 0);
    }

    #[test]
    fn test_effective_end_respects_cap() {
        let data = b"one\nlong trailing fragment";
        let mut cur = Cursor::new(&data[..]);
        assert_eq!(effective_scan_end(&mut cur, data.len() as u64, 5).unwrap(), 0);
        assert_eq!(effective_scan_end(&mut cur, data.len() as u64, 64).unwrap(), 4);
    }

    #[test]
    fn test_tail_start_offset() {
        let data = b"a\nb\nc\n";
        let mut cur = Cursor::new(&data[..]);
        assert_eq!(tail_start_offset(&mut cur, 1).unwrap(), 4);
        assert_eq!(tail_start_offset(&mut cur, 2).unwrap(), 2);
        assert_eq!(tail_start_offset(&mut cur, 3).unwrap(), 0);
        assert_eq!(tail_start_offset(&mut cur, 10).unwrap(), 0);
        assert_eq!(tail_start_offset(&mut cur, 0).unwrap(), 6);
    }

    #[test]
    fn test_tail_start_offset_across_blocks() {
        let mut data = Vec::new();
        for i in 0..5000 {
            data.extend_from_slice(format!("line number {i}\n").as_bytes());
        }
        let mut cur = Cursor::new(&data[..]);
        let offset = tail_start_offset(&mut cur, 1000).unwrap() as usize;
        let tail = std::str::from_utf8(&data[offset..]).unwrap();
        assert_eq!(tail.lines().count(), 1000);
        assert!(tail.starts_with("line number 4000\n"));
    }
}
