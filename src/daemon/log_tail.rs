use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

pub const DEFAULT_TAIL_WINDOW: u64 = 64 * 1024;

/// Return the last `n` lines of a log file, reading at most `window` bytes
/// from its end. Invalid UTF-8 is replaced rather than rejected. A missing
/// file has no lines.
pub fn tail_lines(path: &Path, n: usize, window: u64) -> io::Result<Vec<String>> {
    if n == 0 || window == 0 {
        return Ok(Vec::new());
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    // One byte before the window tells us whether it starts on a line boundary.
    let (offset, to_read, mid_file) = if len > window {
        (len - window - 1, window + 1, true)
    } else {
        (0, len, false)
    };

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(to_read as usize);
    file.take(to_read).read_to_end(&mut buf)?;

    let mut chunk: &[u8] = &buf;
    if mid_file {
        if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
            chunk = &chunk[pos + 1..];
        } else {
            chunk = &chunk[1..];
        }
    }

    let text = String::from_utf8_lossy(chunk);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}
