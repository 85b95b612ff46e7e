use std::io::Write;

/// Sends a single line of text over a stream socket.
///
/// `text` may contain line breaks (LF, CR, CRLF, or NUL); only the first
/// line is sent. Malformed UTF-8 is never produced here since `text` is a
/// Rust `str`, but we still document the contract: invalid bytes would be
/// replaced, not rejected, matching the original line-packet protocol.
///
/// When `pad_zeros` is set, the line is padded with `\0` bytes to the next
/// multiple of `packet_size` and written as one or more full packets. This
/// mirrors a compatibility mode some clients of the original protocol
/// expect; the default server path leaves it off.
pub fn send_line<W: Write>(
    sock: &mut W,
    text: &str,
    packet_size: usize,
    pad_zeros: bool,
) -> std::io::Result<()> {
    let first_line = first_line_of(text);
    let mut data = first_line.into_bytes();
    data.push(b'\n');

    if !pad_zeros {
        sock.write_all(&data)?;
        return Ok(());
    }

    data.push(0);
    let mut offset = 0;
    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < packet_size {
            sock.write_all(&data[offset..])?;
            let padding = packet_size - remaining;
            write_zeros(sock, padding)?;
            break;
        }
        sock.write_all(&data[offset..offset + packet_size])?;
        offset += packet_size;
    }
    Ok(())
}

fn write_zeros<W: Write>(sock: &mut W, count: usize) -> std::io::Result<()> {
    const CHUNK: usize = 4096;
    let zeros = [0u8; CHUNK];
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(CHUNK);
        sock.write_all(&zeros[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// Splits `text` on LF, CR, CRLF, or NUL and returns the first line, or the
/// whole string if it contains no line break. An empty or all-breaks input
/// yields an empty first line.
fn first_line_of(text: &str) -> String {
    let normalized = text.replace('\0', "\n");
    normalized
        .split(['\n', '\r'])
        .next()
        .unwrap_or("")
        .to_string()
}
