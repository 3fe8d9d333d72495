use core::str;

pub fn str_from_buf_nul(src: &[u8]) -> Result<&str, str::Utf8Error> {
    let end = src.iter().position(|&c| c == b'\0').unwrap_or(src.len());
    str::from_utf8(&src[0..end])
}

/// Reads a little endian u32 from the start of a section, if it is long
/// enough to hold one.
pub fn read_u32_le(src: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = src.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[inline]
pub fn is_object_file(name: &[u8]) -> bool {
    name.ends_with(b".o")
}

/// Object name used in pin paths: file name without `.o` and without any
/// `@suffix` (e.g. `offload@mainline.o` -> `offload`).
pub fn object_name(file_name: &str) -> &str {
    let stem = file_name.strip_suffix(".o").unwrap_or(file_name);
    match stem.find('@') {
        Some(at) => &stem[..at],
        None => stem,
    }
}
