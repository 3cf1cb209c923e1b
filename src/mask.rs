/// Applies (or removes) the client masking key: `payload[i] ^= key[i % 4]`.
#[inline]
pub fn unmask(payload: &mut [u8], key: [u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[index & 3];
    }
}
