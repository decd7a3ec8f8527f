use bytes::{Buf, TryGetError};


/// Fixed-size reads on top of [Buf]'s checked getters, e.g. for ids that are stored as raw byte
///  arrays in frame headers.
pub trait BufExt: Buf {
    fn try_copy_to_array<const N: usize>(&mut self) -> Result<[u8; N], TryGetError> {
        let mut result = [0u8; N];
        self.try_copy_to_slice(&mut result)?;
        Ok(result)
    }
}

impl <T: Buf> BufExt for T {
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::exact(b"abcd".as_slice(), Some(*b"abcd"), b"".as_slice())]
    #[case::remainder(b"abcdef".as_slice(), Some(*b"abcd"), b"ef".as_slice())]
    #[case::short(b"abc".as_slice(), None, b"abc".as_slice())]
    fn test_try_copy_to_array(#[case] mut buf: &[u8], #[case] expected: Option<[u8; 4]>, #[case] rest: &[u8]) {
        match buf.try_copy_to_array::<4>() {
            Ok(arr) => assert_eq!(Some(arr), expected),
            Err(e) => {
                assert!(expected.is_none());
                assert_eq!(e.requested, 4);
                assert_eq!(e.available, 3);
            }
        }
        assert_eq!(buf, rest);
    }
}
