// buffer.rs -- Host-side vectors handed to the accelerator.
//
// Two shapes, both flat `i32` sequences of the same length:
//
//   InputBuffer  -- populated once on the host, then only read. No mutable
//                  accessor is exposed, so the values the device sees are
//                  the values the CPU reference is computed from.
//   ResultBuffer -- zero-filled on the host, overwritten by the device
//                  when the result is migrated back.
//
// The split is a type-level one: the harness cannot accidentally write an
// input or hand a result to the device as an operand.

use std::fmt;

/// Element type of every host and device vector.
pub type Element = i32;

/// How the device is allowed to touch a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Kernel reads only (operands).
    ReadOnly,
    /// Kernel writes only (results).
    WriteOnly,
    ReadWrite,
}

impl fmt::Display for BufferAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferAccess::ReadOnly => write!(f, "read-only"),
            BufferAccess::WriteOnly => write!(f, "write-only"),
            BufferAccess::ReadWrite => write!(f, "read-write"),
        }
    }
}

// ---------------------------------------------------------------------------
// InputBuffer
// ---------------------------------------------------------------------------

/// An immutable operand vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBuffer {
    data: Vec<Element>,
}

impl InputBuffer {
    /// The sequence `0, 1, .., len - 1`.
    ///
    /// Values past `i32::MAX` wrap, matching a 32-bit counter on the device.
    pub fn sequence(len: usize) -> Self {
        let data = (0..len).map(|i| i as Element).collect();
        InputBuffer { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Element] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// ResultBuffer
// ---------------------------------------------------------------------------

/// The destination vector for device results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBuffer {
    data: Vec<Element>,
}

impl ResultBuffer {
    /// A zero-filled result of `len` elements.
    pub fn zeroed(len: usize) -> Self {
        ResultBuffer { data: vec![0; len] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Element] {
        &self.data
    }

    /// Writable view used only while migrating results back from the device.
    pub(crate) fn as_mut_slice(&mut self) -> &mut [Element] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<Element> {
        self.data
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_values() {
        let buf = InputBuffer::sequence(4096);
        assert_eq!(buf.len(), 4096);
        assert_eq!(buf.as_slice()[0], 0);
        assert_eq!(buf.as_slice()[4095], 4095);
        assert!(buf.as_slice().windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_sequence_empty() {
        let buf = InputBuffer::sequence(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_result_zeroed() {
        let mut res = ResultBuffer::zeroed(16);
        assert!(res.as_slice().iter().all(|&v| v == 0));
        res.as_mut_slice()[3] = 7;
        assert_eq!(res.into_vec()[3], 7);
    }

    #[test]
    fn test_access_display() {
        assert_eq!(BufferAccess::ReadOnly.to_string(), "read-only");
        assert_eq!(BufferAccess::WriteOnly.to_string(), "write-only");
    }
}
