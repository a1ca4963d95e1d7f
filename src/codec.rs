//! Bounds-checked binary codec over fixed-capacity buffers
//!
//! All integers are big-endian. Strings are a `u16` byte length followed by
//! raw UTF-8 with no terminator.
//!
//! A `FrameBuffer` owns a byte array whose capacity is fixed at construction
//! plus two independent cursors. The write cursor doubles as the fill level:
//! reads never pass it, so decoding can never run past the declared payload.
//! Every cursor stays inside `[0, size)`; a move that would leave that range
//! fails with `BoundsError` and leaves the cursor untouched.

use bytes::{Buf, BufMut};

use crate::error::{BoundsError, ProtocolError};

/// Position inside a buffer of fixed size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    size: usize,
    position: usize,
}

impl Cursor {
    pub fn new(size: usize) -> Self {
        Self { size, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Move forward by `amount`, returning the position before the move
    pub fn advance(&mut self, amount: usize) -> Result<usize, BoundsError> {
        let start = self.position;
        match start.checked_add(amount) {
            Some(end) if end < self.size => {
                self.position = end;
                Ok(start)
            }
            _ => Err(self.out_of_bounds(amount as isize)),
        }
    }

    /// Move backward by `amount`, returning the new position
    pub fn retreat(&mut self, amount: usize) -> Result<usize, BoundsError> {
        if amount > self.position {
            return Err(self.out_of_bounds(-(amount as isize)));
        }
        self.position -= amount;
        Ok(self.position)
    }

    fn out_of_bounds(&self, delta: isize) -> BoundsError {
        BoundsError {
            position: self.position,
            delta,
            size: self.size,
        }
    }
}

/// Fixed-capacity byte buffer with independent read and write cursors
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
    read: Cursor,
    write: Cursor,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer; the capacity never changes afterwards
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: Cursor::new(capacity),
            write: Cursor::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written (or received) so far
    pub fn len(&self) -> usize {
        self.write.position()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_position(&self) -> usize {
        self.read.position()
    }

    /// Bytes written but not yet read
    pub fn remaining(&self) -> usize {
        self.len() - self.read.position()
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// The written bytes, e.g. for sending
    pub fn as_written(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Zero the written bytes and rewind the write cursor
    pub fn reset_write(&mut self) {
        let len = self.len();
        self.data[..len].fill(0);
        self.write.reset();
    }

    /// Rewind the read cursor
    pub fn reset_read(&mut self) {
        self.read.reset();
    }

    /// Zero the buffer and rewind both cursors
    pub fn reset(&mut self) {
        self.reset_write();
        self.reset_read();
    }

    /// Drop everything written after `len`, zeroing those bytes
    pub fn truncate(&mut self, len: usize) -> Result<(), BoundsError> {
        let current = self.len();
        if len >= current {
            return Ok(());
        }
        self.write.retreat(current - len)?;
        self.data[len..current].fill(0);
        if self.read.position() > len {
            let back = self.read.position() - len;
            self.read.retreat(back)?;
        }
        Ok(())
    }

    /// Writable space of `amount` bytes past the fill level, for socket reads
    ///
    /// Call `advance_filled` with the number of bytes actually placed there.
    pub fn unfilled_mut(&mut self, amount: usize) -> Result<&mut [u8], BoundsError> {
        let start = self.len();
        match start.checked_add(amount) {
            Some(end) if end < self.capacity() => Ok(&mut self.data[start..end]),
            _ => Err(BoundsError {
                position: start,
                delta: amount as isize,
                size: self.capacity(),
            }),
        }
    }

    /// Record `amount` bytes received into the unfilled region
    pub fn advance_filled(&mut self, amount: usize) -> Result<(), BoundsError> {
        self.write.advance(amount).map(|_| ())
    }

    fn reserve(&mut self, amount: usize) -> Result<&mut [u8], BoundsError> {
        let start = self.write.advance(amount)?;
        Ok(&mut self.data[start..start + amount])
    }

    fn take(&mut self, amount: usize) -> Result<&[u8], BoundsError> {
        let start = self.read.position();
        if start + amount > self.len() {
            return Err(BoundsError {
                position: start,
                delta: amount as isize,
                size: self.len(),
            });
        }
        self.read.advance(amount)?;
        Ok(&self.data[start..start + amount])
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), BoundsError> {
        let mut field = self.reserve(4)?;
        field.put_i32(value);
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), BoundsError> {
        let mut field = self.reserve(2)?;
        field.put_u16(value);
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), BoundsError> {
        let mut field = self.reserve(1)?;
        field.put_u8(u8::from(value));
        Ok(())
    }

    /// Write a length-prefixed string; fails without writing anything if it
    /// does not fit or is longer than `u16::MAX` bytes
    pub fn put_str(&mut self, value: &str) -> Result<(), BoundsError> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| BoundsError {
            position: self.len(),
            delta: bytes.len() as isize,
            size: usize::from(u16::MAX),
        })?;
        // Check the whole field up front so a failure never leaves a dangling prefix
        if self.len() + 2 + bytes.len() >= self.capacity() {
            return Err(BoundsError {
                position: self.len(),
                delta: (2 + bytes.len()) as isize,
                size: self.capacity(),
            });
        }
        self.put_u16(len)?;
        let mut field = self.reserve(bytes.len())?;
        field.put_slice(bytes);
        Ok(())
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        let mut field = self.take(4)?;
        Ok(field.get_i32())
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        let mut field = self.take(2)?;
        Ok(field.get_u16())
    }

    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        let mut field = self.take(1)?;
        Ok(field.get_u8() == 1)
    }

    pub fn get_str(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.get_u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}
