//! A small free-list of reusable [`VecWriter`] buffers for hot encode paths
//! (§6's "pooled writer"), grounded in the teacher's use of `parking_lot`
//! for low-contention pooling rather than `std::sync::Mutex`.

use parking_lot::Mutex;

use crate::VecWriter;

/// A pool of reusable write buffers. Cheap to clone (shares the underlying
/// free-list via an `Arc`-free `Mutex` held behind a reference the caller
/// owns).
#[derive(Debug, Default)]
pub struct WriterPool {
    free: Mutex<Vec<VecWriter>>,
}

impl WriterPool {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a cleared writer from the pool, allocating one if the pool is
    /// empty. Returned to the pool automatically on drop.
    pub fn acquire(&self) -> PooledWriter<'_> {
        let mut writer = self.free.lock().pop().unwrap_or_default();
        writer.clear();
        PooledWriter {
            pool: self,
            writer: Some(writer),
        }
    }

    fn release(&self, writer: VecWriter) {
        self.free.lock().push(writer);
    }
}

/// A [`VecWriter`] on loan from a [`WriterPool`]; returns itself to the pool
/// when dropped.
pub struct PooledWriter<'p> {
    pool: &'p WriterPool,
    writer: Option<VecWriter>,
}

impl std::ops::Deref for PooledWriter<'_> {
    type Target = VecWriter;

    fn deref(&self) -> &Self::Target {
        self.writer.as_ref().expect("writer taken before drop")
    }
}

impl std::ops::DerefMut for PooledWriter<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.writer.as_mut().expect("writer taken before drop")
    }
}

impl Drop for PooledWriter<'_> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.pool.release(writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteWriter;

    #[test]
    fn pooled_writer_is_reused_after_drop() {
        let pool = WriterPool::new();
        {
            let mut w = pool.acquire();
            w.write_u8(1);
        }
        assert_eq!(pool.free.lock().len(), 1);
        let w = pool.acquire();
        assert!(w.as_slice().is_empty(), "writer should be cleared on reuse");
    }
}
