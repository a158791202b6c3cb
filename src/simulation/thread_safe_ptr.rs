/// Raw pointer that may cross thread boundaries.
///
/// Used for scatter writes where every parallel lane writes a distinct index
/// of the same buffer. The caller guarantees that no two lanes touch the same
/// element and that the buffer outlives the parallel loop.
pub struct ThreadSafeMutPtr<T> {
    ptr: *mut T,
}
impl<T> Copy for ThreadSafeMutPtr<T> {}
impl<T> Clone for ThreadSafeMutPtr<T> {
    fn clone(&self) -> Self {
        ThreadSafeMutPtr { ptr: self.ptr }
    }
}
unsafe impl<T> Sync for ThreadSafeMutPtr<T> {}
unsafe impl<T> Send for ThreadSafeMutPtr<T> {}
impl<T> ThreadSafeMutPtr<T> {
    pub fn new(ptr: *mut T) -> ThreadSafeMutPtr<T> {
        ThreadSafeMutPtr { ptr }
    }

    /// # Safety
    ///
    /// `idx` must be in bounds of the buffer this pointer was created from and
    /// no other lane may access `idx` concurrently.
    #[inline(always)]
    pub unsafe fn write(&self, idx: usize, value: T) {
        self.ptr.add(idx).write(value);
    }

    /// # Safety
    ///
    /// Same contract as [`ThreadSafeMutPtr::write`]; the returned reference
    /// must not outlive the lane that owns `idx`.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, idx: usize) -> &mut T {
        &mut *self.ptr.add(idx)
    }
}
