/**
 * Two instances of the same buffer with fixed roles: the front is read, the
 * back is written. A phase that has to read the old state of all particles
 * while writing the new state gets both through [`DoubleBuffer::split_mut`];
 * the borrow checker rules out writing to the front or reading the back
 * during that phase. [`DoubleBuffer::flip`] publishes the result.
 */
pub struct DoubleBuffer<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(front: T, back: T) -> Self {
        DoubleBuffer {
            buffers: [front, back],
            front: 0,
        }
    }

    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    /// In-place updates where every lane writes only its own slot.
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front]
    }

    /// Returns `(front, back)`.
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.buffers;
        if self.front == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn flip(&mut self) {
        self.front = 1 - self.front;
    }
}

impl<T: Clone> DoubleBuffer<T> {
    pub fn from_value(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}

#[test]
fn flip_publishes_the_back_buffer() {
    let mut buffer = DoubleBuffer::new(vec![1, 2, 3], vec![0; 3]);
    {
        let (front, back) = buffer.split_mut();
        for (dst, src) in back.iter_mut().zip(front.iter().rev()) {
            *dst = *src;
        }
    }
    assert_eq!(buffer.front(), &vec![1, 2, 3]);
    buffer.flip();
    assert_eq!(buffer.front(), &vec![3, 2, 1]);
    buffer.flip();
    assert_eq!(buffer.front(), &vec![1, 2, 3]);
}
