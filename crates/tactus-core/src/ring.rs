//! Fixed-capacity ring used for detector statistics

/// Ring holding the `N` most recent values, indexed newest first.
///
/// The ring is always full: it starts with every slot set to a seed value and
/// each push displaces the oldest entry.
#[derive(Debug, Clone)]
pub struct FixedRing<const N: usize> {
    values: [f32; N],
    /// Slot holding the newest value
    head: usize,
}

impl<const N: usize> FixedRing<N> {
    pub fn filled(value: f32) -> Self {
        Self {
            values: [value; N],
            head: 0,
        }
    }

    /// Push a new value, returning the oldest value it displaced
    pub fn push(&mut self, value: f32) -> f32 {
        self.head = (self.head + N - 1) % N;
        let dropped = self.values[self.head];
        self.values[self.head] = value;
        dropped
    }

    /// Value `age` pushes ago (0 = newest). Ages past the capacity clamp to the oldest.
    pub fn get(&self, age: usize) -> f32 {
        self.values[(self.head + age.min(N - 1)) % N]
    }

    pub fn oldest(&self) -> f32 {
        self.get(N - 1)
    }

    pub fn sum(&self) -> f32 {
        self.values.iter().sum()
    }

    /// Values from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        (0..N).map(move |age| self.get(age))
    }
}
