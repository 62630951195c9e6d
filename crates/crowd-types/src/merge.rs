/// Entities whose stored record absorbs newer observations of the same
/// subject.
///
/// `merge_volatile` overwrites the fields that change over time with the
/// values from `newer`, unconditionally (an absent value in `newer` clears
/// the stored one). Every other field of `self`, including its identity,
/// is left untouched.
pub trait Mergeable {
    fn merge_volatile(&mut self, newer: &Self);
}
